// ABOUTME: Splits a command line into prepare:<kind> / run:<kind> pipeline steps
// ABOUTME: Also separates step options (--image, --instance, --no-watch) from tool arguments

use std::fmt;

use crate::error::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareKind {
    Psql,
    Liquibase,
}

impl PrepareKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrepareKind::Psql => "psql",
            PrepareKind::Liquibase => "lb",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Psql,
    Pgbench,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Psql => "psql",
            RunKind::Pgbench => "pgbench",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStep {
    Prepare { kind: PrepareKind, args: Vec<String> },
    Run { kind: RunKind, args: Vec<String> },
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PipelineStep::Prepare { kind, .. } => write!(f, "prepare:{}", kind.as_str()),
            PipelineStep::Run { kind, .. } => write!(f, "run:{}", kind.as_str()),
        }
    }
}

/// Recognizes a step head such as `prepare:psql`. `Ok(None)` for anything
/// that is not shaped like `<verb>:<kind>`.
fn step_head(token: &str) -> Result<Option<PipelineStep>, CliError> {
    let Some((verb, kind)) = token.split_once(':') else {
        return Ok(None);
    };
    let step = match (verb, kind) {
        ("prepare", "psql") => PipelineStep::Prepare {
            kind: PrepareKind::Psql,
            args: Vec::new(),
        },
        ("prepare", "lb") | ("prepare", "liquibase") => PipelineStep::Prepare {
            kind: PrepareKind::Liquibase,
            args: Vec::new(),
        },
        ("run", "psql") => PipelineStep::Run {
            kind: RunKind::Psql,
            args: Vec::new(),
        },
        ("run", "pgbench") => PipelineStep::Run {
            kind: RunKind::Pgbench,
            args: Vec::new(),
        },
        ("prepare", other) | ("run", other) => {
            return Err(CliError::Usage(format!("unknown {} kind '{}'", verb, other)))
        }
        _ => return Ok(None),
    };
    Ok(Some(step))
}

/// Parses `prepare:<kind> [args...] [run:<kind> [args...]]`. Arguments
/// after a literal `--` are never treated as step heads.
pub fn parse_steps(tokens: &[String]) -> Result<Vec<PipelineStep>, CliError> {
    let mut steps: Vec<PipelineStep> = Vec::new();
    let mut raw = false;

    for token in tokens {
        if !raw {
            if let Some(step) = step_head(token)? {
                steps.push(step);
                continue;
            }
        }
        let Some(current) = steps.last_mut() else {
            return Err(CliError::Usage(format!(
                "expected a command like prepare:psql or run:psql, got '{}'",
                token
            )));
        };
        if token == "--" && !raw {
            raw = true;
        }
        match current {
            PipelineStep::Prepare { args, .. } | PipelineStep::Run { args, .. } => {
                args.push(token.clone())
            }
        }
    }

    match steps.as_slice() {
        [] => Err(CliError::Usage("no command given".to_string())),
        [_] | [PipelineStep::Prepare { .. }, PipelineStep::Run { .. }] => Ok(steps),
        _ => Err(CliError::Usage(format!(
            "unsupported pipeline '{}'; expected prepare:<kind> followed by at most one run:<kind>",
            steps
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        ))),
    }
}

/// Takes the value of `--name value` or `--name=value` at `args[*i]`.
fn take_option(args: &[String], i: &mut usize, name: &str) -> Result<Option<String>, CliError> {
    let arg = &args[*i];
    if arg == name {
        let value = args
            .get(*i + 1)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CliError::MissingValue(name.to_string()))?;
        *i += 1;
        return Ok(Some(value.clone()));
    }
    if let Some(value) = arg.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')) {
        if value.is_empty() {
            return Err(CliError::MissingValue(name.to_string()));
        }
        return Ok(Some(value.to_string()));
    }
    Ok(None)
}

/// Step options versus the arguments forwarded to the tool. A `--`
/// separator ends option parsing and is itself dropped.
fn split_options(
    args: &[String],
    mut handle: impl FnMut(&[String], &mut usize) -> Result<bool, CliError>,
) -> Result<Vec<String>, CliError> {
    let mut tool_args = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--" {
            tool_args.extend(args[i + 1..].iter().cloned());
            break;
        }
        if !handle(args, &mut i)? {
            tool_args.push(args[i].clone());
        }
        i += 1;
    }
    Ok(tool_args)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareOptions {
    pub image: String,
    pub watch: bool,
    pub tool_args: Vec<String>,
}

pub fn prepare_options(args: &[String]) -> Result<PrepareOptions, CliError> {
    let mut image = None;
    let mut watch = true;
    let tool_args = split_options(args, |args, i| {
        if let Some(value) = take_option(args, i, "--image")? {
            image = Some(value);
            return Ok(true);
        }
        match args[*i].as_str() {
            "--watch" => watch = true,
            "--no-watch" => watch = false,
            _ => return Ok(false),
        }
        Ok(true)
    })?;

    let image = image.ok_or_else(|| CliError::Usage("prepare needs --image <id>".to_string()))?;
    Ok(PrepareOptions {
        image,
        watch,
        tool_args,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub instance: Option<String>,
    pub tool_args: Vec<String>,
}

pub fn run_options(args: &[String]) -> Result<RunOptions, CliError> {
    let mut instance = None;
    let tool_args = split_options(args, |args, i| {
        match take_option(args, i, "--instance")? {
            Some(value) => {
                instance = Some(value);
                Ok(true)
            }
            None => Ok(false),
        }
    })?;
    Ok(RunOptions {
        instance,
        tool_args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::test_support::strings;

    #[test]
    fn test_parse_composite() {
        let steps = parse_steps(&strings(&[
            "prepare:psql",
            "--image",
            "pg16",
            "-f",
            "init.sql",
            "run:psql",
            "-c",
            "select 1",
        ]))
        .unwrap();
        assert_eq!(
            steps,
            vec![
                PipelineStep::Prepare {
                    kind: PrepareKind::Psql,
                    args: strings(&["--image", "pg16", "-f", "init.sql"]),
                },
                PipelineStep::Run {
                    kind: RunKind::Psql,
                    args: strings(&["-c", "select 1"]),
                },
            ]
        );
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for tokens in [
            vec![],
            vec!["-c", "select 1"],
            vec!["run:psql", "prepare:psql"],
            vec!["prepare:psql", "prepare:lb"],
            vec!["prepare:mysql"],
        ] {
            let err = parse_steps(&strings(&tokens)).unwrap_err();
            assert!(matches!(err, CliError::Usage(_)), "{:?}", tokens);
        }
    }

    #[test]
    fn test_step_heads_after_separator_are_arguments() {
        let steps = parse_steps(&strings(&["run:psql", "--", "run:psql"])).unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn test_prepare_options() {
        let opts =
            prepare_options(&strings(&["--image=pg16", "--no-watch", "-f", "a.sql", "--", "--image"]))
                .unwrap();
        assert_eq!(opts.image, "pg16");
        assert!(!opts.watch);
        assert_eq!(opts.tool_args, strings(&["-f", "a.sql", "--image"]));

        assert!(matches!(
            prepare_options(&strings(&["-f", "a.sql"])),
            Err(CliError::Usage(_))
        ));
        assert!(matches!(
            prepare_options(&strings(&["--image"])),
            Err(CliError::MissingValue(_))
        ));
    }

    #[test]
    fn test_run_options() {
        let opts = run_options(&strings(&["--instance", "inst-9", "-c", "select 1"])).unwrap();
        assert_eq!(opts.instance.as_deref(), Some("inst-9"));
        assert_eq!(opts.tool_args, strings(&["-c", "select 1"]));

        let opts = run_options(&strings(&["-c", "select 1"])).unwrap();
        assert_eq!(opts.instance, None);
        assert!(matches!(
            run_options(&strings(&["--instance="])),
            Err(CliError::MissingValue(_))
        ));
    }
}
