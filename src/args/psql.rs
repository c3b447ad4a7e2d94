// ABOUTME: psql argument normalization
// ABOUTME: Rewrites -f/--file script references and captures stdin for `-f -`

use super::{NormalizedArgs, PathEnv, StdinProvider};
use crate::error::CliError;

const STDIN_MARKER: &str = "-";

/// Normalizes a psql argument vector. Script files named by `-f`, `-f<path>`,
/// `--file` or `--file=<path>` are resolved through `env`; `-` reads all of
/// stdin once and keeps the `-` token. Everything else passes through.
pub fn normalize_psql_args(
    args: &[String],
    env: &PathEnv<'_>,
    stdin: &dyn StdinProvider,
) -> Result<NormalizedArgs, CliError> {
    let mut out = Vec::with_capacity(args.len());
    let mut captured: Option<String> = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if arg == "-f" || arg == "--file" {
            let value = iter
                .next()
                .ok_or_else(|| CliError::MissingValue(arg.clone()))?;
            out.push(arg.clone());
            out.push(script_value(value, env, stdin, &mut captured)?);
        } else if let Some(value) = arg.strip_prefix("--file=") {
            if value.is_empty() {
                return Err(CliError::MissingValue("--file".to_string()));
            }
            out.push(format!(
                "--file={}",
                script_value(value, env, stdin, &mut captured)?
            ));
        } else if let Some(value) = short_file_inline(arg) {
            out.push(format!(
                "-f{}",
                script_value(value, env, stdin, &mut captured)?
            ));
        } else {
            out.push(arg.clone());
        }
    }

    Ok(NormalizedArgs {
        args: out,
        stdin: captured,
    })
}

/// `-f<value>` with the value glued to the flag.
fn short_file_inline(arg: &str) -> Option<&str> {
    arg.strip_prefix("-f").filter(|value| !value.is_empty())
}

fn script_value(
    value: &str,
    env: &PathEnv<'_>,
    stdin: &dyn StdinProvider,
    captured: &mut Option<String>,
) -> Result<String, CliError> {
    if value == STDIN_MARKER {
        if captured.is_none() {
            let content = stdin
                .read_all()
                .map_err(|e| CliError::StdinRead(e.to_string()))?;
            *captured = Some(content);
        }
        return Ok(STDIN_MARKER.to_string());
    }
    env.resolve_file(value)
}
