// ABOUTME: Liquibase argument normalization
// ABOUTME: Canonicalizes --searchPath and rewrites changelog/defaults file references

use super::{PathEnv, CLASSPATH_PREFIX};
use crate::error::CliError;

const SEARCH_PATH: &str = "--searchPath";
const SEARCH_PATH_ALIASES: [&str; 2] = ["--search-path", "--searchPath"];
const FILE_FLAGS: [&str; 4] = [
    "--changelog-file",
    "--changelogFile",
    "--defaults-file",
    "--defaultsFile",
];

enum Flag {
    SearchPath,
    File(String),
}

fn classify(name: &str) -> Option<Flag> {
    if SEARCH_PATH_ALIASES.contains(&name) {
        Some(Flag::SearchPath)
    } else if FILE_FLAGS.contains(&name) {
        Some(Flag::File(name.to_string()))
    } else {
        None
    }
}

/// Normalizes a Liquibase argument vector. `--search-path` is respelled as
/// `--searchPath`. Relative search path entries start at the workspace root
/// and changelog/defaults files at the cwd; `classpath:` references are left
/// alone. Both `flag value` and `flag=value` forms are kept in the form given.
pub fn normalize_liquibase_args(args: &[String], env: &PathEnv<'_>) -> Result<Vec<String>, CliError> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let (name, inline) = match arg.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value)),
            _ => (arg.as_str(), None),
        };

        let Some(flag) = classify(name) else {
            out.push(arg.clone());
            continue;
        };

        let (spelling, value) = match &flag {
            Flag::SearchPath => (SEARCH_PATH.to_string(), inline),
            Flag::File(spelling) => (spelling.clone(), inline),
        };

        let value = match value {
            Some(value) => value.to_string(),
            None => iter
                .next()
                .cloned()
                .ok_or_else(|| CliError::MissingValue(name.to_string()))?,
        };

        let rewritten = match flag {
            Flag::SearchPath => normalize_search_path(&value, env)?,
            Flag::File(_) => {
                if value.is_empty() {
                    return Err(CliError::MissingValue(name.to_string()));
                }
                rewrite_reference(&value, env)?
            }
        };

        if inline.is_some() {
            out.push(format!("{}={}", spelling, rewritten));
        } else {
            out.push(spelling);
            out.push(rewritten);
        }
    }

    Ok(out)
}

fn normalize_search_path(value: &str, env: &PathEnv<'_>) -> Result<String, CliError> {
    if value.trim().is_empty() {
        return Err(CliError::InvalidSearchPath(
            "search path is empty".to_string(),
        ));
    }

    let mut entries = Vec::new();
    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(CliError::InvalidSearchPath(format!(
                "empty entry in '{}'",
                value
            )));
        }
        if entry.starts_with(CLASSPATH_PREFIX) {
            entries.push(entry.to_string());
        } else {
            entries.push(env.resolve_in_workspace(entry)?);
        }
    }
    Ok(entries.join(","))
}

fn rewrite_reference(value: &str, env: &PathEnv<'_>) -> Result<String, CliError> {
    if value.starts_with(CLASSPATH_PREFIX) {
        return Ok(value.to_string());
    }
    env.resolve_file(value)
}
