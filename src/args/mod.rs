// ABOUTME: Argument normalization for the wrapped client tools (psql, Liquibase)
// ABOUTME: Resolves file references against the workspace and the execution environment

pub mod liquibase;
pub mod psql;

use std::io::{self, Read};
use std::path::Path;
use std::sync::{mpsc, OnceLock};
use std::thread;
use std::time::Duration;

use crate::error::CliError;
use crate::paths::{contain_within_root, require_within_root, resolve_against, to_slash};

pub use liquibase::normalize_liquibase_args;
pub use psql::normalize_psql_args;

/// Maps a resolved host path to the path the execution environment expects.
pub type Converter = dyn Fn(&str) -> Result<String, CliError> + Send + Sync;

/// Prefix that marks an in-tool resource rather than a filesystem path.
pub const CLASSPATH_PREFIX: &str = "classpath:";

/// Where file arguments are resolved and how they are rewritten.
pub struct PathEnv<'a> {
    pub cwd: &'a Path,
    /// `None` only in local mode without a configured workspace.
    pub workspace_root: Option<&'a Path>,
    pub convert: Option<&'a Converter>,
}

impl<'a> PathEnv<'a> {
    /// Resolves a user-supplied file argument: relative to `cwd`, contained
    /// in the workspace when there is one, then converted when a converter is
    /// configured.
    pub fn resolve_file(&self, value: &str) -> Result<String, CliError> {
        self.resolve_from(self.cwd, value)
    }

    /// Like `resolve_file`, but relative values start at the workspace root
    /// (the cwd when there is none).
    pub fn resolve_in_workspace(&self, value: &str) -> Result<String, CliError> {
        self.resolve_from(self.workspace_root.unwrap_or(self.cwd), value)
    }

    fn resolve_from(&self, base: &Path, value: &str) -> Result<String, CliError> {
        let resolved = resolve_against(base, value);
        if let Some(root) = self.workspace_root {
            require_within_root(root, &resolved)?;
        }
        let host = resolved.to_string_lossy();
        match self.convert {
            Some(convert) => convert(&host),
            None => Ok(host.into_owned()),
        }
    }
}

/// Tool arguments after normalization, plus stdin captured for `-f -`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedArgs {
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

/// Source of standard input for `-` file arguments.
pub trait StdinProvider: Send + Sync {
    fn read_all(&self) -> io::Result<String>;
}

/// Reads the process stdin at most once; later calls get the same content.
/// The read runs on a helper thread so a stalled pipe is bounded by `timeout`.
pub struct ProcessStdin {
    timeout: Duration,
    captured: OnceLock<Result<String, String>>,
}

impl ProcessStdin {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            captured: OnceLock::new(),
        }
    }

    /// On timeout the reader thread stays blocked in `read_to_string`; nothing
    /// can interrupt a stdin read, and the process exits with the error.
    fn capture(&self) -> Result<String, String> {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = String::new();
            let result = io::stdin().lock().read_to_string(&mut buf).map(|_| buf);
            let _ = tx.send(result.map_err(|e| e.to_string()));
        });
        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(format!(
                "no end of input after {}s",
                self.timeout.as_secs()
            )),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err("stdin reader exited unexpectedly".to_string())
            }
        }
    }
}

impl StdinProvider for ProcessStdin {
    fn read_all(&self) -> io::Result<String> {
        self.captured
            .get_or_init(|| self.capture())
            .clone()
            .map_err(|msg| io::Error::new(io::ErrorKind::Other, msg))
    }
}

/// Rewrites an absolute path under `root` to a root-relative, `/`-separated
/// form for a remote engine that has no view of the local layout. Anything
/// else comes back unchanged.
pub fn relativize_to_root(root: &Path, value: &str) -> String {
    let path = Path::new(value);
    if !path.is_absolute() {
        return value.to_string();
    }
    let contained = contain_within_root(root, path);
    if contained.is_absolute() {
        value.to_string()
    } else {
        to_slash(&contained)
    }
}

/// Converts a working directory for a different execution environment.
/// Conversion failures are returned unchanged.
pub fn normalize_work_dir(dir: &Path, convert: Option<&Converter>) -> Result<String, CliError> {
    let host = dir.to_string_lossy();
    match convert {
        Some(convert) => convert(&host),
        None => Ok(host.into_owned()),
    }
}
