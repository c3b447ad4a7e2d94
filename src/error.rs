// ABOUTME: Error taxonomy for the sqlrs client
// ABOUTME: Each variant carries an actionable message and maps to a process exit code

use std::fmt;
use std::path::PathBuf;

/// Exit code for bad invocations (matches clap's own usage errors).
pub const USAGE_EXIT_CODE: i32 = 2;

#[derive(Debug)]
pub enum CliError {
    Usage(String),
    InvalidPath(String),
    PathOutsideWorkspace { path: PathBuf, root: PathBuf },
    MissingValue(String),
    InvalidSearchPath(String),
    StdinRead(String),
    ConflictingInstanceReference(String),
    Remote { status: Option<u16>, message: String },
    JobFailed {
        job_id: String,
        message: String,
        details: Option<String>,
    },
    Config(String),
}

impl CliError {
    pub fn remote(message: impl Into<String>) -> Self {
        CliError::Remote {
            status: None,
            message: message.into(),
        }
    }

    pub fn remote_status(status: u16, message: impl Into<String>) -> Self {
        CliError::Remote {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Process exit code for this error. Everything that fails before a
    /// remote call is a usage problem.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_)
            | CliError::InvalidPath(_)
            | CliError::PathOutsideWorkspace { .. }
            | CliError::MissingValue(_)
            | CliError::InvalidSearchPath(_)
            | CliError::ConflictingInstanceReference(_) => USAGE_EXIT_CODE,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "Usage error: {}", msg),
            CliError::InvalidPath(msg) => write!(f, "Invalid path: {}", msg),
            CliError::PathOutsideWorkspace { path, root } => write!(
                f,
                "Path {} is outside the workspace {}. Move the file into the workspace or pass --workspace",
                path.display(),
                root.display()
            ),
            CliError::MissingValue(flag) => write!(f, "Missing value for {}", flag),
            CliError::InvalidSearchPath(msg) => write!(f, "Invalid search path: {}", msg),
            CliError::StdinRead(msg) => write!(f, "Failed to read standard input: {}", msg),
            CliError::ConflictingInstanceReference(msg) => {
                write!(f, "Conflicting instance reference: {}", msg)
            }
            CliError::Remote {
                status: Some(status),
                message,
            } => write!(f, "Engine error ({}): {}", status, message),
            CliError::Remote {
                status: None,
                message,
            } => write!(f, "Engine error: {}", message),
            CliError::JobFailed {
                job_id,
                message,
                details,
            } => {
                write!(f, "Prepare job {} failed: {}", job_id, message)?;
                if let Some(details) = details {
                    write!(f, " ({})", details)?;
                }
                Ok(())
            }
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<reqwest::Error> for CliError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else if err.is_connect() {
            format!("cannot reach the engine: {}", err)
        } else {
            err.to_string()
        };
        CliError::Remote { status, message }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::remote(format!("malformed engine response: {}", err))
    }
}
