// ABOUTME: Client configuration: optional TOML file, environment, and flag overrides
// ABOUTME: Produces the immutable ExecutionContext shared by every pipeline step

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::CliError;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:17654";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Local,
    Remote,
}

impl FromStr for Mode {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Mode::Local),
            "remote" => Ok(Mode::Remote),
            other => Err(CliError::Usage(format!(
                "unknown mode '{}', expected local or remote",
                other
            ))),
        }
    }
}

/// On-disk configuration. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub mode: Option<Mode>,
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub workspace: Option<PathBuf>,
    pub wsl: Option<bool>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    pub request_secs: Option<u64>,
    pub startup_secs: Option<u64>,
    pub watch_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse TOML")
    }
}

/// Values taken from the command line and environment; `None` defers to the
/// config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mode: Option<Mode>,
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub workspace: Option<PathBuf>,
    pub request_timeout_secs: Option<u64>,
    pub startup_timeout_secs: Option<u64>,
    pub watch_timeout_secs: Option<u64>,
    pub verbose: bool,
}

/// Request parameters fixed for one invocation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub mode: Mode,
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
    pub startup_timeout: Duration,
    /// `None` waits for a terminal job state indefinitely.
    pub watch_timeout: Option<Duration>,
    pub verbose: bool,
    pub cwd: PathBuf,
    /// Always set in remote mode.
    pub workspace_root: Option<PathBuf>,
    pub wsl: bool,
}

impl ExecutionContext {
    pub fn resolve(file: FileConfig, overrides: Overrides, cwd: PathBuf) -> Result<Self, CliError> {
        let mode = overrides.mode.or(file.mode).unwrap_or_default();
        let endpoint = overrides
            .endpoint
            .or(file.endpoint)
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(CliError::Config(format!(
                "endpoint '{}' must start with http:// or https://",
                endpoint
            )));
        }

        let workspace = overrides.workspace.or(file.workspace).map(|ws| {
            if ws.is_absolute() {
                crate::paths::clean_path(&ws)
            } else {
                crate::paths::clean_path(&cwd.join(ws))
            }
        });
        let workspace_root = match mode {
            Mode::Remote => Some(workspace.unwrap_or_else(|| cwd.clone())),
            Mode::Local => workspace,
        };

        let secs = |flag: Option<u64>, file: Option<u64>| flag.or(file).map(Duration::from_secs);

        Ok(Self {
            mode,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            auth_token: overrides.auth_token.or(file.auth_token),
            request_timeout: secs(overrides.request_timeout_secs, file.timeouts.request_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            startup_timeout: secs(overrides.startup_timeout_secs, file.timeouts.startup_secs)
                .unwrap_or(DEFAULT_STARTUP_TIMEOUT),
            watch_timeout: secs(overrides.watch_timeout_secs, file.timeouts.watch_secs)
                .filter(|d| !d.is_zero()),
            verbose: overrides.verbose,
            cwd,
            workspace_root,
            wsl: file.wsl.unwrap_or(false),
        })
    }
}
