// ABOUTME: Windows Subsystem for Linux detection and path-converter selection
// ABOUTME: The distro lister is injected so detection can be exercised off Windows

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::args::{relativize_to_root, Converter};
use crate::config::{ExecutionContext, Mode};
use crate::error::CliError;
use crate::paths::translate_host_path;

/// Lists installed WSL distributions.
pub trait DistroLister {
    fn list_distros(&self) -> std::io::Result<Vec<String>>;
}

/// Asks `wsl.exe -l -q`, if it is on the PATH.
pub struct WslExe;

impl DistroLister for WslExe {
    fn list_distros(&self) -> std::io::Result<Vec<String>> {
        let exe = match which::which("wsl.exe") {
            Ok(exe) => exe,
            Err(_) => return Ok(Vec::new()),
        };
        let output = Command::new(exe).args(["-l", "-q"]).output()?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(parse_distro_list(&output.stdout))
    }
}

/// `wsl.exe` writes UTF-16LE; fall back to UTF-8 when the byte count is odd
/// or no NULs are present.
fn parse_distro_list(raw: &[u8]) -> Vec<String> {
    let text = if raw.len() % 2 == 0 && raw.contains(&0) {
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(raw).into_owned()
    };

    text.lines()
        .map(|line| line.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}' || c == '\0'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether local execution happens inside WSL: explicitly configured, or on
/// Windows with at least one distro installed.
pub fn uses_wsl(ctx: &ExecutionContext, lister: &dyn DistroLister) -> bool {
    if ctx.mode != Mode::Local {
        return false;
    }
    if ctx.wsl {
        return true;
    }
    if !cfg!(windows) {
        return false;
    }
    match lister.list_distros() {
        Ok(distros) => {
            debug!("WSL distros: {:?}", distros);
            !distros.is_empty()
        }
        Err(e) => {
            debug!("Could not list WSL distros: {}", e);
            false
        }
    }
}

/// Path conversion for the execution environment selected by `ctx`.
pub fn converter_for(
    ctx: &ExecutionContext,
    lister: &dyn DistroLister,
) -> Option<Box<Converter>> {
    match ctx.mode {
        Mode::Remote => {
            let root = ctx.workspace_root.clone().unwrap_or_else(|| ctx.cwd.clone());
            let relativize: Box<Converter> = Box::new(move |p: &str| -> Result<String, CliError> {
                Ok(relativize_to_root(Path::new(&root), p))
            });
            Some(relativize)
        }
        Mode::Local if uses_wsl(ctx, lister) => {
            let translate: Box<Converter> = Box::new(translate_host_path);
            Some(translate)
        }
        Mode::Local => None,
    }
}
