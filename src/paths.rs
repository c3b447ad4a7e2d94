// ABOUTME: Lexical path interpretation shared by the argument normalizers
// ABOUTME: Host-to-guest (WSL mount) translation and workspace containment checks

use std::path::{Component, Path, PathBuf};

use crate::error::CliError;

/// Translates a Windows host path such as `C:\work\db` into the path the
/// Linux subsystem sees (`/mnt/c/work/db`). Paths that are already rooted
/// with `/` are returned unchanged.
pub fn translate_host_path(path: &str) -> Result<String, CliError> {
    if path.is_empty() {
        return Err(CliError::InvalidPath("path is empty".to_string()));
    }
    if path.starts_with('/') {
        return Ok(path.to_string());
    }

    let mut chars = path.chars();
    let drive = match (chars.next(), chars.next()) {
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => letter.to_ascii_lowercase(),
        _ => {
            return Err(CliError::InvalidPath(format!(
                "{} is not an absolute host path",
                path
            )))
        }
    };

    let rest = &path[2..];
    if !rest.starts_with('\\') && !rest.starts_with('/') {
        return Err(CliError::InvalidPath(format!(
            "{} is drive-relative; use an absolute path like {}:\\...",
            path,
            drive.to_ascii_uppercase()
        )));
    }

    let segments: Vec<&str> = rest
        .split(['\\', '/'])
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.is_empty() {
        Ok(format!("/mnt/{}", drive))
    } else {
        Ok(format!("/mnt/{}/{}", drive, segments.join("/")))
    }
}

/// Lexically cleans a path: drops `.` segments and folds `..` into the
/// preceding segment. `..` above the root of an absolute path is discarded.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Returns `candidate` relative to `root` when it lies under it, otherwise
/// the candidate unchanged. No filesystem access.
pub fn contain_within_root(root: &Path, candidate: &Path) -> PathBuf {
    let cleaned = clean_path(candidate);
    match cleaned.strip_prefix(clean_path(root)) {
        Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
        Ok(rel) => rel.to_path_buf(),
        Err(_) => candidate.to_path_buf(),
    }
}

/// Like [`contain_within_root`] but fails when the cleaned candidate escapes
/// the root. The root itself is accepted and yields `.`.
pub fn require_within_root(root: &Path, candidate: &Path) -> Result<PathBuf, CliError> {
    let cleaned = clean_path(candidate);
    let root = clean_path(root);
    match cleaned.strip_prefix(&root) {
        Ok(rel) if rel.as_os_str().is_empty() => Ok(PathBuf::from(".")),
        Ok(rel) => Ok(rel.to_path_buf()),
        Err(_) => Err(CliError::PathOutsideWorkspace {
            path: cleaned,
            root,
        }),
    }
}

/// Resolves `path` against `cwd` when it is relative, then cleans it.
pub fn resolve_against(cwd: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        clean_path(candidate)
    } else {
        clean_path(&cwd.join(candidate))
    }
}

/// Renders a path with `/` separators for transmission to the engine.
pub fn to_slash(path: &Path) -> String {
    let joined = path
        .components()
        .filter(|c| !matches!(c, Component::RootDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    if path.has_root() {
        format!("/{}", joined)
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_drive_path() {
        assert_eq!(translate_host_path(r"C:\a\b").unwrap(), "/mnt/c/a/b");
        assert_eq!(translate_host_path("E:/data/x.sql").unwrap(), "/mnt/e/data/x.sql");
    }

    #[test]
    fn test_translate_bare_drive_root() {
        assert_eq!(translate_host_path(r"D:\").unwrap(), "/mnt/d");
    }

    #[test]
    fn test_translate_passes_guest_paths_through() {
        assert_eq!(translate_host_path("/mnt/c/x").unwrap(), "/mnt/c/x");
    }

    #[test]
    fn test_translate_rejects_empty_and_relative() {
        assert!(matches!(translate_host_path(""), Err(CliError::InvalidPath(_))));
        assert!(matches!(translate_host_path(r"a\b"), Err(CliError::InvalidPath(_))));
        assert!(matches!(translate_host_path("C:foo"), Err(CliError::InvalidPath(_))));
    }

    #[test]
    fn test_clean_path_folds_parent_segments() {
        assert_eq!(clean_path(Path::new("/ws/a/../b/./c")), PathBuf::from("/ws/b/c"));
        assert_eq!(clean_path(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(clean_path(Path::new("a/..")), PathBuf::from("."));
    }

    #[test]
    fn test_require_within_root_descendant() {
        let rel = require_within_root(Path::new("/ws"), Path::new("/ws/sql/init.sql")).unwrap();
        assert_eq!(rel, PathBuf::from("sql/init.sql"));
    }

    #[test]
    fn test_require_within_root_rejects_escape() {
        let err = require_within_root(Path::new("/ws/proj"), Path::new("/ws/proj/../other.sql"))
            .unwrap_err();
        assert!(matches!(err, CliError::PathOutsideWorkspace { .. }));
        assert!(require_within_root(Path::new("/ws/proj"), Path::new("/ws")).is_err());
        assert!(require_within_root(Path::new("/ws/proj"), Path::new("/")).is_err());
    }

    #[test]
    fn test_require_within_root_is_component_based() {
        assert!(require_within_root(Path::new("/ws/proj"), Path::new("/ws/project2/a")).is_err());
    }

    #[test]
    fn test_contain_within_root_leaves_outsiders_alone() {
        assert_eq!(
            contain_within_root(Path::new("/ws"), Path::new("/ws/a.sql")),
            PathBuf::from("a.sql")
        );
        assert_eq!(
            contain_within_root(Path::new("/ws"), Path::new("/etc/a.sql")),
            PathBuf::from("/etc/a.sql")
        );
    }

    #[test]
    fn test_to_slash() {
        assert_eq!(to_slash(Path::new("/ws/a/b.sql")), "/ws/a/b.sql");
        assert_eq!(to_slash(Path::new("a/b.sql")), "a/b.sql");
    }
}
