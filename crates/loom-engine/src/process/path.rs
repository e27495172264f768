use std::path::{Component, Path, PathBuf};

use super::ProcessError;

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn canonical_or_normalized(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| normalize(path))
}

/// Working directory for a spawn: `requested` (relative to the root when not
/// absolute) or the root itself. Anything outside the root is rejected.
pub fn resolve_working_directory(
    project_root: &Path,
    requested: Option<&Path>,
) -> Result<PathBuf, ProcessError> {
    let root = if project_root.is_absolute() {
        project_root.to_path_buf()
    } else {
        std::env::current_dir()?.join(project_root)
    };
    let root = canonical_or_normalized(&normalize(&root));

    let candidate = match requested {
        None => return Ok(root),
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => root.join(p),
    };
    let candidate = canonical_or_normalized(&normalize(&candidate));

    if candidate.starts_with(&root) {
        Ok(candidate)
    } else {
        Err(ProcessError::AccessDenied {
            path: candidate,
            root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_handles_dots() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn defaults_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_working_directory(dir.path(), None).unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn relative_subdirectory_allowed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let resolved = resolve_working_directory(dir.path(), Some(Path::new("sub"))).unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("sub"));
    }

    #[test]
    fn parent_escape_denied() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_working_directory(dir.path(), Some(Path::new("../"))).unwrap_err();
        assert!(matches!(err, ProcessError::AccessDenied { .. }));
    }

    #[test]
    fn absolute_outside_denied() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let err = resolve_working_directory(dir.path(), Some(other.path())).unwrap_err();
        assert!(matches!(err, ProcessError::AccessDenied { .. }));
    }

    #[test]
    fn sibling_with_shared_prefix_denied() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("proj");
        let sibling = parent.path().join("proj-other");
        std::fs::create_dir(&root).unwrap();
        std::fs::create_dir(&sibling).unwrap();
        let err = resolve_working_directory(&root, Some(&sibling)).unwrap_err();
        assert!(matches!(err, ProcessError::AccessDenied { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_denied() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let err = resolve_working_directory(dir.path(), Some(Path::new("link"))).unwrap_err();
        assert!(matches!(err, ProcessError::AccessDenied { .. }));
    }

    #[test]
    fn missing_subdirectory_inside_root_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_working_directory(dir.path(), Some(Path::new("not/yet"))).unwrap();
        assert!(resolved.ends_with("not/yet"));
    }
}
