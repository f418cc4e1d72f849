/// File-system side effects for create, edit, move and remove actions.
/// Paths arrive already resolved and contained by `paths::resolve`.
use std::fs;
use std::path::Path;

use crate::error::ExecutionError;

/// Write `content` in full, creating parent directories as needed.
pub fn write_file(
    target: &Path,
    shown: &str,
    content: &str,
    verb: &str,
) -> Result<String, ExecutionError> {
    ensure_parent(target, shown)?;
    fs::write(target, content).map_err(|e| ExecutionError::io("write", shown, e))?;

    let line_count = content.lines().count();
    let done = if verb == "Edit" { "Updated" } else { "Created" };
    Ok(format!("{done} {shown} ({line_count} lines)"))
}

/// Rename a file or directory; the destination's parent is created if missing.
pub fn move_path(
    from: &Path,
    to: &Path,
    from_shown: &str,
    to_shown: &str,
) -> Result<String, ExecutionError> {
    if !from.exists() {
        return Err(ExecutionError::Missing(from_shown.to_string()));
    }
    ensure_parent(to, to_shown)?;
    fs::rename(from, to).map_err(|e| ExecutionError::io("move", from_shown, e))?;
    Ok(format!("Moved {from_shown} to {to_shown}"))
}

/// Delete a file or an empty directory.
pub fn remove_path(target: &Path, shown: &str) -> Result<String, ExecutionError> {
    let meta = fs::symlink_metadata(target)
        .map_err(|_| ExecutionError::Missing(shown.to_string()))?;

    if meta.is_dir() {
        fs::remove_dir(target).map_err(|e| ExecutionError::io("remove", shown, e))?;
        Ok(format!("Removed directory {shown}"))
    } else {
        fs::remove_file(target).map_err(|e| ExecutionError::io("remove", shown, e))?;
        Ok(format!("Removed {shown}"))
    }
}

fn ensure_parent(target: &Path, shown: &str) -> Result<(), ExecutionError> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| ExecutionError::io("create directories for", shown, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_reports_line_count() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c.txt");
        let msg = write_file(&target, "a/b/c.txt", "one\ntwo\n", "Create").unwrap();
        assert_eq!(msg, "Created a/b/c.txt (2 lines)");
        let msg = write_file(&target, "a/b/c.txt", "one\n", "Edit").unwrap();
        assert_eq!(msg, "Updated a/b/c.txt (1 lines)");
    }

    #[test]
    fn test_remove_only_empty_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("build");
        fs::create_dir_all(sub.join("deep")).unwrap();

        let err = remove_path(&sub, "build").unwrap_err();
        assert!(matches!(err, ExecutionError::Io { op: "remove", .. }));
        assert!(sub.exists());

        let msg = remove_path(&sub.join("deep"), "build/deep").unwrap();
        assert_eq!(msg, "Removed directory build/deep");
        assert!(!sub.join("deep").exists());
    }

    #[test]
    fn test_move_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = move_path(
            &dir.path().join("nope"),
            &dir.path().join("there"),
            "nope",
            "there",
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::Missing(ref p) if p == "nope"));
    }
}
