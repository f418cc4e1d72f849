/// Project-root containment for model-supplied paths.
use std::path::{Component, Path, PathBuf};

use crate::error::ValidationError;

/// Resolve `raw` against `root`, returning the absolute target and the
/// root-relative form used in prompts and messages.
///
/// Rejects empty paths, absolute paths outside the root, `..` segments that climb
/// above it, and symlinked ancestors that point elsewhere.
pub fn resolve(root: &Path, raw: &str) -> Result<(PathBuf, String), ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::EmptyPath);
    }

    let candidate = Path::new(raw);
    let relative: PathBuf = if candidate.is_absolute() {
        let normal = normalize_absolute(candidate);
        let root_normal = normalize_absolute(root);
        match normal.strip_prefix(&root_normal) {
            Ok(rest) => rest.to_path_buf(),
            Err(_) => return Err(ValidationError::OutsideProject(raw.to_string())),
        }
    } else {
        candidate.to_path_buf()
    };

    let mut parts: Vec<String> = Vec::new();
    for comp in relative.components() {
        match comp {
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(ValidationError::OutsideProject(raw.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ValidationError::OutsideProject(raw.to_string()));
            }
        }
    }
    if parts.is_empty() {
        return Err(ValidationError::EmptyPath);
    }

    let target = parts.iter().fold(root.to_path_buf(), |acc, p| acc.join(p));
    if escapes_via_symlink(root, &target) {
        return Err(ValidationError::OutsideProject(raw.to_string()));
    }

    Ok((target, parts.join("/")))
}

fn normalize_absolute(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor and make sure it still lives under
/// the canonical root.
fn escapes_via_symlink(root: &Path, target: &Path) -> bool {
    let Ok(canon_root) = root.canonicalize() else {
        // Root not created yet: nothing below it can be a symlink
        return false;
    };
    let mut probe = target;
    loop {
        if probe.exists() {
            return match probe.canonicalize() {
                Ok(canon) => !canon.starts_with(&canon_root),
                Err(_) => true,
            };
        }
        match probe.parent() {
            Some(parent) => probe = parent,
            None => return false,
        }
    }
}
