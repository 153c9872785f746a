//! Sandboxed resolution of user-supplied paths under a project root

use std::path::{Component, Path, PathBuf};

use crate::errors::HostError;

/// A root directory that resolved paths may never escape
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `subpath` against the root.
    ///
    /// The lexical form is checked before the filesystem is touched, so `..`
    /// traversal is refused without any I/O. The canonical form is checked
    /// next, which catches symlinks pointing outside the root. Returns the
    /// canonical root and the canonical target; a target that does not exist
    /// yields `NotFound` once its nearest existing ancestor is known to be
    /// inside the root.
    pub fn resolve(&self, subpath: &str) -> Result<(PathBuf, PathBuf), HostError> {
        let relative = normalize_relative(subpath)
            .ok_or_else(|| HostError::PathSecurityViolation(subpath.to_string()))?;

        let root = std::fs::canonicalize(&self.root).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                HostError::NotFound(self.root.display().to_string())
            }
            _ => HostError::IoError(e),
        })?;

        let target = root.join(&relative);
        match std::fs::canonicalize(&target) {
            Ok(canonical) => {
                if !canonical.starts_with(&root) {
                    return Err(HostError::PathSecurityViolation(subpath.to_string()));
                }
                Ok((root, canonical))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // A dangling link or a missing child of a link may still point outside
                let mut ancestor = target.parent();
                while let Some(dir) = ancestor {
                    if let Ok(canonical) = std::fs::canonicalize(dir) {
                        if !canonical.starts_with(&root) {
                            return Err(HostError::PathSecurityViolation(subpath.to_string()));
                        }
                        break;
                    }
                    ancestor = dir.parent();
                }
                if let Ok(link) = std::fs::read_link(&target) {
                    let pointee = target.parent().unwrap_or(root.as_path()).join(link);
                    if normalize_absolute(&pointee).map_or(true, |p| !p.starts_with(&root)) {
                        return Err(HostError::PathSecurityViolation(subpath.to_string()));
                    }
                }
                Err(HostError::NotFound(subpath.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// [`resolve`](Self::resolve) on the blocking pool, for async callers
    pub async fn resolve_async(&self, subpath: &str) -> Result<(PathBuf, PathBuf), HostError> {
        let sandbox = self.clone();
        let subpath = subpath.to_string();
        tokio::task::spawn_blocking(move || sandbox.resolve(&subpath))
            .await
            .map_err(|e| HostError::Internal(format!("path resolution task failed: {e}")))?
    }
}

/// Lexically normalize a relative path; `None` if it is absolute or climbs
/// above its starting point
fn normalize_relative(subpath: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(subpath).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.iter().collect())
}

fn normalize_absolute(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    Some(normalized)
}
