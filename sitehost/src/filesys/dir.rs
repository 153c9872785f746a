//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::errors::HostError;

/// A directory wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Check if the directory has no entries
    pub async fn is_empty(&self) -> Result<bool, HostError> {
        let mut entries = fs::read_dir(&self.path).await?;
        Ok(entries.next_entry().await?.is_none())
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), HostError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), HostError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// Delete the directory tree, making read-only entries writable and
    /// retrying when the first attempt fails
    pub async fn delete_forced(&self) -> Result<(), HostError> {
        if fs::symlink_metadata(&self.path).await.is_err() {
            return Ok(());
        }

        match fs::remove_dir_all(&self.path).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!("Removing {} failed ({}), forcing write permission", self.path.display(), e);
            }
        }

        let root = self.path.clone();
        tokio::task::spawn_blocking(move || make_tree_writable(&root))
            .await
            .map_err(|e| HostError::Internal(format!("permission fix-up task failed: {e}")))?;

        fs::remove_dir_all(&self.path).await?;
        Ok(())
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> crate::filesys::file::File {
        crate::filesys::file::File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}

fn make_tree_writable(root: &Path) {
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if entry.path_is_symlink() {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let mut perms = meta.permissions();
        if !perms.readonly() {
            continue;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(perms.mode() | 0o700);
        }
        #[cfg(not(unix))]
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);

        if let Err(e) = std::fs::set_permissions(entry.path(), perms) {
            debug!("Could not make {} writable: {}", entry.path().display(), e);
        }
    }
}
