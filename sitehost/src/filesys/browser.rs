//! Browsing and editing a project's tree
//!
//! Every path goes through [`PathSandbox`]. Listing and reading share the
//! project with other readers; saving claims it like a deploy does.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::errors::HostError;
use crate::filesys::file::File;
use crate::filesys::sandbox::PathSandbox;
use crate::locks::ProjectLocks;
use crate::models::project::Project;
use crate::storage::layout::HostingLayout;

/// One listed directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,

    /// Relative to the project root, `/`-separated
    pub path: String,

    pub is_dir: bool,

    /// Bytes; 0 for directories
    pub size: u64,
}

/// Largest file that can be opened or saved
pub const MAX_EDITABLE_BYTES: u64 = 1024 * 1024;

pub struct FileBrowser {
    layout: HostingLayout,
    locks: Arc<ProjectLocks>,
}

impl FileBrowser {
    pub fn new(layout: HostingLayout, locks: Arc<ProjectLocks>) -> Self {
        Self { layout, locks }
    }

    /// List `subpath` under the project root: directories first, then
    /// case-insensitive by name
    pub async fn list_files(
        &self,
        project: &Project,
        subpath: &str,
    ) -> Result<Vec<FileEntry>, HostError> {
        let _guard = self.locks.try_shared(&project.name)?;

        let (root, target) = self.sandbox(project).resolve_async(subpath).await?;
        let meta = stat(&target, subpath).await?;
        if !meta.is_dir() {
            return Err(HostError::NotADirectory(subpath.to_string()));
        }

        let mut items = Vec::new();
        let mut entries = fs::read_dir(&target).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            // Follow links like a plain stat; fall back to the link itself when dangling
            let meta = match fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(_) => fs::symlink_metadata(&path).await?,
            };
            let is_dir = meta.is_dir();
            items.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: relative_slash_path(&root, &path),
                is_dir,
                size: if meta.is_file() { meta.len() } else { 0 },
            });
        }

        items.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        debug!("Listed {} entries under {}/{}", items.len(), project.name, subpath);
        Ok(items)
    }

    /// Contents of a text file under the project root
    pub async fn read_file(&self, project: &Project, subpath: &str) -> Result<String, HostError> {
        let _guard = self.locks.try_shared(&project.name)?;

        let target = self.editable_target(project, subpath).await?;
        let bytes = fs::read(&target).await?;
        String::from_utf8(bytes)
            .map_err(|_| HostError::NotEditable(format!("{subpath} is not UTF-8 text")))
    }

    /// Replace the contents of an existing file, keeping its permissions.
    ///
    /// Waits for current readers like a deploy would, and is refused while a
    /// deploy or removal holds the project.
    pub async fn save_file(
        &self,
        project: &Project,
        subpath: &str,
        contents: &str,
    ) -> Result<(), HostError> {
        if contents.len() as u64 > MAX_EDITABLE_BYTES {
            return Err(HostError::NotEditable(format!(
                "{} bytes exceeds the {} byte limit",
                contents.len(),
                MAX_EDITABLE_BYTES
            )));
        }
        let _guard = self.locks.exclusive(&project.name).await?;

        let target = self.editable_target(project, subpath).await?;
        let permissions = fs::metadata(&target).await?.permissions();
        File::new(&target).write_atomic(contents.as_bytes()).await?;
        fs::set_permissions(&target, permissions).await?;

        info!("Saved {}/{} ({} bytes)", project.name, subpath, contents.len());
        Ok(())
    }

    fn sandbox(&self, project: &Project) -> PathSandbox {
        PathSandbox::new(self.layout.project_dir(project).path())
    }

    /// Resolve an existing regular file small enough to edit
    async fn editable_target(&self, project: &Project, subpath: &str) -> Result<PathBuf, HostError> {
        let (_, target) = self.sandbox(project).resolve_async(subpath).await?;
        let meta = stat(&target, subpath).await?;
        if !meta.is_file() {
            return Err(HostError::NotAFile(subpath.to_string()));
        }
        if meta.len() > MAX_EDITABLE_BYTES {
            return Err(HostError::NotEditable(format!(
                "{subpath} is {} bytes, the limit is {MAX_EDITABLE_BYTES}",
                meta.len()
            )));
        }
        Ok(target)
    }
}

async fn stat(target: &Path, subpath: &str) -> Result<std::fs::Metadata, HostError> {
    match fs::metadata(target).await {
        Ok(meta) => Ok(meta),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(HostError::NotFound(subpath.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
