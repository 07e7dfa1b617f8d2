use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::paths::{PathError, is_partial_name, local_path_for, partial_path_for};

#[derive(Debug, Error)]
pub enum LocalIndexError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
}

/// Flat view of the regular files directly inside the sync directory.
#[derive(Debug, Clone)]
pub struct LocalFileIndex {
    root: PathBuf,
}

impl LocalFileIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf, PathError> {
        local_path_for(&self.root, name)
    }

    /// Names of regular files in the directory. Subdirectories, partial
    /// download files and names that are not valid UTF-8 are left out.
    pub fn list_names(&self) -> Result<BTreeSet<String>, LocalIndexError> {
        let mut names = BTreeSet::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                tracing::debug!(path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            if is_partial_name(&name) {
                continue;
            }
            // Follows symlinks so a linked file counts as present.
            match std::fs::metadata(entry.path()) {
                Ok(meta) if meta.is_file() => {
                    names.insert(name);
                }
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(names)
    }

    pub fn contains(&self, name: &str) -> bool {
        if is_partial_name(name) {
            return false;
        }
        self.path_for(name)
            .ok()
            .and_then(|path| std::fs::metadata(path).ok())
            .is_some_and(|meta| meta.is_file())
    }

    /// Whether `name` was created or modified at or after `since`. A missing
    /// file or a filesystem without timestamps reports `false`.
    pub fn changed_since(&self, name: &str, since: SystemTime) -> Result<bool, LocalIndexError> {
        let meta = match std::fs::metadata(self.path_for(name)?) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let latest = meta.modified().ok().max(meta.created().ok());
        Ok(latest.is_some_and(|stamp| stamp >= since))
    }

    /// Writes `bytes` as `name` through a hidden partial file so the final
    /// name only ever refers to a complete copy. Returns `false` without
    /// touching anything when a file with that name already exists.
    pub async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<bool, LocalIndexError> {
        let target = self.path_for(name)?;
        if tokio::fs::try_exists(&target).await? {
            return Ok(false);
        }

        let partial = partial_path_for(&target);
        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, io::Error>(())
        }
        .await;
        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err.into());
        }

        if tokio::fs::try_exists(&target).await? {
            tokio::fs::remove_file(&partial).await?;
            return Ok(false);
        }
        if let Err(err) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err.into());
        }
        Ok(true)
    }

    /// Removes `name`; an already missing file is reported as `false`.
    pub async fn remove(&self, name: &str) -> Result<bool, LocalIndexError> {
        let target = self.path_for(name)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes partial files left behind by an interrupted run.
    pub async fn clean_partials(&self) -> Result<usize, LocalIndexError> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !is_partial_name(&name.to_string_lossy()) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }
}
