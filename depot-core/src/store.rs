//! Flat, directory-backed artifact store.
//!
//! Every artifact is a regular file directly under the store root, addressed
//! by its generated name. There are no subdirectories and no sidecar files.
use crate::content_type::ContentType;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid artifact name: {0:?}")]
    InvalidName(String),
    #[error("Artifact not found: {0}")]
    NotFound(String),
    #[error("Artifact already exists: {0}")]
    AlreadyExists(String),
    #[error("Stream exceeded the {limit} byte limit")]
    SizeExceeded { limit: u64 },
    #[error("Incoming stream failed: {0}")]
    Incoming(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stored artifact as seen after the last write to it.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredArtifact {
    pub name: String,
    pub size_bytes: u64,
    pub content_type: ContentType,
}

/// Resolve the on-disk path of an artifact.
///
/// Rejects anything that could escape the store root or address a hidden file.
pub fn resolve_path(dir: &Path, name: &str) -> Result<PathBuf, StoreError> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(dir.join(name))
}

#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!("Opened file store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> Result<PathBuf, StoreError> {
        resolve_path(&self.root, name)
    }

    /// Stream `body` into a new artifact, returning the number of bytes written.
    ///
    /// The destination is created exclusively: an existing name fails with
    /// `AlreadyExists` before the stream is polled. When the stream exceeds
    /// `max_bytes` or yields an error, the partial file is removed.
    pub async fn write<S, E>(&self, name: &str, body: S, max_bytes: u64) -> Result<u64, StoreError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let path = self.path_of(name)?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StoreError::AlreadyExists(name.to_string()),
                _ => StoreError::Io(e),
            })?;

        match copy_capped(file, body, max_bytes).await {
            Ok(written) => Ok(written),
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove partial artifact {name}: {remove_err}");
                }
                Err(e)
            }
        }
    }

    /// Write an in-memory buffer to a new artifact (exclusive create).
    pub async fn write_bytes(&self, name: &str, data: &[u8]) -> Result<u64, StoreError> {
        let path = self.path_of(name)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StoreError::AlreadyExists(name.to_string()),
                _ => StoreError::Io(e),
            })?;

        if let Err(e) = write_all_and_flush(&mut file, data).await {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
        Ok(data.len() as u64)
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_of(name)?;
        tokio::fs::read(&path).await.map_err(|e| not_found_or_io(name, e))
    }

    pub async fn exists(&self, name: &str) -> bool {
        match self.path_of(name) {
            Ok(path) => tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Delete an artifact. Succeeds when it is already gone.
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_of(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Size in bytes of a stored artifact.
    pub async fn stat(&self, name: &str) -> Result<u64, StoreError> {
        let path = self.path_of(name)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(name, e))?;
        if !meta.is_file() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(meta.len())
    }

    /// Names of all artifacts, sorted.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if resolve_path(&self.root, name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

async fn copy_capped<S, E>(
    mut file: tokio::fs::File,
    mut body: S,
    max_bytes: u64,
) -> Result<u64, StoreError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| StoreError::Incoming(e.to_string()))?;
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(StoreError::SizeExceeded { limit: max_bytes });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(written)
}

async fn write_all_and_flush(file: &mut tokio::fs::File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data).await?;
    file.flush().await
}

fn not_found_or_io(name: &str, e: std::io::Error) -> StoreError {
    if e.kind() == ErrorKind::NotFound {
        StoreError::NotFound(name.to_string())
    } else {
        StoreError::Io(e)
    }
}
