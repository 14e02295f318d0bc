//! Upload pipeline: name, store, normalize, describe.
use crate::config::ServerConfig;
use crate::content_type::ContentType;
use crate::naming;
use crate::normalize::{Normalization, Normalizer};
use crate::store::{FileStore, StoreError};
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Names tried per upload before giving up on collisions.
const MAX_NAME_ATTEMPTS: u32 = 5;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file provided")]
    NoFile,
    #[error("File too large. Maximum size is {max_mb}MB")]
    TooLarge { max_mb: u64 },
    #[error("{0}")]
    Malformed(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// A single file received from a client.
pub struct IncomingFile<S> {
    /// Client-supplied filename. Only its extension reaches the store.
    pub original_name: String,
    /// MIME type declared by the client, if any.
    pub declared_type: Option<String>,
    pub body: S,
}

/// What a client gets back for a stored upload.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub url: String,
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    pub media_type: ContentType,
}

#[derive(Clone)]
pub struct UploadPipeline {
    config: Arc<ServerConfig>,
    store: FileStore,
    normalizer: Normalizer,
}

impl UploadPipeline {
    pub fn new(config: Arc<ServerConfig>, store: FileStore) -> Self {
        let normalizer = Normalizer::new(store.clone());
        Self {
            config,
            store,
            normalizer,
        }
    }

    pub async fn upload<S, E>(&self, file: Option<IncomingFile<S>>) -> Result<Descriptor, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        self.upload_at(file, naming::now_millis()).await
    }

    /// [`upload`](Self::upload) with an explicit receive time.
    pub async fn upload_at<S, E>(
        &self,
        file: Option<IncomingFile<S>>,
        now_ms: i64,
    ) -> Result<Descriptor, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let Some(mut file) = file else {
            return Err(UploadError::NoFile);
        };

        let (name, size) = self.store_incoming(&mut file, now_ms).await?;

        let media_type = match file.declared_type.as_deref().map(str::trim) {
            Some(declared) if !declared.is_empty() => ContentType::from_mime(declared),
            _ => ContentType::from_file_name(&name),
        };
        debug!("Stored upload {} as {name} ({size} bytes, {media_type})", file.original_name);

        let (filename, size, media_type) = if media_type.is_raster_image() {
            match self.normalizer.normalize(&name).await {
                Normalization::Converted(artifact) => {
                    (artifact.name, artifact.size_bytes, artifact.content_type)
                }
                // Kept artifacts are served by extension, so describe them that way.
                Normalization::Skipped | Normalization::Fallback(_) => {
                    let served_type = ContentType::from_file_name(&name);
                    (name, size, served_type)
                }
            }
        } else {
            (name, size, media_type)
        };

        info!("Upload complete: {} -> {filename} ({size} bytes)", file.original_name);

        Ok(Descriptor {
            url: self.config.file_url(&filename),
            filename,
            original_name: file.original_name,
            size,
            media_type,
        })
    }

    /// Write the body under a fresh name, re-salting on collision.
    async fn store_incoming<S, E>(
        &self,
        file: &mut IncomingFile<S>,
        now_ms: i64,
    ) -> Result<(String, u64), UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let max_bytes = self.config.max_file_size_bytes();
        let mut last_collision = None;

        for salt in 0..MAX_NAME_ATTEMPTS {
            let name = naming::generate_salted_name(&file.original_name, now_ms, salt);
            match self.store.write(&name, &mut file.body, max_bytes).await {
                Ok(size) => return Ok((name, size)),
                Err(StoreError::AlreadyExists(taken)) => {
                    warn!("Generated name {taken} already in use, retrying");
                    last_collision = Some(taken);
                }
                Err(StoreError::SizeExceeded { .. }) => {
                    return Err(UploadError::TooLarge {
                        max_mb: self.config.max_file_size_mb,
                    });
                }
                Err(StoreError::Incoming(reason)) => return Err(UploadError::Malformed(reason)),
                Err(e) => return Err(e.into()),
            }
        }

        let taken = last_collision.unwrap_or_default();
        Err(StoreError::AlreadyExists(taken).into())
    }
}
