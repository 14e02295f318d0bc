//! Re-encoding of uploaded raster images into the canonical WebP format.
//!
//! Normalization swaps the encoding of one artifact: the WebP copy is written
//! under the same stem with a `.webp` extension, then the original is deleted.
//! Failures are never fatal; callers keep the original artifact.
use crate::content_type::ContentType;
use crate::imaging::{self, ImagingError};
use crate::naming;
use crate::store::{FileStore, StoreError, StoredArtifact};
use thiserror::Error;
use tracing::{info, warn};

/// Extension of the canonical storage format.
pub const CANONICAL_EXTENSION: &str = "webp";

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Imaging(#[from] ImagingError),
    #[error("Image task failed: {0}")]
    Task(String),
}

/// How a normalization attempt ended.
#[derive(Debug)]
pub enum Normalization {
    /// The artifact now lives under a new name in the canonical format.
    Converted(StoredArtifact),
    /// Already canonical; nothing to do.
    Skipped,
    /// Re-encoding failed and the original artifact was kept.
    Fallback(NormalizeError),
}

/// Whether an artifact name already carries the canonical extension.
pub fn is_canonical(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(CANONICAL_EXTENSION))
        .unwrap_or(false)
}

#[derive(Clone, Debug)]
pub struct Normalizer {
    store: FileStore,
}

impl Normalizer {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    /// Normalize a stored artifact, absorbing any failure into `Fallback`.
    pub async fn normalize(&self, name: &str) -> Normalization {
        if is_canonical(name) {
            return Normalization::Skipped;
        }
        match self.convert(name).await {
            Ok(artifact) => Normalization::Converted(artifact),
            Err(e) => {
                warn!("WebP conversion of {name} failed, keeping original: {e}");
                Normalization::Fallback(e)
            }
        }
    }

    async fn convert(&self, name: &str) -> Result<StoredArtifact, NormalizeError> {
        let original = self.store.read(name).await?;
        let original_size = original.len();

        let encoded = tokio::task::spawn_blocking(move || {
            let image = imaging::decode(&original)?;
            imaging::encode_webp(&image)
        })
        .await
        .map_err(|e| NormalizeError::Task(e.to_string()))??;

        let webp_name = naming::with_extension(name, CANONICAL_EXTENSION);
        self.store.write_bytes(&webp_name, &encoded).await?;

        if let Err(e) = self.store.delete(name).await {
            // Never leave two live artifacts for one upload.
            let _ = self.store.delete(&webp_name).await;
            return Err(e.into());
        }

        let size_bytes = self.store.stat(&webp_name).await?;
        info!("Image converted to WebP: {name} -> {webp_name} ({original_size} -> {size_bytes} bytes)");

        Ok(StoredArtifact {
            name: webp_name,
            size_bytes,
            content_type: ContentType::Webp,
        })
    }
}

/// Totals from a [`sweep`] over the whole store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Normalize every stored raster image that is not yet canonical.
///
/// Artifacts whose WebP name is already taken are skipped rather than
/// overwritten.
pub async fn sweep(normalizer: &Normalizer) -> Result<SweepReport, StoreError> {
    let store = &normalizer.store;
    let names = store.list().await?;
    let mut report = SweepReport::default();

    let candidates: Vec<&String> = names
        .iter()
        .filter(|name| ContentType::from_file_name(name).is_raster_image() && !is_canonical(name))
        .collect();
    info!("Found {} files to normalize", candidates.len());

    for name in candidates {
        let target = naming::with_extension(name, CANONICAL_EXTENSION);
        if store.exists(&target).await {
            warn!("{target} already exists, skipping {name}");
            report.skipped += 1;
            continue;
        }
        match normalizer.normalize(name).await {
            Normalization::Converted(_) => report.converted += 1,
            Normalization::Skipped => report.skipped += 1,
            Normalization::Fallback(_) => report.failed += 1,
        }
    }

    Ok(report)
}
