//! Upload, normalize and serve files from a flat directory.
//!
//! Uploaded raster images are re-encoded to WebP once, at write time. Reads
//! can request a narrower variant, computed per request and never stored.
pub mod config;
pub mod content_type;
pub mod imaging;
pub mod naming;
pub mod normalize;
pub mod retrieval;
pub mod store;
pub mod upload;

pub use config::{ConfigError, Mode, ServerConfig};
pub use content_type::ContentType;
pub use normalize::{Normalization, Normalizer, SweepReport};
pub use retrieval::{RetrievalPipeline, RetrieveError, Retrieved, ServeMode};
pub use store::{FileStore, StoreError, StoredArtifact};
pub use upload::{Descriptor, IncomingFile, UploadError, UploadPipeline};
