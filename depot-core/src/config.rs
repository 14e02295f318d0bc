use std::path::PathBuf;
use thiserror::Error;
use url::Url;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Configuration errors
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("MAX_FILE_SIZE must be at least 1 MB")]
    ZeroFileSize,
    #[error("MAX_FILE_SIZE of {0} MB does not fit in a byte count")]
    FileSizeTooLarge(u64),
    #[error("Invalid base URL {0:?}: must start with http:// or https://")]
    InvalidBaseUrl(String),
}

/// Cross-origin mode. Development accepts any origin; production only the
/// configured domains.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable server configuration, built once at startup.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// Prefix of every returned artifact URL, without trailing slash.
    pub base_url: String,
    pub upload_dir: PathBuf,
    pub max_file_size_mb: u64,
    pub mode: Mode,
}

impl ServerConfig {
    /// Validate raw settings. `base_url` defaults to `http://localhost:<port>`.
    pub fn new(
        port: u16,
        base_url: Option<String>,
        upload_dir: impl Into<PathBuf>,
        max_file_size_mb: u64,
        mode: Mode,
    ) -> Result<Self, ConfigError> {
        if max_file_size_mb == 0 {
            return Err(ConfigError::ZeroFileSize);
        }
        if max_file_size_mb.checked_mul(BYTES_PER_MB).is_none() {
            return Err(ConfigError::FileSizeTooLarge(max_file_size_mb));
        }

        let base_url = match base_url {
            Some(url) => {
                let trimmed = url.trim().trim_end_matches('/');
                match Url::parse(trimmed) {
                    Ok(parsed)
                        if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {}
                    _ => return Err(ConfigError::InvalidBaseUrl(url)),
                }
                trimmed.to_string()
            }
            None => format!("http://localhost:{port}"),
        };

        Ok(Self {
            port,
            base_url,
            upload_dir: upload_dir.into(),
            max_file_size_mb,
            mode,
        })
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Public URL of a stored artifact.
    pub fn file_url(&self, filename: &str) -> String {
        format!("{}/files/{filename}", self.base_url)
    }
}
