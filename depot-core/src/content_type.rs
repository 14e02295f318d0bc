use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Content type of a stored artifact.
///
/// Wraps MIME types as an enum for type-safe comparisons. Artifacts carry no
/// metadata on disk, so the type is always re-derived from the file extension.
#[derive(Clone, Debug, PartialEq)]
pub enum ContentType {
    // Images
    Jpeg,
    Png,
    Gif,
    Webp,
    Svg,
    // Video
    Mp4,
    WebmVideo,
    OggVideo,
    // Documents
    Pdf,
    Doc,
    Docx,
    Xls,
    Xlsx,
    PlainText,
    // Other
    OctetStream,
    Other(String),
}

impl ContentType {
    /// MIME type string (e.g., "image/webp", "application/pdf").
    pub fn as_str(&self) -> &str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Svg => "image/svg+xml",
            Self::Mp4 => "video/mp4",
            Self::WebmVideo => "video/webm",
            Self::OggVideo => "video/ogg",
            Self::Pdf => "application/pdf",
            Self::Doc => "application/msword",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Xls => "application/vnd.ms-excel",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::PlainText => "text/plain",
            Self::OctetStream => "application/octet-stream",
            Self::Other(s) => s,
        }
    }

    /// Parse from a MIME type string, as declared by an uploading client.
    pub fn from_mime(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Self::Jpeg,
            "image/png" => Self::Png,
            "image/gif" => Self::Gif,
            "image/webp" => Self::Webp,
            "image/svg+xml" => Self::Svg,
            "video/mp4" => Self::Mp4,
            "video/webm" => Self::WebmVideo,
            "video/ogg" => Self::OggVideo,
            "application/pdf" => Self::Pdf,
            "application/msword" => Self::Doc,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Self::Docx,
            "application/vnd.ms-excel" => Self::Xls,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Self::Xlsx,
            "text/plain" => Self::PlainText,
            "application/octet-stream" => Self::OctetStream,
            other => Self::Other(other.to_string()),
        }
    }

    /// Map a file extension (without the dot) to its content type.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Self::Jpeg,
            "png" => Self::Png,
            "gif" => Self::Gif,
            "webp" => Self::Webp,
            "svg" => Self::Svg,
            "mp4" => Self::Mp4,
            "webm" => Self::WebmVideo,
            "ogg" => Self::OggVideo,
            "pdf" => Self::Pdf,
            "doc" => Self::Doc,
            "docx" => Self::Docx,
            "xls" => Self::Xls,
            "xlsx" => Self::Xlsx,
            "txt" => Self::PlainText,
            _ => Self::OctetStream,
        }
    }

    /// Content type of a stored artifact, from the extension of its name.
    pub fn from_file_name(name: &str) -> Self {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => Self::from_extension(ext),
            _ => Self::OctetStream,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(
            self,
            Self::Jpeg | Self::Png | Self::Gif | Self::Webp | Self::Svg
        ) || matches!(self, Self::Other(s) if s.starts_with("image/"))
    }

    /// Images made of pixels. SVG is the one vector format and is excluded.
    pub fn is_raster_image(&self) -> bool {
        self.is_image() && !self.as_str().contains("svg")
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ContentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContentType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ContentType::from_mime(&s))
    }
}
