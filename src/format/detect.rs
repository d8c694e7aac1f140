//! Payload signature detection.
//!
//! Tiles are classified by their leading bytes, checked in this order:
//!
//! - **Vector tile**: Mapbox Vector Tile protobuf, which starts with the
//!   `layers` field tag (field 3, length-delimited) `0x1A`
//! - **JPEG**: `FF D8 FF`
//! - **PNG**: `89 50 4E 47 0D 0A 1A 0A`
//!
//! Anything else is left undetermined.

use std::fmt;
use std::str::FromStr;

/// Leading byte of a Mapbox Vector Tile.
pub const MVT_LEADING_BYTE: u8 = 0x1A;

/// JPEG start-of-image marker followed by a segment marker.
pub const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

/// PNG file signature.
pub const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// MIME type used when nothing better is known.
pub const OCTET_STREAM: &str = "application/octet-stream";

// =============================================================================
// ContentType
// =============================================================================

/// Content type of the served tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    /// Mapbox Vector Tile (protobuf)
    Vector,

    /// JPEG image
    Jpeg,

    /// PNG image
    Png,

    /// Any other MIME type, served verbatim
    Custom(String),
}

impl ContentType {
    /// MIME type sent in the `Content-Type` header.
    pub fn mime(&self) -> &str {
        match self {
            ContentType::Vector => "application/x-protobuf",
            ContentType::Jpeg => "image/jpeg",
            ContentType::Png => "image/png",
            ContentType::Custom(mime) => mime,
        }
    }

    /// Short format name, as used in TileJSON `format`.
    pub fn format_name(&self) -> &str {
        match self {
            ContentType::Vector => "pbf",
            ContentType::Jpeg => "jpg",
            ContentType::Png => "png",
            ContentType::Custom(mime) => mime,
        }
    }

    /// Image formats are already compressed and are never gzipped.
    pub fn is_image(&self) -> bool {
        match self {
            ContentType::Jpeg | ContentType::Png => true,
            ContentType::Vector => false,
            ContentType::Custom(mime) => mime.starts_with("image/"),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "" => Err("content type must not be empty".to_string()),
            "pbf" | "mvt" | "vector" | "application/x-protobuf"
            | "application/vnd.mapbox-vector-tile" => Ok(ContentType::Vector),
            "jpg" | "jpeg" | "image/jpeg" => Ok(ContentType::Jpeg),
            "png" | "image/png" => Ok(ContentType::Png),
            _ => Ok(ContentType::Custom(value.to_string())),
        }
    }
}

// =============================================================================
// Detection
// =============================================================================

/// Detect the content type from the leading bytes of a (decompressed) payload.
///
/// Returns `None` when no known signature matches.
pub fn detect_content_type(data: &[u8]) -> Option<ContentType> {
    if data.first() == Some(&MVT_LEADING_BYTE) {
        Some(ContentType::Vector)
    } else if data.starts_with(JPEG_MAGIC) {
        Some(ContentType::Jpeg)
    } else if data.starts_with(PNG_MAGIC) {
        Some(ContentType::Png)
    } else {
        None
    }
}
