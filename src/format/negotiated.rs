//! The response contract negotiated at startup.

use std::fmt;

use serde::Serialize;

use super::codec::GZIP_ENCODING;
use super::detect::ContentType;
use crate::error::ProbeError;

// =============================================================================
// Toggle
// =============================================================================

/// A setting that is either auto-detected or explicitly forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Toggle {
    /// Decide from the startup probe
    #[default]
    Auto,

    /// Explicitly enabled
    On,

    /// Explicitly disabled
    Off,
}

impl Toggle {
    /// The explicit value, if any.
    pub fn explicit(self) -> Option<bool> {
        match self {
            Toggle::Auto => None,
            Toggle::On => Some(true),
            Toggle::Off => Some(false),
        }
    }

    /// Resolve against a detected value.
    pub fn resolve(self, detected: bool) -> bool {
        self.explicit().unwrap_or(detected)
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Toggle::Auto => "auto",
            Toggle::On => "on",
            Toggle::Off => "off",
        })
    }
}

// =============================================================================
// Overrides
// =============================================================================

/// Explicit format settings from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatOverrides {
    /// Forced content type; wins over detection
    pub content_type: Option<ContentType>,

    /// Whether to gzip uncompressed payloads
    pub compress: Toggle,

    /// Whether the lookup returns a second key column
    pub key_column: Toggle,

    /// Forced `Content-Encoding` header value; an empty string suppresses it
    pub content_encoding: Option<String>,
}

// =============================================================================
// NegotiatedFormat
// =============================================================================

/// Immutable description of what the lookup returns and how it is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub content_type: ContentType,
    pub has_key_column: bool,
    pub source_precompressed: bool,
    pub should_compress: bool,
    pub content_encoding: Option<String>,
}

impl NegotiatedFormat {
    /// Build the format purely from configuration, for when probing is disabled.
    ///
    /// Both the key column and compression must be explicit; nothing else can
    /// tell us the shape of the response.
    pub fn from_overrides(overrides: &FormatOverrides) -> Result<Self, ProbeError> {
        let has_key_column = overrides
            .key_column
            .explicit()
            .ok_or(ProbeError::MissingExplicit {
                setting: "key column presence",
            })?;
        let should_compress = overrides
            .compress
            .explicit()
            .ok_or(ProbeError::MissingExplicit {
                setting: "compression",
            })?;

        let content_type = overrides
            .content_type
            .clone()
            .unwrap_or(ContentType::Vector);

        Ok(Self {
            content_type,
            has_key_column,
            source_precompressed: false,
            should_compress,
            content_encoding: resolve_content_encoding(overrides, should_compress),
        })
    }

    /// Whether served payloads are gzip streams.
    pub fn serves_compressed(&self) -> bool {
        self.source_precompressed || self.should_compress
    }

    /// Number of columns every lookup row must have.
    pub fn column_count(&self) -> usize {
        if self.has_key_column {
            2
        } else {
            1
        }
    }
}

impl Serialize for NegotiatedFormat {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("NegotiatedFormat", 5)?;
        state.serialize_field("content_type", self.content_type.mime())?;
        state.serialize_field("has_key_column", &self.has_key_column)?;
        state.serialize_field("source_precompressed", &self.source_precompressed)?;
        state.serialize_field("should_compress", &self.should_compress)?;
        state.serialize_field("content_encoding", &self.content_encoding)?;
        state.end()
    }
}

/// Pick the `Content-Encoding` header: the configured value if any,
/// otherwise `gzip` when the served payload is compressed.
pub(crate) fn resolve_content_encoding(
    overrides: &FormatOverrides,
    serves_compressed: bool,
) -> Option<String> {
    match &overrides.content_encoding {
        Some(forced) if forced.is_empty() => None,
        Some(forced) => Some(forced.clone()),
        None if serves_compressed => Some(GZIP_ENCODING.to_string()),
        None => None,
    }
}
