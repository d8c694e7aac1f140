//! Tile payload formats.
//!
//! This module covers everything the service needs to know about payload
//! bytes without talking to a replica:
//!
//! - [`detect`]: signature matching for vector tiles, JPEG and PNG
//! - [`codec`]: gzip detection, compression and decompression
//! - [`negotiated`]: the immutable [`NegotiatedFormat`] and the three-state
//!   [`Toggle`] used for configuration overrides

pub mod codec;
pub mod detect;
pub mod negotiated;

pub use codec::{gunzip, gzip, is_gzip, try_gunzip, GZIP_ENCODING};
pub use detect::{detect_content_type, ContentType, OCTET_STREAM};
pub use negotiated::{FormatOverrides, NegotiatedFormat, Toggle};
