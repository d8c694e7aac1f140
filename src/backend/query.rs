use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BackendError;

/// A single value returned by the tile lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    /// SQL NULL
    Null,

    /// Binary payload (`bytea`)
    Bytes(Bytes),

    /// Textual value (`text`, `varchar`, ...)
    Text(String),

    /// Any other column type, recorded by its type name
    Other(String),
}

impl ColumnValue {
    /// View the value as raw bytes.
    ///
    /// Text is accepted as well so that lookups returning the payload as a
    /// string still produce a usable tile.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ColumnValue::Bytes(b) => Some(b),
            ColumnValue::Text(s) => Some(s.as_bytes()),
            ColumnValue::Null | ColumnValue::Other(_) => None,
        }
    }

    /// View the value as a string.
    ///
    /// Binary values are accepted when they hold valid UTF-8, so a key
    /// column stored as `bytea` reads the same as one stored as `text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(s) => Some(s),
            ColumnValue::Bytes(b) => std::str::from_utf8(b).ok(),
            ColumnValue::Null | ColumnValue::Other(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

/// One row returned by the tile lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRow {
    pub columns: Vec<ColumnValue>,
}

impl TileRow {
    pub fn new(columns: Vec<ColumnValue>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ColumnValue> {
        self.columns.get(index)
    }
}

/// Capability to execute the tile lookup against one replica.
///
/// Implementations own their connection pool. They must be safe to call
/// concurrently and must fail with [`BackendError::Closed`] once closed.
#[async_trait]
pub trait TileBackend: Send + Sync {
    /// Run the lookup with `(z, x, y)` as positional arguments.
    async fn query_tile(&self, z: u32, x: u32, y: u32) -> Result<Vec<TileRow>, BackendError>;

    /// Close the underlying pool. Calling this more than once is a no-op.
    async fn close(&self);

    /// Whether [`close`](TileBackend::close) has been called.
    fn is_closed(&self) -> bool;

    /// Address used in logs (credentials removed).
    fn address(&self) -> &str;
}
