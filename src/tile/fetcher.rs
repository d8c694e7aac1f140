//! Per-request tile lookup and validation.

use bytes::Bytes;
use tracing::warn;

use super::coord::{CoordinateValidator, TileCoord};
use crate::backend::{ColumnValue, TileBackend, TileRow};
use crate::error::{BackendError, TileError};
use crate::format::{gzip, try_gunzip, NegotiatedFormat};
use crate::replica::ReplicaEndpoint;

/// A successfully fetched tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileResult {
    /// Payload bytes, compressed if the negotiated format says so
    pub payload: Bytes,

    /// Content hash from the key column, if the lookup has one
    pub key: Option<String>,
}

/// Runs the lookup on one endpoint and enforces the response contract.
///
/// The pipeline is linear: validate the coordinate, run the lookup, check
/// the row and column counts, then compress and attach the key. Every path
/// ends in a [`TileResult`] or a single [`TileError`].
#[derive(Debug, Clone)]
pub struct TileFetcher {
    validator: CoordinateValidator,
    format: NegotiatedFormat,
    errors_as_empty: bool,
}

impl TileFetcher {
    pub fn new(validator: CoordinateValidator, format: NegotiatedFormat) -> Self {
        Self {
            validator,
            format,
            errors_as_empty: false,
        }
    }

    /// Report lookup failures as missing tiles instead of errors.
    ///
    /// Shape violations and shutdown are still returned as-is.
    pub fn with_errors_as_empty(mut self, enabled: bool) -> Self {
        self.errors_as_empty = enabled;
        self
    }

    pub fn format(&self) -> &NegotiatedFormat {
        &self.format
    }

    pub fn validator(&self) -> &CoordinateValidator {
        &self.validator
    }

    pub fn errors_as_empty(&self) -> bool {
        self.errors_as_empty
    }

    /// Fetch one tile from `endpoint`.
    ///
    /// The caller is responsible for counting the request against the
    /// endpoint (see [`Dispatcher::dispatch`](crate::replica::Dispatcher::dispatch)).
    pub async fn fetch<B: TileBackend>(
        &self,
        coord: TileCoord,
        endpoint: &ReplicaEndpoint<B>,
    ) -> Result<TileResult, TileError> {
        if !self.validator.contains(coord) {
            return Err(TileError::NotFound);
        }

        match self.fetch_unchecked(coord, endpoint.backend()).await {
            Err(err) if self.errors_as_empty && is_downgradable(&err) => {
                warn!(
                    replica = endpoint.address(),
                    tile = %coord,
                    error = %err,
                    "Lookup failed, serving empty tile"
                );
                Err(TileError::NotFound)
            }
            other => other,
        }
    }

    async fn fetch_unchecked<B: TileBackend>(
        &self,
        coord: TileCoord,
        backend: &B,
    ) -> Result<TileResult, TileError> {
        let rows = query(backend, coord).await.map_err(|e| match e {
            BackendError::Closed => TileError::Closed,
            other => TileError::Upstream(other),
        })?;

        let row = match rows.len() {
            0 => return Err(TileError::NotFound),
            1 => &rows[0],
            n => {
                return Err(TileError::shape(format!(
                    "lookup returned {} rows for tile {}",
                    n, coord
                )))
            }
        };

        let expected = self.format.column_count();
        if row.len() != expected {
            return Err(TileError::shape(format!(
                "lookup returned {} columns, expected {}",
                row.len(),
                expected
            )));
        }

        let payload = match &row.columns[0] {
            ColumnValue::Null => return Err(TileError::NotFound),
            ColumnValue::Other(type_name) => {
                return Err(TileError::shape(format!(
                    "tile column has unsupported type {}",
                    type_name
                )))
            }
            ColumnValue::Bytes(bytes) => bytes.clone(),
            ColumnValue::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
        };
        if payload.is_empty() {
            return Err(TileError::NotFound);
        }

        let payload = self.encode(payload)?;

        let key = if self.format.has_key_column {
            key_value(row)?
        } else {
            None
        };

        Ok(TileResult { payload, key })
    }

    fn encode(&self, payload: Bytes) -> Result<Bytes, TileError> {
        if !self.format.should_compress || self.format.source_precompressed {
            return Ok(payload);
        }
        // Already a complete gzip stream; a bare magic prefix is not enough.
        if try_gunzip(&payload).is_some() {
            return Ok(payload);
        }
        gzip(&payload).map_err(|e| TileError::Codec {
            message: e.to_string(),
        })
    }
}

/// Run the lookup for a coordinate without any shape checks.
pub(crate) async fn query<B: TileBackend>(
    backend: &B,
    coord: TileCoord,
) -> Result<Vec<TileRow>, BackendError> {
    if backend.is_closed() {
        return Err(BackendError::Closed);
    }
    backend.query_tile(coord.z, coord.x, coord.y).await
}

/// The key column must read as text, the same rule the startup probe applies.
fn key_value(row: &TileRow) -> Result<Option<String>, TileError> {
    match row.get(1) {
        None | Some(ColumnValue::Null) => Ok(None),
        Some(value) => value
            .as_text()
            .map(|text| Some(text.to_string()))
            .ok_or_else(|| TileError::shape(format!("key column is not text: {:?}", value))),
    }
}

fn is_downgradable(err: &TileError) -> bool {
    matches!(err, TileError::Upstream(_) | TileError::Codec { .. })
}
