//! Test utilities for integration tests.
//!
//! Provides a mock tile backend with per-coordinate responses, call
//! tracking and optional latency, plus helpers for building tile payloads.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use replica_tiles::backend::{ColumnValue, TileBackend, TileRow};
use replica_tiles::error::BackendError;
use replica_tiles::tile::TileCoord;

// =============================================================================
// Payloads
// =============================================================================

/// An uncompressed vector tile (leading byte 0x1A).
pub fn vector_tile() -> Bytes {
    Bytes::from_static(b"\x1a\x0b\x0a\x05roads\x78\x02")
}

/// A minimal PNG payload (valid signature, arbitrary body).
pub fn png_tile() -> Bytes {
    Bytes::from_static(b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR")
}

/// A minimal JPEG payload (valid SOI marker, arbitrary body).
pub fn jpeg_tile() -> Bytes {
    Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'])
}

/// A one-column row holding `payload`.
pub fn tile_row(payload: Bytes) -> TileRow {
    TileRow::new(vec![ColumnValue::Bytes(payload)])
}

/// A two-column row holding `payload` and its content hash.
pub fn keyed_row(payload: Bytes, key: &str) -> TileRow {
    TileRow::new(vec![
        ColumnValue::Bytes(payload),
        ColumnValue::Text(key.to_string()),
    ])
}

// =============================================================================
// Mock Backend
// =============================================================================

type Response = Result<Vec<TileRow>, BackendError>;

/// A tile backend answering from an in-memory table.
///
/// Clones share call counters and the closed flag, so a test can keep a
/// handle after moving the backend into a service.
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    tiles: HashMap<TileCoord, Response>,
    fallback: Response,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl MockBackend {
    /// A backend with no tiles: every lookup returns zero rows.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tiles: HashMap::new(),
            fallback: Ok(Vec::new()),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Serve the same rows for every coordinate without an explicit entry.
    pub fn with_default_rows(mut self, rows: Vec<TileRow>) -> Self {
        self.fallback = Ok(rows);
        self
    }

    /// Serve a single-column tile for every coordinate.
    pub fn serving(self, payload: Bytes) -> Self {
        self.with_default_rows(vec![tile_row(payload)])
    }

    pub fn with_rows(mut self, coord: TileCoord, rows: Vec<TileRow>) -> Self {
        self.tiles.insert(coord, Ok(rows));
        self
    }

    /// Fail lookups of `coord` with `error`.
    pub fn with_failure(mut self, coord: TileCoord, error: BackendError) -> Self {
        self.tiles.insert(coord, Err(error));
        self
    }

    /// Fail every lookup without an explicit entry.
    pub fn failing(mut self, error: BackendError) -> Self {
        self.fallback = Err(error);
        self
    }

    /// Hold each lookup for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of lookups observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileBackend for MockBackend {
    async fn query_tile(&self, z: u32, x: u32, y: u32) -> Result<Vec<TileRow>, BackendError> {
        if self.is_closed() {
            return Err(BackendError::Closed);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self
            .tiles
            .get(&TileCoord::new(z, x, y))
            .unwrap_or(&self.fallback)
            .clone();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn address(&self) -> &str {
        &self.name
    }
}
