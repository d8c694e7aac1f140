use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, ETAG};
use serde::Serialize;
use tracing::info;

use super::coord::{CoordinateValidator, TileCoord, MAX_ZOOM};
use super::fetcher::TileFetcher;
use super::probe::{ProbeConfig, StartupProbe};
use crate::backend::TileBackend;
use crate::error::{ProbeError, TileError};
use crate::format::NegotiatedFormat;
use crate::replica::Dispatcher;

/// TileJSON version reported in the metadata descriptor.
pub const TILEJSON_VERSION: &str = "3.0.0";

// =============================================================================
// Configuration
// =============================================================================

/// Static descriptive fields of the tile set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileSetInfo {
    pub name: String,
    pub attribution: Option<String>,
    pub description: Option<String>,
}

/// Everything the service needs besides the replicas themselves.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub minzoom: u32,
    pub maxzoom: u32,
    pub probe: ProbeConfig,

    /// Serve lookup failures as missing tiles
    pub errors_as_empty: bool,

    pub info: TileSetInfo,
}

// =============================================================================
// Tile Response
// =============================================================================

/// A tile ready to be written to the client.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// Payload bytes, possibly gzip-compressed
    pub data: Bytes,

    /// Content hash from the key column
    pub key: Option<String>,

    /// MIME type
    pub content_type: String,

    /// `Content-Encoding` header value, if any
    pub content_encoding: Option<String>,
}

impl TileResponse {
    /// Response headers describing the payload.
    ///
    /// The key, when present, is sent as a strong `ETag`.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        if let Some(Ok(value)) = self.content_encoding.as_deref().map(HeaderValue::from_str) {
            headers.insert(CONTENT_ENCODING, value);
        }
        if let Some(Ok(value)) = self
            .key
            .as_ref()
            .map(|key| HeaderValue::from_str(&format!("\"{}\"", key)))
        {
            headers.insert(ETAG, value);
        }
        headers
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Read-only TileJSON-style description of the tile set.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TileMetadata {
    pub tilejson: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,

    pub minzoom: u32,
    pub maxzoom: u32,

    /// Short format name (`pbf`, `jpg`, `png`, or the custom MIME type)
    pub format: String,

    /// URL templates, relative to the server root
    pub tiles: Vec<String>,
}

impl TileMetadata {
    fn new(info: &TileSetInfo, validator: &CoordinateValidator, format: &NegotiatedFormat) -> Self {
        Self {
            tilejson: TILEJSON_VERSION.to_string(),
            name: info.name.clone(),
            description: info.description.clone(),
            attribution: info.attribution.clone(),
            minzoom: validator.minzoom(),
            maxzoom: validator.maxzoom(),
            format: format.content_type.format_name().to_string(),
            tiles: vec!["/tiles/{z}/{x}/{y}".to_string()],
        }
    }
}

// =============================================================================
// Tile Service
// =============================================================================

/// Serves tiles from a set of equivalent replicas.
///
/// A service only exists once startup negotiation has succeeded:
/// [`TileService::start`] probes every replica and either returns a fully
/// initialized service or an error, never something in between.
///
/// Each request is dispatched to the least-loaded replica and run through
/// the [`TileFetcher`] pipeline with the negotiated format.
///
/// # Example
///
/// ```ignore
/// use replica_tiles::backend::PgBackend;
/// use replica_tiles::tile::{ServiceConfig, TileCoord, TileService};
///
/// let replicas = vec![
///     (PgBackend::connect_lazy("postgres://db-1/gis", 8, "SELECT tile($1, $2, $3)")?, 8),
///     (PgBackend::connect_lazy("postgres://db-2/gis", 4, "SELECT tile($1, $2, $3)")?, 4),
/// ];
/// let service = TileService::start(replicas, ServiceConfig { maxzoom: 14, ..Default::default() }).await?;
///
/// let tile = service.get_tile(TileCoord::new(14, 9268, 3575)).await?;
/// println!("{} bytes of {}", tile.data.len(), tile.content_type);
///
/// service.shutdown().await;
/// ```
pub struct TileService<B: TileBackend> {
    dispatcher: Dispatcher<B>,
    fetcher: TileFetcher,
    metadata: TileMetadata,
}

impl<B: TileBackend> TileService<B> {
    /// Probe the replicas and build the service.
    ///
    /// On failure every replica pool is closed before the error is returned.
    pub async fn start(replicas: Vec<(B, u32)>, config: ServiceConfig) -> Result<Self, ProbeError> {
        let mut dispatcher = Dispatcher::new(replicas);

        if config.minzoom > config.maxzoom || config.maxzoom > MAX_ZOOM {
            dispatcher.shutdown().await;
            return Err(ProbeError::InvalidZoomRange {
                minzoom: config.minzoom,
                maxzoom: config.maxzoom,
                max: MAX_ZOOM,
            });
        }
        let validator = CoordinateValidator::new(config.minzoom, config.maxzoom);

        if dispatcher.is_empty() {
            return Err(ProbeError::NoReplicas("no replicas configured".to_string()));
        }

        let format = match StartupProbe::new(&validator, &config.probe)
            .run(&mut dispatcher)
            .await
        {
            Ok(format) => format,
            Err(err) => {
                dispatcher.shutdown().await;
                return Err(err);
            }
        };

        info!(
            replicas = dispatcher.len(),
            minzoom = validator.minzoom(),
            maxzoom = validator.maxzoom(),
            errors_as_empty = config.errors_as_empty,
            "Tile service ready"
        );

        let metadata = TileMetadata::new(&config.info, &validator, &format);
        let fetcher = TileFetcher::new(validator, format).with_errors_as_empty(config.errors_as_empty);

        Ok(Self {
            dispatcher,
            fetcher,
            metadata,
        })
    }

    /// Fetch a tile from the least-loaded replica.
    ///
    /// # Errors
    ///
    /// - [`TileError::NotFound`] for out-of-range coordinates and missing tiles
    /// - [`TileError::Shape`] when the lookup breaks the one-tile contract
    /// - [`TileError::Upstream`] when the lookup fails (unless errors are served as empty)
    /// - [`TileError::Closed`] after [`shutdown`](Self::shutdown)
    pub async fn get_tile(&self, coord: TileCoord) -> Result<TileResponse, TileError> {
        let guard = self.dispatcher.dispatch().ok_or(TileError::Closed)?;
        let tile = self.fetcher.fetch(coord, guard.endpoint()).await?;
        drop(guard);

        let format = self.fetcher.format();
        Ok(TileResponse {
            data: tile.payload,
            key: tile.key,
            content_type: format.content_type.mime().to_string(),
            content_encoding: format.content_encoding.clone(),
        })
    }

    /// The negotiated format.
    pub fn format(&self) -> &NegotiatedFormat {
        self.fetcher.format()
    }

    pub fn metadata(&self) -> &TileMetadata {
        &self.metadata
    }

    pub fn dispatcher(&self) -> &Dispatcher<B> {
        &self.dispatcher
    }

    /// Close every replica pool. Idempotent; later requests fail with
    /// [`TileError::Closed`].
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }

    pub fn is_closed(&self) -> bool {
        self.dispatcher.is_closed()
    }
}

// =============================================================================
// Tests
// =============================================================================
