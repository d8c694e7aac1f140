//! HTTP request handlers for the tile API.
//!
//! # Endpoints
//!
//! - `GET /tiles/{z}/{x}/{y}` - Serve a tile (`y` may carry an extension such as `.pbf`)
//! - `GET /metadata` - TileJSON-style description of the tile set
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::backend::TileBackend;
use crate::error::{BackendError, TileError};
use crate::tile::{TileCoord, TileMetadata, TileService};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the tile service.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<B: TileBackend> {
    /// The tile service for processing tile requests
    pub tile_service: Arc<TileService<B>>,

    /// Cache-Control max-age in seconds for tile responses
    pub cache_max_age: u32,
}

impl<B: TileBackend> AppState<B> {
    /// Create a new application state with the default max-age of one hour.
    pub fn new(tile_service: Arc<TileService<B>>) -> Self {
        Self::with_cache_max_age(tile_service, 3600)
    }

    pub fn with_cache_max_age(tile_service: Arc<TileService<B>>, cache_max_age: u32) -> Self {
        Self {
            tile_service,
            cache_max_age,
        }
    }
}

impl<B: TileBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            tile_service: Arc::clone(&self.tile_service),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for tile requests.
///
/// Extracted from `/tiles/{z}/{x}/{filename}` where filename is `{y}` or
/// `{y}.{ext}`. Everything is captured as text so that malformed
/// coordinates become 404s instead of extractor rejections.
#[derive(Debug, Deserialize)]
pub struct TilePathParams {
    pub z: String,
    pub x: String,
    pub filename: String,
}

impl TilePathParams {
    /// Parse the coordinate, ignoring any file extension on `y`.
    ///
    /// Returns `None` for anything that is not a non-negative integer.
    pub fn coord(&self) -> Option<TileCoord> {
        let y = self
            .filename
            .split_once('.')
            .map_or(self.filename.as_str(), |(y, _ext)| y);
        Some(TileCoord::new(
            self.z.parse().ok()?,
            self.x.parse().ok()?,
            y.parse().ok()?,
        ))
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "upstream_error")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert TileError to HTTP response.
///
/// - 404s are logged at DEBUG (missing tiles are routine)
/// - 5xx errors are logged at ERROR, except shutdown which is a WARN
impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            TileError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "Tile not found".to_string(),
            ),
            TileError::Shape { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "shape_error",
                format!("Tile lookup violated its contract: {}", message),
            ),
            TileError::Upstream(BackendError::Connection(msg)) => (
                StatusCode::BAD_GATEWAY,
                "connection_error",
                format!("Connection error: {}", msg),
            ),
            TileError::Upstream(backend_err) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                backend_err.to_string(),
            ),
            TileError::Codec { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "codec_error",
                format!("Failed to encode tile: {}", message),
            ),
            TileError::Closed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "shutting_down",
                "Service is shutting down".to_string(),
            ),
        };

        if status == StatusCode::NOT_FOUND {
            debug!(error_type = error_type, status = status.as_u16(), "{}", message);
        } else if status == StatusCode::SERVICE_UNAVAILABLE {
            warn!(error_type = error_type, status = status.as_u16(), "{}", message);
        } else {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle tile requests.
///
/// # Endpoint
///
/// `GET /tiles/{z}/{x}/{y}`
///
/// # Response
///
/// - `200 OK`: Tile payload
/// - `404 Not Found`: Tile outside the configured range or absent
/// - `500 Internal Server Error`: Lookup broke the one-row contract
/// - `502 Bad Gateway`: Lookup failed on the replica
/// - `503 Service Unavailable`: Service is shutting down
///
/// # Headers
///
/// - `Content-Type`: negotiated at startup
/// - `Content-Encoding: gzip` when the payload is compressed
/// - `ETag` when the lookup returns a key column
/// - `Cache-Control: public, max-age={cache_max_age}`
pub async fn tile_handler<B: TileBackend + 'static>(
    State(state): State<AppState<B>>,
    Path(params): Path<TilePathParams>,
) -> Result<Response, TileError> {
    let coord = params.coord().ok_or(TileError::NotFound)?;

    let tile = state.tile_service.get_tile(coord).await?;

    let mut headers = tile.headers();
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", state.cache_max_age)) {
        headers.insert(header::CACHE_CONTROL, value);
    }

    Ok((StatusCode::OK, headers, Body::from(tile.data)).into_response())
}

/// Handle metadata requests.
///
/// # Endpoint
///
/// `GET /metadata`
pub async fn metadata_handler<B: TileBackend + 'static>(
    State(state): State<AppState<B>>,
) -> Json<TileMetadata> {
    Json(state.tile_service.metadata().clone())
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
