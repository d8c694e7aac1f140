//! # Replica Tiles
//!
//! A map tile server that reads tiles from a set of equivalent PostgreSQL
//! replicas.
//!
//! Every tile lookup is dispatched to the replica with the lowest
//! capacity-weighted number of pending requests. Before serving, the replicas
//! are probed with a canary tile; the probe checks that they agree and
//! derives the response format (content type, compression, key column) once
//! for the lifetime of the service.
//!
//! ## Features
//!
//! - **Weighted dispatch**: Replicas receive load in proportion to their pool capacity
//! - **Startup negotiation**: Content type and compression detected from real tiles
//! - **Content hashes**: An optional key column becomes the response `ETag`
//! - **Strict lookups**: A lookup must return at most one tile, or the request fails
//!
//! ## Architecture
//!
//! - [`backend`] - Tile lookup abstraction and the PostgreSQL implementation
//! - [`replica`] - Replica endpoints and the least-pending dispatcher
//! - [`mod@format`] - Content type detection, gzip, and the negotiated format
//! - [`tile`] - Coordinate validation, fetch pipeline, startup probe, tile service
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use replica_tiles::{create_router, PgBackend, RouterConfig, ServiceConfig, TileService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let query = "SELECT tile FROM planet_tiles($1, $2, $3)";
//!     let replicas = vec![
//!         (PgBackend::connect_lazy("postgres://db-1/gis", 16, query)?, 16),
//!         (PgBackend::connect_lazy("postgres://db-2/gis", 8, query)?, 8),
//!     ];
//!
//!     let config = ServiceConfig { maxzoom: 14, ..Default::default() };
//!     let service = Arc::new(TileService::start(replicas, config).await?);
//!
//!     let router = create_router(Arc::clone(&service), RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await?;
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod format;
pub mod replica;
pub mod server;
pub mod tile;

// Re-export commonly used types
pub use backend::{ColumnValue, PgBackend, TileBackend, TileRow};
pub use config::{Cli, Command, ProbeCommandConfig, ReplicaSpec, ServeConfig, TileSourceConfig};
pub use error::{BackendError, ProbeError, TileError};
pub use format::{detect_content_type, ContentType, FormatOverrides, NegotiatedFormat, Toggle};
pub use replica::{DispatchGuard, Dispatcher, ReplicaEndpoint};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use tile::{
    CanarySetting, CoordinateValidator, ProbeConfig, ProbeFailurePolicy, ServiceConfig,
    StartupProbe, TileCoord, TileFetcher, TileMetadata, TileResponse, TileService, TileSetInfo,
};
