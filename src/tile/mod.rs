//! Tile service layer.
//!
//! This module turns tile requests into replica lookups and back into HTTP
//! payloads.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              Tile Service               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  Dispatcher  │  │   TileFetcher   │  │
//! │  │ (least-      │  │ (validate →     │  │
//! │  │  pending)    │  │  query → shape) │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │        TileBackend (one per replica)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileService`]: Main entry point, built only after a successful [`StartupProbe`]
//! - [`CoordinateValidator`]: Zoom and x/y range checks
//! - [`TileFetcher`]: Per-request lookup pipeline against one replica
//! - [`StartupProbe`]: Canary negotiation of the [`NegotiatedFormat`](crate::format::NegotiatedFormat)
//! - [`TileResponse`]: Payload plus headers returned to the HTTP layer

mod coord;
mod fetcher;
mod probe;
mod service;

pub use coord::{CoordinateValidator, TileCoord, MAX_ZOOM};
pub use fetcher::{TileFetcher, TileResult};
pub use probe::{
    check_consistent, derive_format, probe_replica, CanaryObservation, CanarySetting,
    ProbeConfig, ProbeFailurePolicy, StartupProbe, DEFAULT_CANARY,
};
pub use service::{
    ServiceConfig, TileMetadata, TileResponse, TileService, TileSetInfo, TILEJSON_VERSION,
};
