//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │     GET /tiles/{z}/{x}/{y}    GET /metadata    GET /health      │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │           routes            │  │
//! │  │ (requests, error mapping)│  │  (router config, CORS)      │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                      tile::TileService
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, metadata_handler, tile_handler, AppState, ErrorResponse, HealthResponse,
    TilePathParams,
};
pub use routes::{create_router, RouterConfig};
