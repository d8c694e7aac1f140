//! Configuration management for the tile server.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `TILES_` prefix:
//!
//! - `TILES_REPLICAS` - Comma-separated replica URLs, each optionally suffixed with `#CAPACITY`
//! - `TILES_DEFAULT_CAPACITY` - Pool size for replicas without an explicit capacity (default: 10)
//! - `TILES_QUERY` - Lookup statement taking `$1 = z`, `$2 = x`, `$3 = y` (required)
//! - `TILES_MINZOOM` / `TILES_MAXZOOM` - Served zoom range (default: 0..=14)
//! - `TILES_CANARY` - Startup probe tile as `z/x/y`, or `none` to skip probing
//! - `TILES_CONTENT_TYPE` - Force the response MIME type
//! - `TILES_COMPRESS` / `TILES_KEY_COLUMN` - `auto`, `on` or `off`
//! - `TILES_CONTENT_ENCODING` - Force the `Content-Encoding` header (empty disables it)
//! - `TILES_ERRORS_AS_EMPTY` - Serve lookup failures as missing tiles
//! - `TILES_PROBE_FAILURE` - `abort` or `exclude`
//! - `TILES_HOST` / `TILES_PORT` - Server bind address (default: 0.0.0.0:3000)
//! - `TILES_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `TILES_CORS_ORIGINS` - Allowed CORS origins (default: any)
//!
//! # Example
//!
//! ```bash
//! replica-tiles serve \
//!     --replica 'postgres://tiles@db-1/gis#16' \
//!     --replica 'postgres://tiles@db-2/gis#8' \
//!     --query 'SELECT tile FROM planet_tiles($1, $2, $3)' \
//!     --maxzoom 14
//! ```

use std::str::FromStr;

use clap::{Args, Parser, Subcommand};

use crate::format::{ContentType, FormatOverrides, Toggle};
use crate::tile::{
    CanarySetting, CoordinateValidator, ProbeConfig, ProbeFailurePolicy, ServiceConfig,
    TileSetInfo, MAX_ZOOM,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default connection pool size per replica.
pub const DEFAULT_CAPACITY: u32 = 10;

/// Default highest zoom level.
pub const DEFAULT_MAXZOOM: u32 = 14;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Default tile set name.
pub const DEFAULT_NAME: &str = "tiles";

// =============================================================================
// Replica Specification
// =============================================================================

/// A replica URL with an optional pool capacity, written `URL#CAPACITY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSpec {
    pub url: String,
    pub capacity: Option<u32>,
}

impl ReplicaSpec {
    /// The capacity, falling back to `default` when none was given.
    pub fn capacity_or(&self, default: u32) -> u32 {
        self.capacity.unwrap_or(default)
    }
}

impl FromStr for ReplicaSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (url, capacity) = match s.rsplit_once('#') {
            Some((url, capacity)) => {
                let capacity = capacity
                    .parse::<u32>()
                    .map_err(|_| format!("invalid capacity '{}' in replica '{}'", capacity, s))?;
                (url, Some(capacity))
            }
            None => (s, None),
        };

        if url.is_empty() {
            return Err("replica URL must not be empty".to_string());
        }

        Ok(Self {
            url: url.to_string(),
            capacity,
        })
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Replica Tiles - A map tile server over redundant PostgreSQL replicas.
///
/// Dispatches every tile lookup to the least-loaded replica and negotiates
/// the response format once at startup by probing a canary tile.
#[derive(Parser, Debug, Clone)]
#[command(name = "replica-tiles")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Probe the replicas and serve tiles over HTTP.
    Serve(ServeConfig),

    /// Probe the replicas, print the negotiated format as JSON and exit.
    Probe(ProbeCommandConfig),
}

/// Tile source settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct TileSourceConfig {
    // =========================================================================
    // Replicas
    // =========================================================================
    /// Replica connection URL, optionally suffixed with `#CAPACITY`.
    ///
    /// Repeat the flag or separate with commas for multiple replicas.
    #[arg(long = "replica", env = "TILES_REPLICAS", value_delimiter = ',', required = true)]
    pub replicas: Vec<ReplicaSpec>,

    /// Pool capacity for replicas that do not specify one.
    #[arg(long, default_value_t = DEFAULT_CAPACITY, env = "TILES_DEFAULT_CAPACITY")]
    pub default_capacity: u32,

    /// Lookup statement, called with `$1 = z`, `$2 = x`, `$3 = y`.
    #[arg(long, env = "TILES_QUERY")]
    pub query: String,

    // =========================================================================
    // Zoom Range
    // =========================================================================
    /// Lowest zoom level served.
    #[arg(long, default_value_t = 0, env = "TILES_MINZOOM")]
    pub minzoom: u32,

    /// Highest zoom level served (at most 30).
    #[arg(long, default_value_t = DEFAULT_MAXZOOM, env = "TILES_MAXZOOM")]
    pub maxzoom: u32,

    // =========================================================================
    // Format Negotiation
    // =========================================================================
    /// Tile probed at startup, as `z/x/y`, or `none` to skip probing.
    #[arg(long, default_value = "default", env = "TILES_CANARY")]
    pub canary: CanarySetting,

    /// Force the response content type (`pbf`, `png`, `jpg`, or any MIME type).
    #[arg(long, env = "TILES_CONTENT_TYPE")]
    pub content_type: Option<ContentType>,

    /// Gzip tiles before serving them.
    #[arg(long, value_enum, default_value_t = Toggle::Auto, env = "TILES_COMPRESS")]
    pub compress: Toggle,

    /// Whether the lookup returns a second column with a content hash.
    #[arg(long, value_enum, default_value_t = Toggle::Auto, env = "TILES_KEY_COLUMN")]
    pub key_column: Toggle,

    /// Force the `Content-Encoding` header; an empty value disables it.
    #[arg(long, env = "TILES_CONTENT_ENCODING")]
    pub content_encoding: Option<String>,

    /// What to do when a single replica fails the startup probe.
    #[arg(long, value_enum, default_value_t = ProbeFailurePolicy::Abort, env = "TILES_PROBE_FAILURE")]
    pub probe_failure: ProbeFailurePolicy,

    /// Serve lookup failures as missing tiles instead of errors.
    #[arg(long, default_value_t = false, env = "TILES_ERRORS_AS_EMPTY")]
    pub errors_as_empty: bool,

    // =========================================================================
    // Metadata
    // =========================================================================
    /// Tile set name reported in the metadata.
    #[arg(long, default_value = DEFAULT_NAME, env = "TILES_NAME")]
    pub name: String,

    /// Attribution reported in the metadata.
    #[arg(long, env = "TILES_ATTRIBUTION")]
    pub attribution: Option<String>,

    /// Description reported in the metadata.
    #[arg(long, env = "TILES_DESCRIPTION")]
    pub description: Option<String>,
}

impl TileSourceConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.replicas.is_empty() {
            return Err("At least one replica is required. Set --replica or TILES_REPLICAS".to_string());
        }

        if self.query.trim().is_empty() {
            return Err("A lookup query is required. Set --query or TILES_QUERY".to_string());
        }

        if self.default_capacity == 0 {
            return Err("default_capacity must be greater than 0".to_string());
        }
        if let Some(replica) = self.replicas.iter().find(|r| r.capacity == Some(0)) {
            return Err(format!("capacity of replica '{}' must be greater than 0", replica.url));
        }

        if self.maxzoom > MAX_ZOOM {
            return Err(format!("maxzoom must be at most {}", MAX_ZOOM));
        }
        if self.minzoom > self.maxzoom {
            return Err(format!(
                "minzoom ({}) must not exceed maxzoom ({})",
                self.minzoom, self.maxzoom
            ));
        }

        match self.canary {
            CanarySetting::At(coord) => {
                if !CoordinateValidator::new(self.minzoom, self.maxzoom).contains(coord) {
                    return Err(format!(
                        "canary tile {} is outside zoom range {}..={}",
                        coord, self.minzoom, self.maxzoom
                    ));
                }
            }
            CanarySetting::Disabled => {
                if self.key_column.explicit().is_none() {
                    return Err("--key-column must be on or off when probing is disabled".to_string());
                }
                if self.compress.explicit().is_none() {
                    return Err("--compress must be on or off when probing is disabled".to_string());
                }
            }
            CanarySetting::Default => {}
        }

        Ok(())
    }

    /// Replica URLs paired with their resolved capacities.
    pub fn replica_capacities(&self) -> Vec<(String, u32)> {
        self.replicas
            .iter()
            .map(|r| (r.url.clone(), r.capacity_or(self.default_capacity)))
            .collect()
    }

    pub fn format_overrides(&self) -> FormatOverrides {
        FormatOverrides {
            content_type: self.content_type.clone(),
            compress: self.compress,
            key_column: self.key_column,
            content_encoding: self.content_encoding.clone(),
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            canary: self.canary,
            overrides: self.format_overrides(),
            failure_policy: self.probe_failure,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            minzoom: self.minzoom,
            maxzoom: self.maxzoom,
            probe: self.probe_config(),
            errors_as_empty: self.errors_as_empty,
            info: TileSetInfo {
                name: self.name.clone(),
                attribution: self.attribution.clone(),
                description: self.description.clone(),
            },
        }
    }
}

/// Configuration for the `serve` subcommand.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    #[command(flatten)]
    pub source: TileSourceConfig,

    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "TILES_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "TILES_PORT")]
    pub port: u16,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "TILES_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "TILES_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.source.validate()
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for the `probe` subcommand.
#[derive(Args, Debug, Clone)]
pub struct ProbeCommandConfig {
    #[command(flatten)]
    pub source: TileSourceConfig,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
