use thiserror::Error;

/// Errors raised by a query-execution backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The lookup statement failed on the replica
    #[error("Query error: {0}")]
    Query(String),

    /// A column could not be decoded into a tile value
    #[error("Decode error in column {column}: {message}")]
    Decode { column: usize, message: String },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend pool has been closed
    #[error("Backend is closed")]
    Closed,
}

/// Errors that can occur while serving a single tile.
///
/// `NotFound` is the well-known "no tile here" value. Callers should match on
/// the variant rather than on the message.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// The tile does not exist (out of range, no rows, or empty payload)
    #[error("Tile not found")]
    NotFound,

    /// The lookup returned rows or columns that break the one-tile contract
    #[error("Unexpected response shape: {message}")]
    Shape { message: String },

    /// The lookup itself failed
    #[error("Upstream error: {0}")]
    Upstream(#[from] BackendError),

    /// The payload could not be compressed or decompressed
    #[error("Codec error: {message}")]
    Codec { message: String },

    /// The service has been shut down
    #[error("Service is shut down")]
    Closed,
}

impl TileError {
    /// Shape errors signal a broken deployment and are never converted to `NotFound`.
    pub fn is_shape(&self) -> bool {
        matches!(self, TileError::Shape { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TileError::NotFound)
    }

    pub(crate) fn shape(message: impl Into<String>) -> Self {
        TileError::Shape {
            message: message.into(),
        }
    }
}

/// Errors that abort startup negotiation.
///
/// None of these are recoverable: a service is only built once every
/// replica has been probed and agrees.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    /// A replica returned a canary response that violates the probe contract
    #[error("Replica {replica} returned an invalid canary response: {message}")]
    InvalidShape { replica: String, message: String },

    /// The canary lookup failed on a replica
    #[error("Replica {replica} failed the canary lookup: {source}")]
    Upstream {
        replica: String,
        #[source]
        source: BackendError,
    },

    /// Two replicas disagree on the canary response
    #[error("Replica {replica} disagrees with {reference}: {message}")]
    Inconsistent {
        replica: String,
        reference: String,
        message: String,
    },

    /// Probing is disabled and the format is not fully configured
    #[error("Probing is disabled, so {setting} must be set explicitly")]
    MissingExplicit { setting: &'static str },

    /// The canary coordinate lies outside the configured zoom range
    #[error("Canary tile {z}/{x}/{y} is outside the configured tile range")]
    CanaryOutOfRange { z: u32, x: u32, y: u32 },

    /// The zoom range is empty or exceeds the supported maximum
    #[error("Invalid zoom range {minzoom}..={maxzoom} (maximum zoom is {max})")]
    InvalidZoomRange { minzoom: u32, maxzoom: u32, max: u32 },

    /// No replicas are left to serve from
    #[error("No replicas available: {0}")]
    NoReplicas(String),
}

impl ProbeError {
    /// Whether this error is specific to one replica and could be handled by
    /// excluding that replica.
    pub fn is_replica_local(&self) -> bool {
        matches!(
            self,
            ProbeError::InvalidShape { .. } | ProbeError::Upstream { .. }
        )
    }
}
