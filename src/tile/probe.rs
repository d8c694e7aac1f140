//! Startup negotiation of the response format.
//!
//! Before any request is served, the canary tile is fetched from every
//! replica at once. Each response is checked on its own (one row, one or two
//! columns, non-empty payload, well-formed key), then all responses are
//! compared against the first replica's. Only when every replica agrees is a
//! [`NegotiatedFormat`] derived; any violation aborts startup.
//!
//! ```text
//!   replica-0 ──┐
//!   replica-1 ──┼── canary lookup ──► per-replica checks ──► cross-check ──► NegotiatedFormat
//!   replica-N ──┘
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use bytes::Bytes;
use futures::future::join_all;
use regex::Regex;
use tracing::{debug, info, warn};

use super::coord::{CoordinateValidator, TileCoord};
use super::fetcher::query;
use crate::backend::{ColumnValue, TileBackend};
use crate::error::ProbeError;
use crate::format::negotiated::resolve_content_encoding;
use crate::format::{
    detect_content_type, try_gunzip, ContentType, FormatOverrides, NegotiatedFormat, OCTET_STREAM,
};
use crate::replica::{DispatchGuard, Dispatcher, ReplicaEndpoint};

/// Canary used when none is configured.
pub const DEFAULT_CANARY: TileCoord = TileCoord::new(14, 9268, 3575);

/// Key column values must look like a hex digest.
fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{10,50}$").expect("valid key pattern"))
}

// =============================================================================
// Settings
// =============================================================================

/// Which tile to probe at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CanarySetting {
    /// [`DEFAULT_CANARY`], moved into the configured zoom range if needed
    #[default]
    Default,

    /// An explicit tile, which must be inside the configured range
    At(TileCoord),

    /// Skip probing; the format must be fully configured
    Disabled,
}

impl CanarySetting {
    /// Resolve to a concrete coordinate, or `None` when disabled.
    pub fn resolve(self, validator: &CoordinateValidator) -> Result<Option<TileCoord>, ProbeError> {
        let coord = match self {
            CanarySetting::Disabled => return Ok(None),
            CanarySetting::At(coord) => coord,
            CanarySetting::Default => {
                let z = DEFAULT_CANARY
                    .z
                    .min(validator.maxzoom())
                    .max(validator.minzoom());
                DEFAULT_CANARY.at_zoom(z)
            }
        };
        if validator.contains(coord) {
            Ok(Some(coord))
        } else {
            Err(ProbeError::CanaryOutOfRange {
                z: coord.z,
                x: coord.x,
                y: coord.y,
            })
        }
    }
}

impl fmt::Display for CanarySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanarySetting::Default => f.write_str("default"),
            CanarySetting::At(coord) => write!(f, "{}", coord),
            CanarySetting::Disabled => f.write_str("none"),
        }
    }
}

impl FromStr for CanarySetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "" => Ok(CanarySetting::Default),
            "none" | "off" | "disabled" => Ok(CanarySetting::Disabled),
            other => other.parse().map(CanarySetting::At),
        }
    }
}

/// What to do when a single replica fails its canary probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ProbeFailurePolicy {
    /// Fail startup
    #[default]
    Abort,

    /// Drop the replica and continue with the rest
    Exclude,
}

/// Settings for the startup probe.
#[derive(Debug, Clone, Default)]
pub struct ProbeConfig {
    pub canary: CanarySetting,
    pub overrides: FormatOverrides,
    pub failure_policy: ProbeFailurePolicy,
}

// =============================================================================
// Observations
// =============================================================================

/// What one replica returned for the canary.
#[derive(Debug, Clone)]
pub struct CanaryObservation {
    pub replica: String,

    /// Primary payload exactly as returned
    pub payload: Bytes,

    /// Key column, when present
    pub key: Option<String>,

    /// The payload was a valid gzip stream
    pub precompressed: bool,

    /// Signature match on the (decompressed) payload
    pub detected: Option<ContentType>,
}

impl CanaryObservation {
    pub fn has_key_column(&self) -> bool {
        self.key.is_some()
    }
}

// =============================================================================
// StartupProbe
// =============================================================================

/// Runs the canary negotiation against every replica.
pub struct StartupProbe<'a> {
    validator: &'a CoordinateValidator,
    config: &'a ProbeConfig,
}

impl<'a> StartupProbe<'a> {
    pub fn new(validator: &'a CoordinateValidator, config: &'a ProbeConfig) -> Self {
        Self { validator, config }
    }

    /// Negotiate the format.
    ///
    /// With [`ProbeFailurePolicy::Exclude`], replicas that fail their own
    /// checks are removed from `dispatcher` once the rest have been shown to
    /// agree. Disagreement between replicas is always fatal.
    pub async fn run<B: TileBackend>(
        &self,
        dispatcher: &mut Dispatcher<B>,
    ) -> Result<NegotiatedFormat, ProbeError> {
        let Some(canary) = self.config.canary.resolve(self.validator)? else {
            info!("Canary probe disabled, using configured format");
            return NegotiatedFormat::from_overrides(&self.config.overrides);
        };

        if dispatcher.is_empty() {
            return Err(ProbeError::NoReplicas("no replicas configured".to_string()));
        }

        info!(
            canary = %canary,
            replicas = dispatcher.len(),
            "Probing replicas"
        );

        let results = join_all(
            dispatcher
                .endpoints()
                .iter()
                .map(|endpoint| probe_replica(endpoint, canary)),
        )
        .await;

        let mut observations = Vec::with_capacity(results.len());
        let mut excluded = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(observation) => observations.push(observation),
                Err(err)
                    if self.config.failure_policy == ProbeFailurePolicy::Exclude
                        && err.is_replica_local() =>
                {
                    warn!(error = %err, "Replica failed the canary probe");
                    excluded.push(index);
                }
                Err(err) => return Err(err),
            }
        }

        let Some(reference) = observations.first() else {
            return Err(ProbeError::NoReplicas(
                "every replica failed the canary probe".to_string(),
            ));
        };
        for observation in &observations[1..] {
            check_consistent(reference, observation)?;
        }

        let format = derive_format(reference, &self.config.overrides)?;

        if !excluded.is_empty() {
            dispatcher.exclude(&excluded).await;
        }

        info!(
            content_type = %format.content_type,
            key_column = format.has_key_column,
            precompressed = format.source_precompressed,
            compress = format.should_compress,
            "Negotiated tile format"
        );
        Ok(format)
    }
}

/// Fetch and check the canary on one replica.
pub async fn probe_replica<B: TileBackend>(
    endpoint: &ReplicaEndpoint<B>,
    canary: TileCoord,
) -> Result<CanaryObservation, ProbeError> {
    let replica = endpoint.address().to_string();
    let invalid = |message: String| ProbeError::InvalidShape {
        replica: replica.clone(),
        message,
    };

    let rows = {
        let _in_flight = DispatchGuard::new(endpoint);
        query(endpoint.backend(), canary)
            .await
            .map_err(|source| ProbeError::Upstream {
                replica: replica.clone(),
                source,
            })?
    };

    if rows.len() != 1 {
        return Err(invalid(format!(
            "expected exactly one row for canary {}, got {}",
            canary,
            rows.len()
        )));
    }
    let row = &rows[0];

    if row.is_empty() || row.len() > 2 {
        return Err(invalid(format!(
            "expected one or two columns, got {}",
            row.len()
        )));
    }

    let payload = match &row.columns[0] {
        ColumnValue::Bytes(bytes) => bytes.clone(),
        ColumnValue::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
        ColumnValue::Null => return Err(invalid("canary tile is NULL".to_string())),
        ColumnValue::Other(type_name) => {
            return Err(invalid(format!(
                "tile column has unsupported type {}",
                type_name
            )))
        }
    };
    if payload.is_empty() {
        return Err(invalid("canary tile is empty".to_string()));
    }

    let decompressed = try_gunzip(&payload);
    let precompressed = decompressed.is_some();
    let detected = detect_content_type(decompressed.as_deref().unwrap_or(&payload));

    let key = match row.get(1) {
        None => None,
        Some(value) => match value.as_text() {
            Some(text) if key_pattern().is_match(text) => Some(text.to_string()),
            _ => {
                return Err(invalid(format!(
                    "second column must be a 10 to 50 character hex digest, got {:?}",
                    value
                )))
            }
        },
    };

    debug!(
        replica = %replica,
        bytes = payload.len(),
        precompressed,
        detected = ?detected,
        key = ?key,
        "Canary response"
    );

    Ok(CanaryObservation {
        replica,
        payload,
        key,
        precompressed,
        detected,
    })
}

/// Check that a replica returned exactly what the reference replica did.
pub fn check_consistent(
    reference: &CanaryObservation,
    other: &CanaryObservation,
) -> Result<(), ProbeError> {
    let inconsistent = |message: String| ProbeError::Inconsistent {
        replica: other.replica.clone(),
        reference: reference.replica.clone(),
        message,
    };

    if reference.payload != other.payload {
        return Err(inconsistent(format!(
            "canary payload differs ({} bytes vs {} bytes)",
            other.payload.len(),
            reference.payload.len()
        )));
    }
    if reference.key != other.key {
        return Err(inconsistent(format!(
            "canary key differs ({:?} vs {:?})",
            other.key, reference.key
        )));
    }
    Ok(())
}

/// Combine the agreed observation with configuration overrides.
pub fn derive_format(
    observation: &CanaryObservation,
    overrides: &FormatOverrides,
) -> Result<NegotiatedFormat, ProbeError> {
    let has_key_column = observation.has_key_column();
    if let Some(configured) = overrides.key_column.explicit() {
        if configured != has_key_column {
            return Err(ProbeError::InvalidShape {
                replica: observation.replica.clone(),
                message: format!(
                    "key column is configured {} but the lookup returns {} column(s)",
                    if configured { "on" } else { "off" },
                    if has_key_column { 2 } else { 1 }
                ),
            });
        }
    }

    let content_type = match (&overrides.content_type, &observation.detected) {
        (Some(forced), Some(detected)) => {
            if forced != detected {
                warn!(
                    configured = %forced,
                    detected = %detected,
                    "Configured content type differs from detected type"
                );
            }
            forced.clone()
        }
        (Some(forced), None) => forced.clone(),
        (None, Some(detected)) => detected.clone(),
        (None, None) => {
            warn!("Could not detect the tile content type, serving {}", OCTET_STREAM);
            ContentType::Custom(OCTET_STREAM.to_string())
        }
    };

    let should_compress = overrides
        .compress
        .resolve(!content_type.is_image() && !observation.precompressed);
    let content_encoding =
        resolve_content_encoding(overrides, observation.precompressed || should_compress);

    Ok(NegotiatedFormat {
        content_type,
        has_key_column,
        source_precompressed: observation.precompressed,
        should_compress,
        content_encoding,
    })
}
