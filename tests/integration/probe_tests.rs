//! Startup negotiation tests.
//!
//! Tests verify:
//! - Format derivation from the canary (vector, PNG, precompressed sources)
//! - Cross-replica consistency checks
//! - Key column and row shape validation
//! - Zoom range validation
//! - Replica exclusion policy
//! - Disabled probing with explicit configuration

use bytes::Bytes;

use replica_tiles::backend::{ColumnValue, TileBackend, TileRow};
use replica_tiles::error::{BackendError, ProbeError, TileError};
use replica_tiles::format::{gunzip, gzip, ContentType, FormatOverrides, Toggle};
use replica_tiles::tile::{
    CanarySetting, ProbeFailurePolicy, ServiceConfig, TileCoord, TileService, DEFAULT_CANARY,
};

use super::test_utils::{jpeg_tile, keyed_row, png_tile, tile_row, vector_tile, MockBackend};

fn config() -> ServiceConfig {
    ServiceConfig {
        minzoom: 0,
        maxzoom: 14,
        ..Default::default()
    }
}

// =============================================================================
// Format Derivation
// =============================================================================

#[tokio::test]
async fn test_single_vector_replica() {
    let backend = MockBackend::new("a").with_rows(DEFAULT_CANARY, vec![tile_row(vector_tile())]);
    let service = TileService::start(vec![(backend, 4)], config()).await.unwrap();

    let format = service.format();
    assert_eq!(format.content_type, ContentType::Vector);
    assert!(!format.has_key_column);
    assert!(!format.source_precompressed);
    assert!(format.should_compress);
    assert_eq!(format.content_encoding.as_deref(), Some("gzip"));

    let tile = service.get_tile(DEFAULT_CANARY).await.unwrap();
    assert_eq!(tile.content_encoding.as_deref(), Some("gzip"));
    assert_eq!(gunzip(&tile.data).unwrap(), vector_tile());
}

#[tokio::test]
async fn test_identical_png_replicas() {
    let replicas = vec![
        (MockBackend::new("a").serving(png_tile()), 2),
        (MockBackend::new("b").serving(png_tile()), 6),
    ];
    let service = TileService::start(replicas, config()).await.unwrap();

    let format = service.format();
    assert_eq!(format.content_type, ContentType::Png);
    assert!(!format.should_compress);
    assert!(format.content_encoding.is_none());
    assert_eq!(service.dispatcher().len(), 2);

    let tile = service.get_tile(TileCoord::new(7, 3, 3)).await.unwrap();
    assert_eq!(tile.data, png_tile());
    assert!(tile.content_encoding.is_none());
}

#[tokio::test]
async fn test_jpeg_replica_with_key() {
    let backend =
        MockBackend::new("a").with_default_rows(vec![keyed_row(jpeg_tile(), "0a1b2c3d4e5f")]);
    let service = TileService::start(vec![(backend, 3)], config()).await.unwrap();

    let format = service.format();
    assert_eq!(format.content_type, ContentType::Jpeg);
    assert!(format.has_key_column);
    assert!(!format.should_compress);

    let tile = service.get_tile(TileCoord::new(9, 100, 200)).await.unwrap();
    assert_eq!(tile.data, jpeg_tile());
    assert_eq!(tile.key.as_deref(), Some("0a1b2c3d4e5f"));
    assert_eq!(tile.content_type, "image/jpeg");
}

#[tokio::test]
async fn test_precompressed_source_passed_through() {
    let compressed = gzip(&vector_tile()).unwrap();
    let backend = MockBackend::new("a").serving(compressed.clone());
    let service = TileService::start(vec![(backend, 1)], config()).await.unwrap();

    let format = service.format();
    assert_eq!(format.content_type, ContentType::Vector);
    assert!(format.source_precompressed);
    assert!(!format.should_compress);
    assert_eq!(format.content_encoding.as_deref(), Some("gzip"));

    let tile = service.get_tile(TileCoord::new(2, 1, 1)).await.unwrap();
    assert_eq!(tile.data, compressed);
}

#[tokio::test]
async fn test_canary_moved_into_zoom_range() {
    let canary = TileCoord::new(10, 579, 223);
    let backend = MockBackend::new("a").with_rows(canary, vec![tile_row(vector_tile())]);

    let mut cfg = config();
    cfg.maxzoom = 10;
    let service = TileService::start(vec![(backend.clone(), 1)], cfg).await.unwrap();
    assert_eq!(service.format().content_type, ContentType::Vector);
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn test_content_type_override() {
    let backend = MockBackend::new("a").serving(vector_tile());
    let mut cfg = config();
    cfg.probe.overrides.content_type = Some(ContentType::Custom("application/x-custom-tile".to_string()));
    cfg.probe.overrides.compress = Toggle::Off;

    let service = TileService::start(vec![(backend, 1)], cfg).await.unwrap();
    assert!(!service.format().should_compress);
    assert!(service.format().content_encoding.is_none());

    let tile = service.get_tile(TileCoord::new(1, 1, 1)).await.unwrap();
    assert_eq!(tile.content_type, "application/x-custom-tile");
    assert_eq!(tile.data, vector_tile());
}

#[tokio::test]
async fn test_forced_content_encoding() {
    let backend = MockBackend::new("a").serving(vector_tile());
    let mut cfg = config();
    cfg.probe.overrides = FormatOverrides {
        compress: Toggle::Off,
        content_encoding: Some("br".to_string()),
        ..Default::default()
    };

    let service = TileService::start(vec![(backend, 1)], cfg).await.unwrap();
    let tile = service.get_tile(TileCoord::new(1, 0, 0)).await.unwrap();
    assert_eq!(tile.content_encoding.as_deref(), Some("br"));
    assert_eq!(tile.data, vector_tile());
}

// =============================================================================
// Consistency
// =============================================================================

#[tokio::test]
async fn test_mismatched_payloads_fail() {
    let replicas = vec![
        (MockBackend::new("a").serving(vector_tile()), 1),
        (MockBackend::new("b").serving(png_tile()), 1),
    ];
    let result = TileService::start(replicas, config()).await;
    assert!(matches!(result, Err(ProbeError::Inconsistent { .. })));
}

#[tokio::test]
async fn test_mismatched_keys_fail() {
    let replicas = vec![
        (
            MockBackend::new("a").with_default_rows(vec![keyed_row(vector_tile(), "0123456789")]),
            1,
        ),
        (
            MockBackend::new("b").with_default_rows(vec![keyed_row(vector_tile(), "abcdefabcd")]),
            1,
        ),
    ];
    let result = TileService::start(replicas, config()).await;
    assert!(matches!(result, Err(ProbeError::Inconsistent { .. })));
}

#[tokio::test]
async fn test_failed_start_closes_replicas() {
    let a = MockBackend::new("a").serving(vector_tile());
    let b = MockBackend::new("b").serving(png_tile());
    let result = TileService::start(vec![(a.clone(), 1), (b.clone(), 1)], config()).await;

    assert!(result.is_err());
    assert!(a.is_closed());
    assert!(b.is_closed());
}

// =============================================================================
// Shape Checks
// =============================================================================

#[tokio::test]
async fn test_non_hex_key_fails() {
    let backend = MockBackend::new("a")
        .with_default_rows(vec![keyed_row(vector_tile(), "not-a-hex-digest")]);
    let result = TileService::start(vec![(backend, 1)], config()).await;
    assert!(matches!(result, Err(ProbeError::InvalidShape { .. })));
}

#[tokio::test]
async fn test_bytea_key_accepted() {
    let row = TileRow::new(vec![
        ColumnValue::Bytes(vector_tile()),
        ColumnValue::Bytes(Bytes::from_static(b"0123456789abcdef")),
    ]);
    let backend = MockBackend::new("a").with_default_rows(vec![row]);
    let service = TileService::start(vec![(backend, 1)], config()).await.unwrap();
    assert!(service.format().has_key_column);

    let tile = service.get_tile(TileCoord::new(8, 20, 30)).await.unwrap();
    assert_eq!(tile.key.as_deref(), Some("0123456789abcdef"));
}

#[tokio::test]
async fn test_multiple_canary_rows_fail() {
    let backend = MockBackend::new("a")
        .with_default_rows(vec![tile_row(vector_tile()), tile_row(vector_tile())]);
    let result = TileService::start(vec![(backend, 1)], config()).await;
    assert!(matches!(result, Err(ProbeError::InvalidShape { .. })));
}

#[tokio::test]
async fn test_three_column_canary_fails() {
    let row = TileRow::new(vec![
        ColumnValue::Bytes(vector_tile()),
        ColumnValue::Text("0123456789".to_string()),
        ColumnValue::Text("extra".to_string()),
    ]);
    let backend = MockBackend::new("a").with_default_rows(vec![row]);
    let result = TileService::start(vec![(backend, 1)], config()).await;
    assert!(matches!(result, Err(ProbeError::InvalidShape { .. })));
}

#[tokio::test]
async fn test_empty_canary_fails() {
    let backend = MockBackend::new("a").serving(Bytes::new());
    let result = TileService::start(vec![(backend, 1)], config()).await;
    assert!(matches!(result, Err(ProbeError::InvalidShape { .. })));
}

#[tokio::test]
async fn test_null_canary_fails() {
    let backend = MockBackend::new("a").with_default_rows(vec![TileRow::new(vec![ColumnValue::Null])]);
    let result = TileService::start(vec![(backend.clone(), 1)], config()).await;
    assert!(matches!(result, Err(ProbeError::InvalidShape { .. })));
    assert!(backend.is_closed());
}

#[tokio::test]
async fn test_missing_canary_fails() {
    let result = TileService::start(vec![(MockBackend::new("a"), 1)], config()).await;
    assert!(matches!(result, Err(ProbeError::InvalidShape { .. })));
}

#[tokio::test]
async fn test_key_column_override_contradiction() {
    let backend = MockBackend::new("a").serving(vector_tile());
    let mut cfg = config();
    cfg.probe.overrides.key_column = Toggle::On;

    let result = TileService::start(vec![(backend, 1)], cfg).await;
    assert!(matches!(result, Err(ProbeError::InvalidShape { .. })));
}

#[tokio::test]
async fn test_explicit_canary_out_of_range() {
    let mut cfg = config();
    cfg.probe.canary = CanarySetting::At(TileCoord::new(3, 8, 8));
    let result = TileService::start(vec![(MockBackend::new("a").serving(vector_tile()), 1)], cfg).await;
    assert!(matches!(result, Err(ProbeError::CanaryOutOfRange { z: 3, .. })));
}

#[tokio::test]
async fn test_inverted_zoom_range_rejected() {
    let backend = MockBackend::new("a").serving(vector_tile());
    let mut cfg = config();
    cfg.minzoom = 12;
    cfg.maxzoom = 4;

    let result = TileService::start(vec![(backend.clone(), 1)], cfg).await;
    assert!(matches!(
        result,
        Err(ProbeError::InvalidZoomRange { minzoom: 12, maxzoom: 4, .. })
    ));
    assert_eq!(backend.call_count(), 0);
    assert!(backend.is_closed());
}

// =============================================================================
// Failure Policy
// =============================================================================

#[tokio::test]
async fn test_unreachable_replica_aborts_by_default() {
    let replicas = vec![
        (MockBackend::new("a").serving(vector_tile()), 1),
        (
            MockBackend::new("b").failing(BackendError::Connection("refused".to_string())),
            1,
        ),
    ];
    let result = TileService::start(replicas, config()).await;
    assert!(matches!(result, Err(ProbeError::Upstream { .. })));
}

#[tokio::test]
async fn test_unreachable_replica_excluded() {
    let broken = MockBackend::new("b").failing(BackendError::Connection("refused".to_string()));
    let replicas = vec![
        (MockBackend::new("a").serving(vector_tile()), 1),
        (broken.clone(), 1),
    ];
    let mut cfg = config();
    cfg.probe.failure_policy = ProbeFailurePolicy::Exclude;

    let service = TileService::start(replicas, cfg).await.unwrap();
    assert_eq!(service.dispatcher().len(), 1);
    assert_eq!(service.dispatcher().endpoints()[0].address(), "a");

    assert!(broken.is_closed());

    for _ in 0..5 {
        service.get_tile(TileCoord::new(1, 0, 0)).await.unwrap();
    }
}

#[tokio::test]
async fn test_exclude_never_hides_inconsistency() {
    let replicas = vec![
        (MockBackend::new("a").serving(vector_tile()), 1),
        (MockBackend::new("b").serving(png_tile()), 1),
    ];
    let mut cfg = config();
    cfg.probe.failure_policy = ProbeFailurePolicy::Exclude;

    let result = TileService::start(replicas, cfg).await;
    assert!(matches!(result, Err(ProbeError::Inconsistent { .. })));
}

#[tokio::test]
async fn test_all_replicas_excluded_fails() {
    let replicas = vec![(
        MockBackend::new("a").failing(BackendError::Query("boom".to_string())),
        1,
    )];
    let mut cfg = config();
    cfg.probe.failure_policy = ProbeFailurePolicy::Exclude;

    let result = TileService::start(replicas, cfg).await;
    assert!(matches!(result, Err(ProbeError::NoReplicas(_))));
}

// =============================================================================
// Disabled Probe
// =============================================================================

#[tokio::test]
async fn test_disabled_probe_requires_explicit_settings() {
    let mut cfg = config();
    cfg.probe.canary = CanarySetting::Disabled;
    let result = TileService::start(vec![(MockBackend::new("a"), 1)], cfg).await;
    assert!(matches!(result, Err(ProbeError::MissingExplicit { .. })));
}

#[tokio::test]
async fn test_disabled_probe_skips_lookups() {
    let backend = MockBackend::new("a").serving(vector_tile());
    let mut cfg = config();
    cfg.probe.canary = CanarySetting::Disabled;
    cfg.probe.overrides.compress = Toggle::On;
    cfg.probe.overrides.key_column = Toggle::Off;

    let service = TileService::start(vec![(backend.clone(), 1)], cfg).await.unwrap();
    assert_eq!(backend.call_count(), 0);
    assert_eq!(service.format().content_type, ContentType::Vector);

    let tile = service.get_tile(TileCoord::new(0, 0, 0)).await.unwrap();
    assert_eq!(gunzip(&tile.data).unwrap(), vector_tile());
}

// =============================================================================
// Errors as Empty
// =============================================================================

#[tokio::test]
async fn test_errors_as_empty() {
    let failing = TileCoord::new(6, 10, 20);
    let backend = MockBackend::new("a")
        .serving(vector_tile())
        .with_failure(failing, BackendError::Query("timeout".to_string()));

    let mut cfg = config();
    cfg.errors_as_empty = true;
    let service = TileService::start(vec![(backend, 1)], cfg).await.unwrap();
    assert!(matches!(service.get_tile(failing).await, Err(TileError::NotFound)));

    service.shutdown().await;
    assert!(matches!(service.get_tile(failing).await, Err(TileError::Closed)));
}
