//! Dispatch tests across multiple replicas.
//!
//! Tests verify:
//! - Capacity-proportional load distribution
//! - Pending counters return to zero on success and failure
//! - Shutdown with requests in flight

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use replica_tiles::backend::TileBackend;
use replica_tiles::error::{BackendError, TileError};
use replica_tiles::replica::Dispatcher;
use replica_tiles::tile::{ServiceConfig, TileCoord, TileService};

use super::test_utils::{vector_tile, MockBackend};

fn config() -> ServiceConfig {
    ServiceConfig {
        minzoom: 0,
        maxzoom: 14,
        ..Default::default()
    }
}

// =============================================================================
// Distribution
// =============================================================================

#[tokio::test]
async fn test_held_dispatches_proportional_to_capacity() {
    let dispatcher = Dispatcher::new(vec![
        (MockBackend::new("a"), 1),
        (MockBackend::new("b"), 2),
        (MockBackend::new("c"), 4),
    ]);

    let guards: Vec<_> = (0..70).map(|_| dispatcher.dispatch().unwrap()).collect();

    let pending: Vec<_> = dispatcher.endpoints().iter().map(|e| e.pending()).collect();
    assert_eq!(pending, vec![10, 20, 40]);

    drop(guards);
    assert!(dispatcher.endpoints().iter().all(|e| e.pending() == 0));
}

#[tokio::test]
async fn test_concurrent_requests_follow_capacity() {
    let delay = Duration::from_millis(50);
    let a = MockBackend::new("a").serving(vector_tile()).with_delay(delay);
    let b = MockBackend::new("b").serving(vector_tile()).with_delay(delay);
    let c = MockBackend::new("c").serving(vector_tile()).with_delay(delay);

    let service = TileService::start(
        vec![(a.clone(), 1), (b.clone(), 1), (c.clone(), 2)],
        config(),
    )
    .await
    .unwrap();

    // One canary lookup per replica
    assert_eq!((a.call_count(), b.call_count(), c.call_count()), (1, 1, 1));

    let results = join_all((0..28).map(|i| service.get_tile(TileCoord::new(5, i, i)))).await;
    assert!(results.iter().all(|r| r.is_ok()));

    assert_eq!(a.call_count() - 1, 7);
    assert_eq!(b.call_count() - 1, 7);
    assert_eq!(c.call_count() - 1, 14);
    assert_eq!(c.max_in_flight(), 14);

    assert!(service.dispatcher().endpoints().iter().all(|e| e.pending() == 0));
}

#[tokio::test]
async fn test_idle_replicas_share_sequential_load() {
    let a = MockBackend::new("a").serving(vector_tile());
    let b = MockBackend::new("b").serving(vector_tile());
    let service = TileService::start(vec![(a.clone(), 3), (b.clone(), 3)], config())
        .await
        .unwrap();

    // With no overlap every request sees both replicas idle; the first wins.
    for i in 0..10 {
        service.get_tile(TileCoord::new(4, i, 0)).await.unwrap();
    }
    assert_eq!(a.call_count(), 11);
    assert_eq!(b.call_count(), 1);
}

// =============================================================================
// Pending Accounting
// =============================================================================

#[tokio::test]
async fn test_pending_released_on_failure() {
    let failing = TileCoord::new(3, 3, 3);
    let backend = MockBackend::new("a")
        .serving(vector_tile())
        .with_failure(failing, BackendError::Query("boom".to_string()));
    let service = TileService::start(vec![(backend, 2)], config()).await.unwrap();

    for _ in 0..5 {
        assert!(matches!(
            service.get_tile(failing).await,
            Err(TileError::Upstream(_))
        ));
    }
    assert_eq!(service.dispatcher().endpoints()[0].pending(), 0);
}

#[tokio::test]
async fn test_pending_released_for_rejected_coordinates() {
    let backend = MockBackend::new("a").serving(vector_tile());
    let service = TileService::start(vec![(backend.clone(), 2)], config())
        .await
        .unwrap();

    assert!(matches!(
        service.get_tile(TileCoord::new(20, 0, 0)).await,
        Err(TileError::NotFound)
    ));
    assert_eq!(service.dispatcher().endpoints()[0].pending(), 0);
    assert_eq!(backend.call_count(), 1);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_with_requests_in_flight() {
    let backend = MockBackend::new("a")
        .serving(vector_tile())
        .with_delay(Duration::from_millis(100));
    let service = Arc::new(
        TileService::start(vec![(backend.clone(), 4)], config())
            .await
            .unwrap(),
    );

    let in_flight = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.get_tile(TileCoord::new(2, 1, 1)).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    service.shutdown().await;
    assert!(backend.is_closed());

    // The lookup already running finishes on its own terms
    let result = in_flight.await.unwrap();
    assert!(matches!(result, Ok(_) | Err(TileError::Closed)));

    assert!(matches!(
        service.get_tile(TileCoord::new(2, 1, 1)).await,
        Err(TileError::Closed)
    ));
    assert_eq!(service.dispatcher().endpoints()[0].pending(), 0);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let a = MockBackend::new("a").serving(vector_tile());
    let b = MockBackend::new("b").serving(vector_tile());
    let service = TileService::start(vec![(a.clone(), 1), (b.clone(), 1)], config())
        .await
        .unwrap();

    service.shutdown().await;
    service.shutdown().await;

    assert!(service.is_closed());
    assert!(a.is_closed());
    assert!(b.is_closed());
}
