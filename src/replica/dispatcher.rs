use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tracing::{debug, info};

use super::endpoint::ReplicaEndpoint;
use crate::backend::TileBackend;

/// Owns every replica endpoint and picks one per request.
///
/// Selection is weighted least-pending: the endpoint with the smallest
/// `weight × pending` wins, the first one in configuration order on ties.
/// Since `weight` is inversely proportional to capacity, a replica
/// configured with twice the capacity receives twice as many concurrent
/// requests.
pub struct Dispatcher<B: TileBackend> {
    endpoints: Vec<ReplicaEndpoint<B>>,
    closed: AtomicBool,
}

impl<B: TileBackend> Dispatcher<B> {
    /// Create a dispatcher from `(backend, capacity)` pairs.
    pub fn new(replicas: Vec<(B, u32)>) -> Self {
        let max_capacity = replicas
            .iter()
            .map(|(_, capacity)| *capacity)
            .max()
            .unwrap_or(1);

        let endpoints = replicas
            .into_iter()
            .map(|(backend, capacity)| ReplicaEndpoint::new(backend, capacity, max_capacity))
            .collect();

        Self {
            endpoints,
            closed: AtomicBool::new(false),
        }
    }

    pub fn endpoints(&self) -> &[ReplicaEndpoint<B>] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Select the least-loaded endpoint without reserving it.
    pub fn pick(&self) -> Option<&ReplicaEndpoint<B>> {
        let mut best: Option<(&ReplicaEndpoint<B>, f64)> = None;
        for endpoint in &self.endpoints {
            let load = endpoint.load();
            match best {
                Some((_, best_load)) if load >= best_load => {}
                _ => best = Some((endpoint, load)),
            }
        }
        best.map(|(endpoint, _)| endpoint)
    }

    /// Select the least-loaded endpoint and count the request against it.
    ///
    /// Returns `None` when the dispatcher is shut down or has no endpoints.
    ///
    /// Selection and reservation are separate atomic steps, so concurrent
    /// callers may pick the same endpoint. The balance is approximate under
    /// contention.
    pub fn dispatch(&self) -> Option<DispatchGuard<'_, B>> {
        if self.is_closed() {
            return None;
        }
        let endpoint = self.pick()?;
        debug!(
            replica = endpoint.address(),
            pending = endpoint.pending(),
            "Dispatching tile request"
        );
        Some(DispatchGuard::new(endpoint))
    }

    /// Drop the endpoints at the given indices, closing their pools.
    ///
    /// Only meant for startup, before any request has been dispatched.
    pub async fn exclude(&mut self, indices: &[usize]) {
        let mut kept = Vec::with_capacity(self.endpoints.len());
        let mut removed = Vec::new();
        for (index, endpoint) in std::mem::take(&mut self.endpoints).into_iter().enumerate() {
            if indices.contains(&index) {
                removed.push(endpoint);
            } else {
                kept.push(endpoint);
            }
        }
        self.endpoints = kept;

        for endpoint in &removed {
            info!(replica = endpoint.address(), "Excluding replica");
            endpoint.backend().close().await;
        }
    }

    /// Close every endpoint's pool.
    ///
    /// Safe to call repeatedly and while requests are in flight: new
    /// dispatches are refused immediately, and in-flight lookups fail with
    /// the backend's closed error.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(replicas = self.endpoints.len(), "Closing replica pools");
        join_all(self.endpoints.iter().map(|e| e.backend().close())).await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// An in-flight request on one endpoint.
///
/// Created by [`Dispatcher::dispatch`]; the endpoint's pending count is
/// released when the guard is dropped, whatever the outcome of the call.
pub struct DispatchGuard<'a, B: TileBackend> {
    endpoint: &'a ReplicaEndpoint<B>,
}

impl<'a, B: TileBackend> DispatchGuard<'a, B> {
    pub(crate) fn new(endpoint: &'a ReplicaEndpoint<B>) -> Self {
        endpoint.acquire();
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &'a ReplicaEndpoint<B> {
        self.endpoint
    }
}

impl<B: TileBackend> Deref for DispatchGuard<'_, B> {
    type Target = ReplicaEndpoint<B>;

    fn deref(&self) -> &Self::Target {
        self.endpoint
    }
}

impl<B: TileBackend> Drop for DispatchGuard<'_, B> {
    fn drop(&mut self) {
        self.endpoint.release();
    }
}
