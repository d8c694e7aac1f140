use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::TileBackend;

/// One backend replica together with its load accounting.
///
/// `pending` is only changed through [`acquire`](ReplicaEndpoint::acquire)
/// and [`release`](ReplicaEndpoint::release), which the dispatcher pairs via
/// [`DispatchGuard`](super::DispatchGuard).
pub struct ReplicaEndpoint<B: TileBackend> {
    backend: B,
    capacity: u32,
    weight: f64,
    pending: AtomicUsize,
}

impl<B: TileBackend> ReplicaEndpoint<B> {
    /// Create an endpoint.
    ///
    /// `max_capacity` is the largest capacity across all replicas; the
    /// weight is fixed here and never recomputed.
    pub(crate) fn new(backend: B, capacity: u32, max_capacity: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            backend,
            capacity,
            weight: f64::from(max_capacity.max(capacity)) / f64::from(capacity),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn address(&self) -> &str {
        self.backend.address()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Current number of in-flight requests.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Load score used for dispatch: `weight × pending`.
    pub fn load(&self) -> f64 {
        self.weight * self.pending() as f64
    }

    pub(crate) fn acquire(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        // Saturating so a stray release can never wrap the counter.
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

impl<B: TileBackend> std::fmt::Debug for ReplicaEndpoint<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaEndpoint")
            .field("address", &self.address())
            .field("capacity", &self.capacity)
            .field("weight", &self.weight)
            .field("pending", &self.pending())
            .finish()
    }
}
