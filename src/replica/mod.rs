//! Replica pool and weighted least-pending dispatch.
//!
//! Every replica is assumed to serve identical data. The [`Dispatcher`] owns
//! one [`ReplicaEndpoint`] per replica and hands out [`DispatchGuard`]s that
//! keep the endpoint's in-flight count accurate for the duration of a call.

mod dispatcher;
mod endpoint;

pub use dispatcher::{DispatchGuard, Dispatcher};
pub use endpoint::ReplicaEndpoint;
