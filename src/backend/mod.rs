//! Query-execution layer.
//!
//! The tile lookup is an opaque parametrized statement. Everything above this
//! module only sees rows of one or two columns, produced by a [`TileBackend`].

mod postgres;
mod query;

pub use postgres::{create_pg_pool, redact_address, PgBackend};
pub use query::{ColumnValue, TileBackend, TileRow};
