use async_trait::async_trait;
use bytes::Bytes;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};

use super::query::{ColumnValue, TileBackend, TileRow};
use crate::error::BackendError;

/// Create a lazily-connecting pool for one replica.
///
/// No connection is opened here; the first lookup (normally the startup
/// canary) establishes it. The pool never holds more than `capacity`
/// connections.
pub fn create_pg_pool(url: &str, capacity: u32) -> Result<PgPool, BackendError> {
    PgPoolOptions::new()
        .max_connections(capacity)
        .min_connections(0)
        .connect_lazy(url)
        .map_err(|e| BackendError::Connection(e.to_string()))
}

/// PostgreSQL implementation of [`TileBackend`].
///
/// Executes the configured statement with `$1, $2, $3` bound to `z, x, y`.
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
    statement: String,
    address: String,
}

impl PgBackend {
    /// Create a backend from a connection URL.
    pub fn connect_lazy(
        url: &str,
        capacity: u32,
        statement: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let pool = create_pg_pool(url, capacity)?;
        Ok(Self::with_pool(pool, statement, redact_address(url)))
    }

    /// Create a backend around an existing pool.
    pub fn with_pool(pool: PgPool, statement: impl Into<String>, address: String) -> Self {
        Self {
            pool,
            statement: statement.into(),
            address,
        }
    }
}

#[async_trait]
impl TileBackend for PgBackend {
    async fn query_tile(&self, z: u32, x: u32, y: u32) -> Result<Vec<TileRow>, BackendError> {
        if self.pool.is_closed() {
            return Err(BackendError::Closed);
        }

        let rows = sqlx::query(&self.statement)
            .bind(z as i32)
            .bind(x as i32)
            .bind(y as i32)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter().map(decode_row).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn address(&self) -> &str {
        &self.address
    }
}

fn map_sqlx_error(err: sqlx::Error) -> BackendError {
    match err {
        sqlx::Error::PoolClosed => BackendError::Closed,
        sqlx::Error::Io(e) => BackendError::Connection(e.to_string()),
        sqlx::Error::PoolTimedOut => BackendError::Connection("pool timed out".to_string()),
        other => BackendError::Query(other.to_string()),
    }
}

fn decode_row(row: &PgRow) -> Result<TileRow, BackendError> {
    let mut columns = Vec::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        let is_null = row
            .try_get_raw(index)
            .map(|raw| raw.is_null())
            .map_err(|e| decode_error(index, e))?;

        if is_null {
            columns.push(ColumnValue::Null);
            continue;
        }

        let type_name = column.type_info().name();
        let value = match type_name {
            "BYTEA" => {
                let bytes: Vec<u8> = row.try_get(index).map_err(|e| decode_error(index, e))?;
                ColumnValue::Bytes(Bytes::from(bytes))
            }
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                ColumnValue::Text(row.try_get(index).map_err(|e| decode_error(index, e))?)
            }
            other => ColumnValue::Other(other.to_string()),
        };
        columns.push(value);
    }

    Ok(TileRow::new(columns))
}

fn decode_error(column: usize, err: sqlx::Error) -> BackendError {
    BackendError::Decode {
        column,
        message: err.to_string(),
    }
}

/// Remove the password from a connection URL so it can be logged.
pub fn redact_address(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let Some(at) = rest.rfind('@') else {
        return url.to_string();
    };

    let credentials = &rest[..at];
    match credentials.split_once(':') {
        Some((user, _password)) => format!(
            "{}{}:***@{}",
            &url[..scheme_end + 3],
            user,
            &rest[at + 1..]
        ),
        None => url.to_string(),
    }
}
