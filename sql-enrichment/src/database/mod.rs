pub mod database_models;
pub mod dispatcher;
pub mod mysql;
pub mod postgres;
pub mod values;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::Error as SqlxError;
use std::sync::Arc;
use thiserror::Error;

use crate::inputs::{Placeholder, PlaceholderMap};
use crate::query::Query;

pub use database_models::{ConnectionParams, DatabaseSettings, PoolConfig, Rdbms};
pub use dispatcher::{BlockingDispatcher, DispatchPermit, Stage, StageTimeouts};
pub use mysql::MySqlSource;
pub use postgres::PostgresSource;

/// One result row: column name and converted value, in select-list order.
pub type ResultRow = Vec<(String, Value)>;

pub type SharedConnectionSource = Arc<dyn ConnectionSource>;

/// Messages only, so the error can be cloned to every caller waiting on the
/// same lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("{0}")]
    Acquire(String),
    #[error("{0}")]
    Query(String),
    #[error("could not bind placeholder {placeholder}: {message}")]
    Bind {
        placeholder: Placeholder,
        message: String,
    },
    #[error("could not convert column {column}: {message}")]
    Conversion { column: String, message: String },
    #[error("{0}")]
    Release(String),
}

/// Hands out connections. Shared by every concurrent lookup of one
/// enrichment, so `acquire` must be safe to call concurrently.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn SqlConnection>, DatabaseError>;
}

/// A connection exclusively owned by one lookup until it is released.
#[async_trait]
pub trait SqlConnection: Send {
    /// Binds `params` in placeholder order and runs `query`.
    async fn query(
        &mut self,
        query: &Query,
        params: &PlaceholderMap,
    ) -> Result<Vec<ResultRow>, DatabaseError>;

    /// Gives the connection back. Connections that saw a transient failure
    /// are closed rather than reused.
    async fn release(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// Determines if a sqlx::Error means the connection itself should not be reused
pub fn is_transient_error(error: &SqlxError) -> bool {
    match error {
        SqlxError::Io(_) | SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Tls(_) => {
            true
        }

        SqlxError::Database(db_error) => {
            if let Some(code) = db_error.code() {
                let code = code.as_ref();
                // Postgres SQLSTATE classes 08 (connection), 53 (resources),
                // 57 (operator intervention), 58 (system). MySQL reports
                // 08S01 for a lost connection.
                code.starts_with("08")
                    || code.starts_with("53")
                    || code.starts_with("57")
                    || code.starts_with("58")
            } else {
                let msg = db_error.message().to_lowercase();
                msg.contains("connection")
                    || msg.contains("terminating")
                    || msg.contains("gone away")
                    || msg.contains("lost")
            }
        }

        SqlxError::Protocol(msg) => {
            let m = msg.to_lowercase();
            m.contains("connection") || m.contains("timeout") || m.contains("ssl") || m.contains("tls")
        }

        _ => false,
    }
}

/// Whether the error is a server- or pool-side timeout
pub fn is_timeout_error(error: &SqlxError) -> bool {
    match error {
        SqlxError::PoolTimedOut => true,
        SqlxError::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
        // 57014: query_canceled, raised by statement_timeout. MySQL only
        // reports max_execution_time through the message.
        SqlxError::Database(db_error) => {
            db_error.code().is_some_and(|code| code.as_ref() == "57014")
                || db_error
                    .message()
                    .to_lowercase()
                    .contains("execution time exceeded")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_error_connection_errors() {
        assert!(is_transient_error(&SqlxError::PoolTimedOut));
        assert!(is_transient_error(&SqlxError::PoolClosed));

        let io_error = SqlxError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(is_transient_error(&io_error));
    }

    #[test]
    fn test_is_transient_error_protocol_errors() {
        assert!(is_transient_error(&SqlxError::Protocol(
            "connection lost".to_string()
        )));
        assert!(!is_transient_error(&SqlxError::Protocol(
            "invalid protocol version".to_string()
        )));
    }

    #[test]
    fn test_is_transient_error_non_transient_errors() {
        assert!(!is_transient_error(&SqlxError::ColumnNotFound(
            "missing_column".to_string()
        )));
        assert!(!is_transient_error(&SqlxError::RowNotFound));
        assert!(!is_transient_error(&SqlxError::Configuration(Box::new(
            std::io::Error::other("invalid connection string")
        ))));
    }

    #[test]
    fn test_is_timeout_error() {
        assert!(is_timeout_error(&SqlxError::PoolTimedOut));
        assert!(is_timeout_error(&SqlxError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out"
        ))));
        assert!(!is_timeout_error(&SqlxError::RowNotFound));
    }
}
