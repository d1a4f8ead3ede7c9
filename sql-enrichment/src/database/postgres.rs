use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::types::Json;
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use crate::database::values::{
    conversion_error, date_to_json, decimal_to_json, float_to_json, time_to_json,
    timestamp_to_json, timestamptz_to_json,
};
use crate::database::{
    is_timeout_error, is_transient_error, ConnectionParams, ConnectionSource, DatabaseError,
    PoolConfig, ResultRow, SqlConnection,
};
use crate::inputs::{PlaceholderMap, PlaceholderValue};
use crate::query::Query;

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Postgres connections from a lazily connecting sqlx pool.
pub struct PostgresSource {
    pool: PgPool,
}

impl PostgresSource {
    /// Builds the pool without connecting. The pool's background tasks are
    /// spawned on `handle`, which must be the runtime the dispatcher uses.
    pub fn connect_lazy(handle: &Handle, params: &ConnectionParams, config: &PoolConfig) -> Self {
        let _guard = handle.enter();

        let options = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.username)
            .password(&params.password)
            .database(&params.database)
            .ssl_mode(ssl_mode(params.ssl_mode));

        let statement_ms = config.query_timeout;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(config.idle_timeout())
            .max_lifetime(config.max_lifetime())
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    // SET does not accept bind parameters
                    sqlx::query(&format!("SET statement_timeout = '{statement_ms}ms'"))
                        .execute(&mut *conn)
                        .await?;
                    // Lookups are read-only
                    sqlx::query("SET default_transaction_read_only = on")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect_lazy_with(options);

        Self { pool }
    }
}

#[async_trait]
impl ConnectionSource for PostgresSource {
    #[instrument(skip_all)]
    async fn acquire(&self) -> Result<Box<dyn SqlConnection>, DatabaseError> {
        let conn = self.pool.acquire().await.map_err(|e| {
            tracing::warn!(error = %e, timeout = is_timeout_error(&e), "Failed to acquire postgres connection");
            DatabaseError::Acquire(e.to_string())
        })?;
        Ok(Box::new(PostgresConnection {
            conn,
            broken: false,
        }))
    }
}

struct PostgresConnection {
    conn: PoolConnection<Postgres>,
    broken: bool,
}

#[async_trait]
impl SqlConnection for PostgresConnection {
    #[instrument(skip_all)]
    async fn query(
        &mut self,
        query: &Query,
        params: &PlaceholderMap,
    ) -> Result<Vec<ResultRow>, DatabaseError> {
        let mut statement = sqlx::query(query.postgres_sql());
        for (index, value) in params.values().enumerate() {
            statement = bind(statement, index + 1, value)?;
        }

        let rows = statement.fetch_all(&mut *self.conn).await.map_err(|e| {
            self.broken = is_transient_error(&e);
            tracing::warn!(error = %e, timeout = is_timeout_error(&e), "Postgres query failed");
            DatabaseError::Query(e.to_string())
        })?;

        rows.iter().map(convert_row).collect()
    }

    async fn release(self: Box<Self>) -> Result<(), DatabaseError> {
        if self.broken {
            self.conn
                .close()
                .await
                .map_err(|e| DatabaseError::Release(e.to_string()))
        } else {
            drop(self.conn);
            Ok(())
        }
    }
}

fn bind<'q>(
    statement: PgQuery<'q>,
    placeholder: usize,
    value: &PlaceholderValue,
) -> Result<PgQuery<'q>, DatabaseError> {
    match value {
        PlaceholderValue::String(s) => Ok(statement.bind(s.clone())),
        PlaceholderValue::Boolean(b) => Ok(statement.bind(*b)),
        PlaceholderValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(statement.bind(i))
            } else if let Some(u) = n.as_u64() {
                // Postgres has no unsigned 64-bit type
                Ok(statement.bind(Decimal::from(u)))
            } else if let Some(f) = n.as_f64() {
                Ok(statement.bind(f))
            } else {
                Err(DatabaseError::Bind {
                    placeholder: u32::try_from(placeholder).unwrap_or(u32::MAX),
                    message: format!("{n} is not representable as a postgres number"),
                })
            }
        }
    }
}

/// `sslMode: false` means plaintext, not "TLS if the server offers it".
fn ssl_mode(required: bool) -> PgSslMode {
    if required {
        PgSslMode::Require
    } else {
        PgSslMode::Disable
    }
}

fn convert_row(row: &PgRow) -> Result<ResultRow, DatabaseError> {
    row.columns()
        .iter()
        .map(|column| {
            let name = column.name();
            convert_value(row, column.ordinal(), name, column.type_info().name())
                .map(|value| (name.to_string(), value))
        })
        .collect()
}

fn convert_value(
    row: &PgRow,
    index: usize,
    column: &str,
    type_name: &str,
) -> Result<Value, DatabaseError> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| conversion_error(column, e))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let err = |e: sqlx::Error| conversion_error(column, e);
    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get::<bool, _>(index).map_err(err)?),
        "INT2" => Value::from(row.try_get::<i16, _>(index).map_err(err)?),
        "INT4" => Value::from(row.try_get::<i32, _>(index).map_err(err)?),
        "INT8" => Value::from(row.try_get::<i64, _>(index).map_err(err)?),
        "FLOAT4" => float_to_json(f64::from(row.try_get::<f32, _>(index).map_err(err)?)),
        "FLOAT8" => float_to_json(row.try_get::<f64, _>(index).map_err(err)?),
        "NUMERIC" => decimal_to_json(row.try_get::<Decimal, _>(index).map_err(err)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            Value::String(row.try_get::<String, _>(index).map_err(err)?)
        }
        "JSON" | "JSONB" => row.try_get::<Json<Value>, _>(index).map_err(err)?.0,
        "UUID" => Value::String(row.try_get::<Uuid, _>(index).map_err(err)?.to_string()),
        "TIMESTAMPTZ" => timestamptz_to_json(row.try_get::<DateTime<Utc>, _>(index).map_err(err)?),
        "TIMESTAMP" => timestamp_to_json(row.try_get::<NaiveDateTime, _>(index).map_err(err)?),
        "DATE" => date_to_json(row.try_get::<NaiveDate, _>(index).map_err(err)?),
        "TIME" => time_to_json(row.try_get::<NaiveTime, _>(index).map_err(err)?),
        // Enums, domains and other text-like types
        other => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .map_err(|_| conversion_error(column, format!("unsupported type {other}")))?,
    };
    Ok(value)
}
