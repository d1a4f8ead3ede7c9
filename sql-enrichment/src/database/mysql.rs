use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::mysql::{
    MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode,
};
use sqlx::pool::PoolConnection;
use sqlx::types::Json;
use sqlx::{Column, MySql, Row, TypeInfo, ValueRef};
use tokio::runtime::Handle;
use tracing::instrument;

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

type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

/// MySQL connections from a lazily connecting sqlx pool.
pub struct MySqlSource {
    pool: MySqlPool,
}

impl MySqlSource {
    /// Builds the pool without connecting. The pool's background tasks are
    /// spawned on `handle`.
    pub fn connect_lazy(handle: &Handle, params: &ConnectionParams, config: &PoolConfig) -> Self {
        let _guard = handle.enter();

        let options = MySqlConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.username)
            .password(&params.password)
            .database(&params.database)
            .ssl_mode(ssl_mode(params.ssl_mode));

        let statement_ms = config.query_timeout;
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(config.idle_timeout())
            .max_lifetime(config.max_lifetime())
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    // Applies to SELECT statements only, which is all we run
                    sqlx::query(&format!("SET SESSION MAX_EXECUTION_TIME = {statement_ms}"))
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
impl ConnectionSource for MySqlSource {
    #[instrument(skip_all)]
    async fn acquire(&self) -> Result<Box<dyn SqlConnection>, DatabaseError> {
        let conn = self.pool.acquire().await.map_err(|e| {
            tracing::warn!(error = %e, timeout = is_timeout_error(&e), "Failed to acquire mysql connection");
            DatabaseError::Acquire(e.to_string())
        })?;
        Ok(Box::new(MySqlConnection {
            conn,
            broken: false,
        }))
    }
}

struct MySqlConnection {
    conn: PoolConnection<MySql>,
    broken: bool,
}

#[async_trait]
impl SqlConnection for MySqlConnection {
    #[instrument(skip_all)]
    async fn query(
        &mut self,
        query: &Query,
        params: &PlaceholderMap,
    ) -> Result<Vec<ResultRow>, DatabaseError> {
        let statement = params.values().fold(sqlx::query(query.sql()), bind);

        let rows = statement.fetch_all(&mut *self.conn).await.map_err(|e| {
            self.broken = is_transient_error(&e);
            tracing::warn!(error = %e, timeout = is_timeout_error(&e), "MySQL query failed");
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

// MySQL takes unsigned 64-bit integers natively, so every JSON number binds.
fn bind<'q>(statement: MySqlQuery<'q>, value: &PlaceholderValue) -> MySqlQuery<'q> {
    match value {
        PlaceholderValue::String(s) => statement.bind(s.clone()),
        PlaceholderValue::Boolean(b) => statement.bind(*b),
        PlaceholderValue::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => statement.bind(i),
            (None, Some(u), _) => statement.bind(u),
            (None, None, f) => statement.bind(f),
        },
    }
}

/// `sslMode: false` means plaintext, not "TLS if the server offers it".
fn ssl_mode(required: bool) -> MySqlSslMode {
    if required {
        MySqlSslMode::Required
    } else {
        MySqlSslMode::Disabled
    }
}

fn convert_row(row: &MySqlRow) -> Result<ResultRow, DatabaseError> {
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
    row: &MySqlRow,
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
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(index).map_err(err)?),
        "TINYINT" => Value::from(row.try_get::<i8, _>(index).map_err(err)?),
        "SMALLINT" => Value::from(row.try_get::<i16, _>(index).map_err(err)?),
        "MEDIUMINT" | "INT" => Value::from(row.try_get::<i32, _>(index).map_err(err)?),
        "BIGINT" => Value::from(row.try_get::<i64, _>(index).map_err(err)?),
        "TINYINT UNSIGNED" => Value::from(row.try_get::<u8, _>(index).map_err(err)?),
        "SMALLINT UNSIGNED" => Value::from(row.try_get::<u16, _>(index).map_err(err)?),
        "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => {
            Value::from(row.try_get::<u32, _>(index).map_err(err)?)
        }
        "BIGINT UNSIGNED" => Value::from(row.try_get::<u64, _>(index).map_err(err)?),
        "FLOAT" => float_to_json(f64::from(row.try_get::<f32, _>(index).map_err(err)?)),
        "DOUBLE" => float_to_json(row.try_get::<f64, _>(index).map_err(err)?),
        "DECIMAL" => decimal_to_json(row.try_get::<Decimal, _>(index).map_err(err)?),
        "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" => {
            Value::String(row.try_get::<String, _>(index).map_err(err)?)
        }
        "JSON" => row.try_get::<Json<Value>, _>(index).map_err(err)?.0,
        "TIMESTAMP" => timestamptz_to_json(row.try_get::<DateTime<Utc>, _>(index).map_err(err)?),
        "DATETIME" => timestamp_to_json(row.try_get::<NaiveDateTime, _>(index).map_err(err)?),
        "DATE" => date_to_json(row.try_get::<NaiveDate, _>(index).map_err(err)?),
        "TIME" => time_to_json(row.try_get::<NaiveTime, _>(index).map_err(err)?),
        other => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .map_err(|_| conversion_error(column, format!("unsupported type {other}")))?,
    };
    Ok(value)
}
