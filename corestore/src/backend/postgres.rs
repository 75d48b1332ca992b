//! PostgreSQL adapter: connection pooling, retrying statement execution,
//! row decoding by column type name, and `LISTEN`/`NOTIFY` support.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use corestore_common::{Result, StoreError};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Arguments, Column, Row as SqlxRow, TypeInfo};
use tracing::{info, instrument, warn};

use crate::value::{Value, ValueRow};

use super::{BackendKind, Driver, Statement};

/// Retry configuration for connection establishment and statement retry.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(self.initial_delay_ms);
        }
        let delay_ms = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((delay_ms as u64).min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout: u64,
    pub max_lifetime: Option<u64>,
    pub idle_timeout: Option<u64>,
    pub retry: RetryConfig,
    pub statement_cache_capacity: usize,
    /// Threshold above which a completed query is logged at `warn` level.
    pub slow_query_threshold_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            connect_timeout: 30,
            max_lifetime: Some(1800),
            idle_timeout: Some(600),
            retry: RetryConfig::default(),
            statement_cache_capacity: 100,
            slow_query_threshold_ms: 250,
        }
    }
}

pub struct PostgresDriver {
    pool: PgPool,
    config: PoolConfig,
}

impl std::fmt::Debug for PostgresDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDriver")
            .field("size", &self.pool.size())
            .field("num_idle", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresDriver {
    #[instrument(skip(uri), fields(max_connections = config.max_connections, max_retries = config.retry.max_retries))]
    pub async fn connect(uri: &str, config: PoolConfig) -> Result<Self> {
        if uri.is_empty() {
            return Err(StoreError::ConnectionLost("connection URI cannot be empty".into()));
        }
        info!("initializing PostgreSQL connection pool");

        let mut pool_options = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout));
        if let Some(secs) = config.max_lifetime {
            pool_options = pool_options.max_lifetime(Duration::from_secs(secs));
        }
        if let Some(secs) = config.idle_timeout {
            pool_options = pool_options.idle_timeout(Duration::from_secs(secs));
        }

        let connect_options = PgConnectOptions::from_str(uri)
            .map_err(|e| StoreError::ConnectionLost(format!("invalid connection URI: {e}")))?
            .statement_cache_capacity(config.statement_cache_capacity);

        let pool = Self::connect_with_retry(pool_options, connect_options, &config.retry).await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        info!("PostgreSQL connection pool ready");
        Ok(Self { pool, config })
    }

    async fn connect_with_retry(
        pool_options: PgPoolOptions,
        connect_options: PgConnectOptions,
        retry: &RetryConfig,
    ) -> Result<PgPool> {
        let mut last_error = None;
        for attempt in 0..=retry.max_retries {
            match pool_options.clone().connect_with(connect_options.clone()).await {
                Ok(pool) => {
                    if attempt > 0 {
                        info!(attempt, "connection established after retry");
                    }
                    return Ok(pool);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < retry.max_retries {
                        let delay = retry.delay_for_attempt(attempt);
                        warn!(attempt, delay_ms = delay.as_millis() as u64, "connection failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_error.map(StoreError::from).unwrap_or_else(|| {
            StoreError::ConnectionLost("connection failed with no underlying error".into())
        }))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs `f` with automatic retry/backoff when the resulting error is
    /// classified retryable (deadlock, timeout, serialization failure).
    async fn with_retry<T, F, Fut>(&self, label: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            let started = std::time::Instant::now();
            match f().await {
                Ok(value) => {
                    let elapsed = started.elapsed();
                    if elapsed.as_millis() as u64 > self.config.slow_query_threshold_ms {
                        warn!(label, elapsed_ms = elapsed.as_millis() as u64, "slow query");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < retry.max_retries => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(label, attempt, error = %err, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Sets up the `LISTEN <channel>` notification path. The spec's
    /// non-blocking fd-poll contract is replaced with `sqlx::PgListener`'s
    /// async stream, which is the idiomatic equivalent under Tokio.
    pub async fn listen(&self, channel: &str) -> Result<sqlx::postgres::PgListener> {
        let mut listener = sqlx::postgres::PgListener::connect_with(&self.pool).await?;
        listener.listen(channel).await?;
        Ok(listener)
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn prepare_statement(&self, sql: &str, params: Vec<Value>) -> Statement {
        let sql = super::rewrite_markers(
            sql,
            |field, ph| format!("{field} @@ plainto_tsquery({ph})"),
            |field, ph| format!("{field} @> ARRAY[{ph}]"),
        );
        Statement { sql, params }
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.with_retry("execute", || async {
            let args = bind_arguments(params)?;
            let result = sqlx::query_with(sql, args).execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<ValueRow>> {
        self.with_retry("fetch_all", || async {
            let args = bind_arguments(params)?;
            let rows = sqlx::query_with(sql, args).fetch_all(&self.pool).await?;
            rows.iter().map(row_to_value_row).collect::<Result<Vec<_>>>()
        })
        .await
    }

    async fn begin(&self, isolation_sql: &str) -> Result<()> {
        sqlx::query(isolation_sql).execute(&self.pool).await?;
        Ok(())
    }
}

/// Binds a column of backend-neutral [`Value`]s onto a fresh
/// [`PgArguments`]. Extracted from `QueryBuilder`-produced params, which
/// already carry precise variants (`Int` vs `BigInt`, etc).
pub(crate) fn bind_arguments(values: &[Value]) -> Result<PgArguments> {
    let mut args = PgArguments::default();
    for value in values {
        match value {
            Value::Null => args.add(Option::<i32>::None).map_err(bind_err)?,
            Value::Bool(v) => args.add(*v).map_err(bind_err)?,
            Value::SmallInt(v) => args.add(*v).map_err(bind_err)?,
            Value::Int(v) => args.add(*v).map_err(bind_err)?,
            Value::BigInt(v) => args.add(*v).map_err(bind_err)?,
            Value::Float(v) => args.add(*v).map_err(bind_err)?,
            Value::Double(v) => args.add(*v).map_err(bind_err)?,
            Value::Decimal(v) => args.add(*v).map_err(bind_err)?,
            Value::Text(v) => args.add(v).map_err(bind_err)?,
            Value::Bytes(v) => args.add(v).map_err(bind_err)?,
            Value::Uuid(v) => args.add(*v).map_err(bind_err)?,
            Value::Date(v) => args.add(*v).map_err(bind_err)?,
            Value::Time(v) => args.add(*v).map_err(bind_err)?,
            Value::Timestamp(v) => args.add(*v).map_err(bind_err)?,
            Value::TimestampTz(v) => args.add(*v).map_err(bind_err)?,
            Value::Json(v) => args.add(v).map_err(bind_err)?,
            Value::ObjectId(v) => args.add(*v).map_err(bind_err)?,
            Value::Array(items) | Value::Set(items) => {
                let texts: Vec<String> =
                    items.iter().map(|v| v.as_text().unwrap_or_default().to_string()).collect();
                args.add(texts).map_err(bind_err)?
            }
        }
    }
    Ok(args)
}

fn bind_err(e: sqlx::error::BoxDynError) -> StoreError {
    StoreError::Validation(format!("failed to bind parameter: {e}"))
}

/// Decodes one `PgRow` into a [`ValueRow`], dispatching on the column's
/// reported type name rather than the raw `pg_type` oid - `sqlx` already
/// resolves that mapping for us, so there is no need to query `pg_type`
/// directly the way a hand-rolled wire client would.
pub(crate) fn row_to_value_row(row: &PgRow) -> Result<ValueRow> {
    let mut out = ValueRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let type_name = column.type_info().name();
        let value = decode_column(row, idx, type_name, &name)?;
        out.insert(name, value);
    }
    Ok(out)
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str, column_name: &str) -> Result<Value> {
    let query_err = |e: sqlx::Error| StoreError::Backend(format!("column '{column_name}': {e}"));
    Ok(match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(idx).map_err(query_err)?.map(Value::Bool).unwrap_or(Value::Null),
        "INT2" => row.try_get::<Option<i16>, _>(idx).map_err(query_err)?.map(Value::SmallInt).unwrap_or(Value::Null),
        "INT4" => row.try_get::<Option<i32>, _>(idx).map_err(query_err)?.map(Value::Int).unwrap_or(Value::Null),
        "INT8" => row.try_get::<Option<i64>, _>(idx).map_err(query_err)?.map(Value::BigInt).unwrap_or(Value::Null),
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx).map_err(query_err)?.map(Value::Float).unwrap_or(Value::Null),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx).map_err(query_err)?.map(Value::Double).unwrap_or(Value::Null),
        "NUMERIC" => row.try_get::<Option<Decimal>, _>(idx).map_err(query_err)?.map(Value::Decimal).unwrap_or(Value::Null),
        "VARCHAR" | "TEXT" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(idx).map_err(query_err)?.map(Value::Text).unwrap_or(Value::Null)
        }
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(idx).map_err(query_err)?.map(Value::Bytes).unwrap_or(Value::Null),
        "UUID" => row.try_get::<Option<uuid::Uuid>, _>(idx).map_err(query_err)?.map(Value::Uuid).unwrap_or(Value::Null),
        "DATE" => row.try_get::<Option<chrono::NaiveDate>, _>(idx).map_err(query_err)?.map(Value::Date).unwrap_or(Value::Null),
        "TIME" => row.try_get::<Option<chrono::NaiveTime>, _>(idx).map_err(query_err)?.map(Value::Time).unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map_err(query_err)?
            .map(Value::Timestamp)
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map_err(query_err)?
            .map(Value::TimestampTz)
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(idx)
            .map_err(query_err)?
            .map(Value::Json)
            .unwrap_or(Value::Null),
        unknown => {
            warn!(type_name = unknown, column_name, "unrecognized PostgreSQL column type, decoding as text");
            row.try_get::<Option<String>, _>(idx).map_err(query_err)?.map(Value::Text).unwrap_or(Value::Null)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_backs_off_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(5), Duration::from_millis(1000));
    }

    #[test]
    fn no_retry_config_has_zero_attempts() {
        assert_eq!(RetryConfig::no_retry().max_retries, 0);
    }
}
