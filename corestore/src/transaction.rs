//! Transaction management across both backends.
//!
//! A [`Transaction`] acquires the adapter, begins a backend transaction,
//! runs statements through it, and on success commits; on any failure it
//! rolls back and marks itself poisoned so that further statements
//! short-circuit without touching the connection again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use corestore_common::{Result, StoreError};
use tokio::sync::OwnedMutexGuard;

use crate::backend::postgres::PostgresDriver;
use crate::backend::sqlite::SqliteDriver;
use crate::query::QueryBuilder;
use crate::value::{Value, ValueRow};

/// Transaction isolation levels. Maps to PostgreSQL's `BEGIN ISOLATION
/// LEVEL ...`; SQLite has no isolation-level keyword, so only
/// [`IsolationLevel::Serializable`] changes its `BEGIN` form there (to
/// `BEGIN IMMEDIATE`, which takes the write lock up front).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn to_postgres_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,
    pub access_mode: AccessMode,
    /// The acting user, written into `serenity.user` (PostgreSQL session
    /// variable) or `__session_vars` (SQLite) so triggers and delta rows
    /// can attribute the mutation.
    pub user_id: i64,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access_mode = AccessMode::ReadOnly;
        self
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = user_id;
        self
    }

    /// Statements to run immediately after a plain `BEGIN` to apply the
    /// isolation level and the `serenity.user`/`serenity.now` session
    /// variables the spec calls for. `SET TRANSACTION` (as opposed to
    /// `BEGIN ISOLATION LEVEL`) is used because `sqlx::Pool::begin` already
    /// issued the bare `BEGIN`. `serenity.now` is a millisecond epoch, not
    /// an RFC3339 string, because the generated delta trigger casts it with
    /// `::bigint`.
    fn postgres_begin_sql(&self) -> String {
        let access = match self.access_mode {
            AccessMode::ReadWrite => "READ WRITE",
            AccessMode::ReadOnly => "READ ONLY",
        };
        format!(
            "SET TRANSACTION ISOLATION LEVEL {}, {access}; SET LOCAL serenity.user = '{}'; SET LOCAL serenity.now = '{}'",
            self.isolation_level.to_postgres_sql(),
            self.user_id,
            chrono::Utc::now().timestamp_millis(),
        )
    }

    fn sqlite_begin_sql(&self) -> &'static str {
        match self.isolation_level {
            IsolationLevel::Serializable => "BEGIN IMMEDIATE",
            _ => "BEGIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Committed,
    RolledBack,
}

enum Backend {
    Postgres(sqlx::Transaction<'static, sqlx::Postgres>),
    Sqlite(OwnedMutexGuard<rusqlite::Connection>),
}

/// An active transaction against one backend. Not `Clone`: the spec's
/// "nested acquire returns the same handle" semantics are expressed by the
/// caller holding one `Transaction` behind a reference-counted handle
/// (e.g. inside [`crate::worker::Worker`]) rather than by this type
/// supporting reentrant `begin`.
pub struct Transaction {
    backend: Backend,
    poisoned: Arc<AtomicBool>,
    status: Status,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("poisoned", &self.poisoned.load(Ordering::Acquire))
            .field("status", &self.status)
            .finish()
    }
}

impl Transaction {
    pub async fn begin_postgres(driver: &PostgresDriver, options: TransactionOptions) -> Result<Self> {
        let mut tx = driver.pool().begin().await?;
        for stmt in options.postgres_begin_sql().split("; ") {
            sqlx::query(stmt).execute(&mut *tx).await.map_err(StoreError::from)?;
        }
        Ok(Self {
            backend: Backend::Postgres(tx),
            poisoned: Arc::new(AtomicBool::new(false)),
            status: Status::Active,
        })
    }

    pub async fn begin_sqlite(driver: &SqliteDriver, options: TransactionOptions) -> Result<Self> {
        driver.set_session_user(options.user_id).await?;
        let conn = driver.connection_handle().lock_owned().await;
        conn.execute_batch(options.sqlite_begin_sql()).map_err(StoreError::from)?;
        Ok(Self {
            backend: Backend::Sqlite(conn),
            poisoned: Arc::new(AtomicBool::new(false)),
            status: Status::Active,
        })
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub fn kind(&self) -> crate::backend::BackendKind {
        match &self.backend {
            Backend::Postgres(_) => crate::backend::BackendKind::Postgres,
            Backend::Sqlite(_) => crate::backend::BackendKind::Sqlite,
        }
    }

    /// Explicit cancel: further statements on this handle short-circuit
    /// without reaching the connection, matching the spec's `cancel()`.
    pub fn cancel(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        if self.is_poisoned() {
            return Err(StoreError::logic("transaction is poisoned; statement rejected"));
        }
        let result = match &mut self.backend {
            Backend::Postgres(tx) => {
                let args = crate::backend::postgres::bind_arguments(params)?;
                sqlx::query_with(sql, args).execute(&mut **tx).await.map(|r| r.rows_affected()).map_err(StoreError::from)
            }
            Backend::Sqlite(conn) => {
                let bound = crate::backend::sqlite::to_rusqlite_params(params);
                conn.execute(sql, rusqlite::params_from_iter(bound.iter())).map(|n| n as u64).map_err(StoreError::from)
            }
        };
        if result.is_err() {
            self.poisoned.store(true, Ordering::Release);
        }
        result
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<ValueRow>> {
        if self.is_poisoned() {
            return Err(StoreError::logic("transaction is poisoned; statement rejected"));
        }
        let result = match &mut self.backend {
            Backend::Postgres(tx) => {
                let args = crate::backend::postgres::bind_arguments(params)?;
                let rows = sqlx::query_with(sql, args).fetch_all(&mut **tx).await.map_err(StoreError::from)?;
                rows.iter().map(crate::backend::postgres::row_to_value_row).collect::<Result<Vec<_>>>()
            }
            Backend::Sqlite(conn) => crate::backend::sqlite::fetch_all_sync(conn, sql, params),
        };
        if result.is_err() {
            self.poisoned.store(true, Ordering::Release);
        }
        result
    }

    pub async fn fetch_optional(&mut self, sql: &str, params: &[Value]) -> Result<Option<ValueRow>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    pub async fn savepoint(&mut self, name: &str) -> Result<()> {
        QueryBuilder::validate_identifier(name)?;
        self.execute(&format!("SAVEPOINT {name}"), &[]).await.map(|_| ())
    }

    pub async fn rollback_to(&mut self, name: &str) -> Result<()> {
        QueryBuilder::validate_identifier(name)?;
        self.execute(&format!("ROLLBACK TO SAVEPOINT {name}"), &[]).await.map(|_| ())
    }

    pub async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        QueryBuilder::validate_identifier(name)?;
        self.execute(&format!("RELEASE SAVEPOINT {name}"), &[]).await.map(|_| ())
    }

    pub async fn commit(mut self) -> Result<()> {
        if self.is_poisoned() {
            return self.rollback().await.and_then(|_| {
                Err(StoreError::logic("cannot commit a poisoned transaction"))
            });
        }
        self.status = Status::Committed;
        match self.backend {
            Backend::Postgres(tx) => tx.commit().await.map_err(StoreError::from),
            Backend::Sqlite(conn) => conn.execute_batch("COMMIT").map_err(StoreError::from),
        }
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.status = Status::RolledBack;
        self.poisoned.store(true, Ordering::Release);
        match self.backend {
            Backend::Postgres(tx) => tx.rollback().await.map_err(StoreError::from),
            Backend::Sqlite(conn) => conn.execute_batch("ROLLBACK").map_err(StoreError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_level_sql_strings() {
        assert_eq!(IsolationLevel::ReadCommitted.to_postgres_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::Serializable.to_postgres_sql(), "SERIALIZABLE");
    }

    #[test]
    fn sqlite_serializable_uses_begin_immediate() {
        let opts = TransactionOptions::new().isolation_level(IsolationLevel::Serializable);
        assert_eq!(opts.sqlite_begin_sql(), "BEGIN IMMEDIATE");
        let opts = TransactionOptions::new().isolation_level(IsolationLevel::ReadCommitted);
        assert_eq!(opts.sqlite_begin_sql(), "BEGIN");
    }

    #[test]
    fn postgres_begin_sql_sets_session_vars() {
        let opts = TransactionOptions::new().user(42);
        let sql = opts.postgres_begin_sql();
        assert!(sql.contains("serenity.user = '42'"));
        assert!(sql.contains("serenity.now"));
    }
}
