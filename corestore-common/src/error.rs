//! Unified error type shared by every corestore crate.

use thiserror::Error;

/// Result type alias for corestore operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error kinds shared across the schema model, query builder, and backend
/// adapters.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// A statement reached the backend and failed there. Carries the
    /// driver's message and, where available, the offending SQL.
    #[error("backend error: {0}")]
    Backend(String),

    /// The connection is no longer usable and the adapter holding it must
    /// be discarded rather than retried.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Migration could not bring the backend schema in line with the
    /// declared scheme set.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A value failed a field's transform or invariant check. Does not
    /// poison an in-flight transaction.
    #[error("validation error: {0}")]
    Validation(String),

    /// A unique or required constraint was rejected by the storage layer
    /// itself (as opposed to a pre-flight validation check).
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A query that required at least one row found none.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is disallowed by the scheme's access policy.
    #[error("permission denied: {0}")]
    Permission(String),

    /// A programmer error: stack imbalance, unknown field, a cancelled
    /// transaction reused, and the like. Aborts in debug builds at the
    /// point of detection; this variant is what release builds return
    /// instead.
    #[error("logic error: {0}")]
    Logic(String),

    /// Deadlock detected by the backend (SQLSTATE 40P01 on PostgreSQL) -
    /// safe to retry.
    #[error("deadlock detected: {0}")]
    Deadlock(String),

    /// The backend did not respond within the configured deadline - safe
    /// to retry.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A transient failure (e.g. serialization failure under
    /// SERIALIZABLE) that may succeed if the caller retries.
    #[error("transient error: {0}")]
    Transient(String),
}

impl StoreError {
    /// True for failures a caller may reasonably retry without changing
    /// anything about the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Deadlock(_) | StoreError::Timeout(_) | StoreError::Transient(_)
        )
    }

    /// True for failures raised by a unique/foreign-key/check constraint at
    /// the storage layer.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::Constraint(_))
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        StoreError::Backend(msg.into())
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        StoreError::Logic(msg.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Validation(format!("JSON error: {err}"))
    }
}

/// Classification of PostgreSQL/SQLite errors (when the `postgres-errors`
/// or `sqlite-errors` feature is enabled).
///
/// # PostgreSQL SQLSTATE reference
/// <https://www.postgresql.org/docs/current/errcodes-appendix.html>
#[cfg(feature = "postgres-errors")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error;
        match &err {
            Error::Configuration(_) => StoreError::ConnectionLost(err.to_string()),
            Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    let code_str: &str = &code;
                    match code_str {
                        "23505" | "23P01" => return StoreError::Constraint(err.to_string()),
                        "23503" | "23502" | "23514" => {
                            return StoreError::Constraint(err.to_string())
                        }
                        "40P01" => return StoreError::Deadlock(err.to_string()),
                        "40001" => return StoreError::Transient(err.to_string()),
                        code if code.starts_with("40") => {
                            return StoreError::Transient(err.to_string())
                        }
                        code if code.starts_with("08") => {
                            return StoreError::ConnectionLost(err.to_string())
                        }
                        "57P01" | "57P02" | "57P03" => {
                            return StoreError::Transient(err.to_string())
                        }
                        _ => {}
                    }
                }
                StoreError::Backend(err.to_string())
            }
            Error::Io(_) | Error::Tls(_) | Error::Protocol(_) => {
                StoreError::ConnectionLost(err.to_string())
            }
            Error::RowNotFound => StoreError::NotFound("no matching row".to_string()),
            Error::PoolTimedOut => StoreError::Timeout("connection pool timed out".to_string()),
            Error::PoolClosed => StoreError::ConnectionLost("connection pool closed".to_string()),
            Error::WorkerCrashed => StoreError::ConnectionLost("worker thread crashed".to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Classification of `rusqlite` errors (when the `sqlite-errors` feature is
/// enabled). SQLite reports far fewer distinct conditions than PostgreSQL,
/// so most of the mapping collapses to `Backend`/`Constraint`.
#[cfg(feature = "sqlite-errors")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error;
        match &err {
            Error::SqliteFailure(ffi_err, msg) => match ffi_err.code {
                ErrorCode::ConstraintViolation => {
                    StoreError::Constraint(msg.clone().unwrap_or_else(|| err.to_string()))
                }
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    StoreError::Transient(err.to_string())
                }
                ErrorCode::CannotOpen | ErrorCode::NotADatabase => {
                    StoreError::ConnectionLost(err.to_string())
                }
                _ => StoreError::Backend(err.to_string()),
            },
            Error::QueryReturnedNoRows => StoreError::NotFound("no matching row".to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(StoreError::Deadlock("x".into()).is_retryable());
        assert!(StoreError::Timeout("x".into()).is_retryable());
        assert!(StoreError::Transient("x".into()).is_retryable());
        assert!(!StoreError::Constraint("x".into()).is_retryable());
    }

    #[test]
    fn constraint_classification() {
        assert!(StoreError::Constraint("x".into()).is_constraint_violation());
        assert!(!StoreError::NotFound("x".into()).is_constraint_violation());
    }

    #[test]
    fn display_strings_include_the_kind() {
        assert_eq!(
            StoreError::NotFound("no row".into()).to_string(),
            "not found: no row"
        );
        assert_eq!(
            StoreError::Logic("stack imbalance".into()).to_string(),
            "logic error: stack imbalance"
        );
    }
}
