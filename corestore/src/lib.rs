//! Schema-driven storage engine over PostgreSQL and SQLite.
//!
//! This crate provides a backend-neutral object store: a [`scheme::Scheme`]
//! declares a named, versioned set of typed [`field::Field`]s; a
//! [`query::QueryBuilder`] composes statements against it without ever
//! concatenating untrusted strings; a [`backend::Driver`] implementation
//! (PostgreSQL via `sqlx`, SQLite via `rusqlite`) executes them and decodes
//! rows back into backend-neutral [`value::Value`]s; a [`transaction::Transaction`]
//! scopes a sequence of statements to one connection; and a [`worker::Worker`]
//! binds a scheme to a transaction for the lifetime of one create/update/
//! delete/find request.
//!
//! # Architecture
//!
//! ```text
//! Scheme + Field  (schema model)
//!        |
//!   QueryBuilder   (backend-neutral SQL + $N placeholders)
//!        |
//!     Driver        <-- PostgresDriver (sqlx)
//!        |           <-- SqliteDriver  (rusqlite)
//!   Transaction     (scopes statements to one connection)
//!        |
//!     Worker        (create / update / delete / find)
//! ```
//!
//! The hierarchical arena allocator backing request-scoped scratch
//! allocations lives in the sibling [`corepool`] crate; this crate does
//! not allocate through it directly but re-exports `Pool` for callers
//! that want to scope buffers acquired while building a large query.
//!
//! # Example
//!
//! ```
//! use corestore::field::{Field, FieldKind};
//! use corestore::scheme::Scheme;
//!
//! let users = Scheme::new("users")
//!     .field(Field::new("email", FieldKind::Text).required().unique())
//!     .field(Field::new("age", FieldKind::Integer));
//! assert!(users.validate().is_ok());
//! ```
//!
//! # Thread Safety
//!
//! [`backend::Driver`] implementations are `Send + Sync` and may be shared
//! across tasks; a [`transaction::Transaction`] is not `Clone` and is
//! scoped to a single in-flight request, matching the underlying
//! connection (or `sqlx` transaction handle) it holds exclusively.

/// Runtime value representation shared by the query builder, validation,
/// and both backend adapters.
pub mod value;

/// Field kinds, flags, and on-remove policy for the schema model.
pub mod field;

/// Named, versioned schema declarations and the scheme registry used to
/// resolve cross-scheme links and cascade removal.
pub mod scheme;

/// Result row types: `ObjectRow` and delta (change-log) rows.
pub mod row;

/// Field-level and comparator-level validation ahead of SQL emission.
pub mod validation;

/// Backend-neutral SQL query builder with soft-limit pagination.
pub mod query;

/// The `Driver` trait and the PostgreSQL (`sqlx`) and SQLite (`rusqlite`)
/// adapters implementing it.
pub mod backend;

/// Transaction management across both backends, including savepoints and
/// poison-on-failure semantics.
pub mod transaction;

/// `Worker`: the create/update/delete/find façade binding a scheme to a
/// transaction for one request.
pub mod worker;

/// Schema migration: catalog introspection, DDL diffing, and trigger
/// generation for both backends.
pub mod migration;

pub use backend::{BackendKind, Driver, Statement};
pub use field::{Field, FieldFlags, FieldKind, OnRemove};
pub use query::{Comparator, JoinType, OrderDirection, QueryBuilder};
pub use row::{DeltaAction, DeltaRow, ObjectRow};
pub use scheme::{Scheme, SchemeRegistry};
pub use transaction::{AccessMode, IsolationLevel, Transaction, TransactionOptions};
pub use value::{Value, ValueRow};
pub use worker::{ConflictResolution, FieldSelection, Worker, WorkerOptions};

pub use corepool::Pool;
pub use corestore_common::{Result, StoreError};
