//! Backend-neutral SQL query builder.
//!
//! Builds `SELECT`/`INSERT`/`UPDATE`/`DELETE` statements with `$N`
//! placeholders, identifier validation, and soft-limit CTE rewriting.
//! Both backend adapters consume the same `(sql, params)` pairs; the
//! SQLite adapter additionally rewrites `$N` to `?N` before preparing.
//!
//! # Example
//!
//! ```
//! use corestore::query::{QueryBuilder, Comparator, OrderDirection};
//! use corestore::value::Value;
//!
//! let qb = QueryBuilder::new("users").unwrap()
//!     .where_clause("age", Comparator::GreaterOrEqual, Value::Int(18)).unwrap()
//!     .order_by("name", OrderDirection::Asc).unwrap()
//!     .limit(10);
//! let (sql, params) = qb.build_select();
//! assert!(sql.starts_with("SELECT"));
//! assert_eq!(params.len(), 2); // the bound age, then the limit
//! ```

mod builder;
mod helpers;
mod join;
mod modify;
mod select;
mod types;
mod window;

#[cfg(test)]
mod tests;

pub use builder::QueryBuilder;
pub use join::{JoinCondition, JoinClause};
pub use types::{Comparator, CommonTableExpression, JoinType, OrderDirection};
pub use window::{WindowExpression, WindowSpec};
