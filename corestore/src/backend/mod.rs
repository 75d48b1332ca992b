//! Backend abstraction: a [`Driver`] opens connections and runs statements
//! against PostgreSQL or SQLite, decoding rows back into backend-neutral
//! [`Value`](crate::value::Value)s.
//!
//! The query builder emits two backend-neutral markers that each driver
//! must rewrite into native SQL before preparing a statement:
//! `__WORD_PART__(field, $N)` (full-text search) and `__INCLUDES__(field, $N)`
//! (set/array containment). [`rewrite_markers`] does the text-level rewrite;
//! each driver supplies the replacement fragments for its own dialect.

pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use corestore_common::Result;

use crate::value::{Value, ValueRow};

/// Which concrete backend a [`Driver`] talks to. Surfaced so callers (e.g.
/// the migration engine) can special-case catalog introspection without
/// downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Postgres,
    Sqlite,
}

/// A single statement plus its positional parameters, already rewritten for
/// the target backend's placeholder syntax and marker dialect.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Capability set every backend adapter implements: connect, execute,
/// fetch, and the transaction primitives. Mirrors the `Driver`/`Cursor`
/// capability split, collapsed here into one trait since both ends of a
/// round trip (bind values in, decode rows out) live behind async calls
/// rather than a separately handed-out cursor object.
#[async_trait]
pub trait Driver: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Rewrites `__WORD_PART__`/`__INCLUDES__` markers and (for SQLite)
    /// `$N` placeholders into this backend's native dialect. Called once
    /// per statement, immediately before `execute`/`fetch_all`.
    fn prepare_statement(&self, sql: &str, params: Vec<Value>) -> Statement;

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<ValueRow>>;

    async fn fetch_optional(&self, sql: &str, params: &[Value]) -> Result<Option<ValueRow>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    /// Begins a transaction, returning an opaque handle whose lifetime is
    /// managed by the caller (the `transaction` module wraps this per
    /// backend). The session variables `serenity.user`/`serenity.now`
    /// (PostgreSQL) or their SQLite equivalents are set here.
    async fn begin(&self, isolation_sql: &str) -> Result<()>;
}

/// Rewrites the shared `__WORD_PART__(field, $N)` / `__INCLUDES__(field, $N)`
/// markers emitted by the query builder, using backend-supplied closures for
/// the replacement fragment. Both markers always appear as a single call
/// wrapping exactly one field reference and one placeholder, so a linear
/// scan suffices - no general-purpose SQL parser is needed.
pub(crate) fn rewrite_markers(
    sql: &str,
    word_part: impl Fn(&str, &str) -> String,
    includes: impl Fn(&str, &str) -> String,
) -> String {
    rewrite_marker(&rewrite_marker(sql, "__WORD_PART__", &word_part), "__INCLUDES__", &includes)
}

fn rewrite_marker(sql: &str, marker: &str, replace: &impl Fn(&str, &str) -> String) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find(marker) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + marker.len()..];
        let open = after.find('(').expect("marker always followed by (");
        let close = after[open..].find(')').expect("marker call always closed") + open;
        let args = &after[open + 1..close];
        let mut parts = args.splitn(2, ',');
        let field = parts.next().unwrap_or_default().trim();
        let placeholder = parts.next().unwrap_or_default().trim();
        out.push_str(&replace(field, placeholder));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_marker_replaces_both_kinds() {
        let sql = "SELECT * FROM t WHERE __WORD_PART__(\"body\", $1) AND __INCLUDES__(\"tags\", $2)";
        let out = rewrite_markers(
            sql,
            |field, ph| format!("{field} @@ plainto_tsquery({ph})"),
            |field, ph| format!("{field} @> ARRAY[{ph}]"),
        );
        assert_eq!(
            out,
            "SELECT * FROM t WHERE \"body\" @@ plainto_tsquery($1) AND \"tags\" @> ARRAY[$2]"
        );
    }

    #[test]
    fn rewrite_marker_is_noop_without_markers() {
        let sql = "SELECT * FROM t WHERE \"id\" = $1";
        let out = rewrite_markers(sql, |_, _| unreachable!(), |_, _| unreachable!());
        assert_eq!(out, sql);
    }
}
