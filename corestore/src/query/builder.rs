//! [`QueryBuilder`]: a fluent, validated SQL builder shared by both
//! backend adapters. Emits PostgreSQL-style `$N` placeholders; the
//! SQLite adapter rewrites them to `?N` before handing SQL to `rusqlite`
//! (see `backend::sqlite::rewrite_placeholders`).

use corestore_common::Result;

use crate::value::Value;

use super::helpers::{validate_identifier, validate_identifier_part};
use super::join::{JoinClause, JoinCondition};
use super::types::{CommonTableExpression, Comparator, JoinType, OrderDirection};
use super::window::{WindowExpression, WindowSpec};

/// A single `WHERE` condition. `value2` is only populated for `Between`/
/// `NotBetween`.
#[derive(Debug, Clone)]
pub(crate) struct WhereCondition {
    pub(crate) field: String,
    pub(crate) comparator: Comparator,
    pub(crate) value: Option<Value>,
    pub(crate) value2: Option<Value>,
}

/// Type-safe SQL query builder with parameter binding and identifier
/// validation baked in - no caller-supplied string ever reaches the
/// emitted SQL unescaped.
#[derive(Debug)]
pub struct QueryBuilder {
    pub(crate) table: String,
    pub(crate) select_columns: Vec<String>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) where_conditions: Vec<WhereCondition>,
    pub(crate) order_by_clauses: Vec<(String, OrderDirection)>,
    pub(crate) limit_value: Option<i64>,
    pub(crate) offset_value: Option<i64>,
    pub(crate) ctes: Vec<CommonTableExpression>,
    pub(crate) windows: Vec<WindowExpression>,
    pub(crate) returning: Vec<String>,
    /// Set by `soft_limit`: (partition field, row count, row-number alias).
    pub(crate) soft_limit: Option<(String, i64, String)>,
}

impl QueryBuilder {
    pub fn new(table: &str) -> Result<Self> {
        Self::validate_identifier(table)?;
        Ok(Self {
            table: table.to_string(),
            select_columns: Vec::new(),
            joins: Vec::new(),
            where_conditions: Vec::new(),
            order_by_clauses: Vec::new(),
            limit_value: None,
            offset_value: None,
            ctes: Vec::new(),
            windows: Vec::new(),
            returning: Vec::new(),
            soft_limit: None,
        })
    }

    pub fn quote_identifier(name: &str) -> String {
        super::helpers::quote_identifier(name)
    }

    pub fn validate_identifier(name: &str) -> Result<()> {
        validate_identifier(name)
    }

    pub fn validate_identifier_part(name: &str) -> Result<()> {
        validate_identifier_part(name)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn select(mut self, columns: Vec<String>) -> Result<Self> {
        for col in &columns {
            Self::validate_identifier(col)?;
        }
        self.select_columns = columns;
        Ok(self)
    }

    /// Adds a `WHERE field <comparator> value` condition. `value` is
    /// ignored for `IsNull`/`IsNotNull`.
    pub fn where_clause(mut self, field: &str, comparator: Comparator, value: Value) -> Result<Self> {
        Self::validate_identifier(field)?;
        let value = if comparator.is_nullary() { None } else { Some(value) };
        self.where_conditions.push(WhereCondition {
            field: field.to_string(),
            comparator,
            value,
            value2: None,
        });
        Ok(self)
    }

    pub fn where_between(mut self, field: &str, low: Value, high: Value) -> Result<Self> {
        Self::validate_identifier(field)?;
        self.where_conditions.push(WhereCondition {
            field: field.to_string(),
            comparator: Comparator::Between,
            value: Some(low),
            value2: Some(high),
        });
        Ok(self)
    }

    pub fn where_null(self, field: &str) -> Result<Self> {
        self.where_clause(field, Comparator::IsNull, Value::Null)
    }

    pub fn where_not_null(self, field: &str) -> Result<Self> {
        self.where_clause(field, Comparator::IsNotNull, Value::Null)
    }

    pub fn order_by(mut self, field: &str, direction: OrderDirection) -> Result<Self> {
        Self::validate_identifier(field)?;
        self.order_by_clauses.push((field.to_string(), direction));
        Ok(self)
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit_value = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset_value = Some(offset);
        self
    }

    /// Caps the number of rows per distinct value of `partition_field` to
    /// `count`, keeping the `count` rows that sort first by the query's
    /// existing `ORDER BY`. Rewrites the query into a `ROW_NUMBER()` CTE
    /// at `build_select` time. A soft limit is single-field only: it
    /// partitions by exactly one field, never a composite key.
    pub fn soft_limit(mut self, partition_field: &str, count: i64) -> Result<Self> {
        Self::validate_identifier(partition_field)?;
        self.soft_limit = Some((partition_field.to_string(), count, "__rn".to_string()));
        Ok(self)
    }

    pub fn join(mut self, join_type: JoinType, table: &str, alias: Option<&str>, condition: JoinCondition) -> Result<Self> {
        Self::validate_identifier(table)?;
        if let Some(a) = alias {
            Self::validate_identifier(a)?;
        }
        self.joins.push(JoinClause {
            join_type,
            table: table.to_string(),
            alias: alias.map(|s| s.to_string()),
            on_condition: condition,
        });
        Ok(self)
    }

    pub fn inner_join(self, table: &str, alias: Option<&str>, condition: JoinCondition) -> Result<Self> {
        self.join(JoinType::Inner, table, alias, condition)
    }

    pub fn left_join(self, table: &str, alias: Option<&str>, condition: JoinCondition) -> Result<Self> {
        self.join(JoinType::Left, table, alias, condition)
    }

    pub fn with_cte_raw(mut self, name: &str, sql: &str, params: Vec<Value>) -> Result<Self> {
        Self::validate_identifier(name)?;
        self.ctes.push(CommonTableExpression {
            name: name.to_string(),
            sql: sql.to_string(),
            params,
        });
        Ok(self)
    }

    pub fn returning(mut self, columns: &[&str]) -> Result<Self> {
        for col in columns {
            if *col != "*" {
                Self::validate_identifier(col)?;
            }
            self.returning.push(col.to_string());
        }
        Ok(self)
    }

    pub fn returning_all(mut self) -> Self {
        self.returning.push("*".to_string());
        self
    }

    pub(crate) fn window_spec_for_soft_limit(&self, partition_field: &str) -> WindowSpec {
        let mut spec = WindowSpec::new().partition_by(&[partition_field]);
        for (field, dir) in &self.order_by_clauses {
            spec = spec.order_by(field, *dir);
        }
        spec
    }
}
