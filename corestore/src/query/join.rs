//! JOIN clause types, used internally for delta-table lookups.

use corestore_common::Result;

use super::builder::QueryBuilder;
use super::types::JoinType;

/// A structured `left.column = right.column` join condition. Only ever
/// built from already-validated identifiers, so no raw SQL fragment can
/// reach the emitted query through this path.
#[derive(Debug, Clone)]
pub struct JoinCondition {
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

impl JoinCondition {
    pub fn new(left_column: &str, right_table: &str, right_column: &str) -> Result<Self> {
        QueryBuilder::validate_identifier(left_column)?;
        QueryBuilder::validate_identifier(right_table)?;
        QueryBuilder::validate_identifier(right_column)?;
        Ok(Self {
            left_column: left_column.to_string(),
            right_table: right_table.to_string(),
            right_column: right_column.to_string(),
        })
    }

    pub fn to_sql(&self, main_table: &str) -> String {
        format!(
            "\"{}\".\"{}\" = \"{}\".\"{}\"",
            main_table, self.left_column, self.right_table, self.right_column
        )
    }
}

/// A single `JOIN` clause.
#[derive(Debug, Clone)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: String,
    pub alias: Option<String>,
    pub on_condition: JoinCondition,
}
