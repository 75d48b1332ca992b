//! The single window function the query builder needs: `ROW_NUMBER()`,
//! used to implement soft-limit pagination (see
//! [`QueryBuilder::soft_limit`](super::builder::QueryBuilder::soft_limit)).

use super::helpers::quote_identifier;
use super::types::OrderDirection;

/// `PARTITION BY` / `ORDER BY` for a window expression.
#[derive(Debug, Clone, Default)]
pub struct WindowSpec {
    pub partition_by: Vec<String>,
    pub order_by: Vec<(String, OrderDirection)>,
}

impl WindowSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partition_by(mut self, columns: &[&str]) -> Self {
        self.partition_by = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn order_by(mut self, column: &str, direction: OrderDirection) -> Self {
        self.order_by.push((column.to_string(), direction));
        self
    }
}

/// A `ROW_NUMBER() OVER (...) AS alias` expression.
#[derive(Debug, Clone)]
pub struct WindowExpression {
    pub spec: WindowSpec,
    pub alias: String,
}

pub fn build_window_sql(expr: &WindowExpression) -> String {
    let mut over_parts = Vec::new();
    if !expr.spec.partition_by.is_empty() {
        let cols: Vec<String> = expr.spec.partition_by.iter().map(|c| quote_identifier(c)).collect();
        over_parts.push(format!("PARTITION BY {}", cols.join(", ")));
    }
    if !expr.spec.order_by.is_empty() {
        let cols: Vec<String> = expr
            .spec
            .order_by
            .iter()
            .map(|(c, d)| format!("{} {}", quote_identifier(c), d.to_sql()))
            .collect();
        over_parts.push(format!("ORDER BY {}", cols.join(", ")));
    }
    format!(
        "ROW_NUMBER() OVER ({}) AS {}",
        over_parts.join(" "),
        quote_identifier(&expr.alias)
    )
}
