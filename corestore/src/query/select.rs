//! `SELECT` SQL emission, including soft-limit rewriting via a
//! `ROW_NUMBER()` CTE.

use crate::value::Value;

use super::builder::{QueryBuilder, WhereCondition};
use super::helpers::{adjust_param_indices, quote_identifier};
use super::types::Comparator;
use super::window::{build_window_sql, WindowExpression};

impl QueryBuilder {
    /// Builds a `SELECT` query. When [`soft_limit`](QueryBuilder::soft_limit)
    /// was set, the real query is wrapped in a `ROW_NUMBER()` CTE so each
    /// distinct value of the partition field contributes at most `count`
    /// rows to the result.
    pub fn build_select(&self) -> (String, Vec<Value>) {
        match &self.soft_limit {
            None => self.build_select_plain(),
            Some((partition_field, count, rn_alias)) => {
                self.build_select_soft_limited(partition_field, *count, rn_alias)
            }
        }
    }

    fn build_select_plain(&self) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.write_ctes(&mut sql, &mut params);
        self.write_core(&mut sql, &mut params, &[]);
        self.write_order_by(&mut sql);
        self.write_limit_offset(&mut sql, &mut params);
        (sql, params)
    }

    fn build_select_soft_limited(
        &self,
        partition_field: &str,
        count: i64,
        rn_alias: &str,
    ) -> (String, Vec<Value>) {
        let window = WindowExpression {
            spec: self.window_spec_for_soft_limit(partition_field),
            alias: rn_alias.to_string(),
        };
        let mut inner_sql = String::new();
        let mut params = Vec::new();
        self.write_ctes(&mut inner_sql, &mut params);
        self.write_core(&mut inner_sql, &mut params, &[&window]);

        let cte_name = "__soft_limited";
        let outer_select = if self.select_columns.is_empty() {
            "*".to_string()
        } else {
            self.select_columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        params.push(Value::BigInt(count));
        let rn_param = params.len();
        let mut sql = format!(
            "WITH {cte} AS ({inner}) SELECT {cols} FROM {cte} WHERE {rn} <= ${n}",
            cte = quote_identifier(cte_name),
            inner = inner_sql,
            cols = outer_select,
            rn = quote_identifier(rn_alias),
            n = rn_param,
        );
        self.write_order_by(&mut sql);
        self.write_limit_offset(&mut sql, &mut params);
        (sql, params)
    }

    /// Writes `SELECT ... FROM ... [JOIN ...] [WHERE ...]`, optionally
    /// appending extra window-function select items (used for the
    /// soft-limit row-number column).
    fn write_core(&self, sql: &mut String, params: &mut Vec<Value>, extra_windows: &[&WindowExpression]) {
        sql.push_str("SELECT ");
        let mut select_parts: Vec<String> = if self.select_columns.is_empty() {
            vec!["*".to_string()]
        } else {
            self.select_columns.iter().map(|c| quote_identifier(c)).collect()
        };
        for w in &self.windows {
            select_parts.push(build_window_sql(w));
        }
        for w in extra_windows {
            select_parts.push(build_window_sql(w));
        }
        sql.push_str(&select_parts.join(", "));

        sql.push_str(" FROM ");
        sql.push_str(&quote_identifier(&self.table));

        for join in &self.joins {
            let table_ref = match &join.alias {
                Some(alias) => format!("{} AS \"{}\"", quote_identifier(&join.table), alias),
                None => quote_identifier(&join.table),
            };
            sql.push_str(&format!(
                " {} {} ON {}",
                join.join_type.to_sql(),
                table_ref,
                join.on_condition.to_sql(&self.table)
            ));
        }

        if !self.where_conditions.is_empty() {
            sql.push_str(" WHERE ");
            let parts: Vec<String> = self
                .where_conditions
                .iter()
                .map(|cond| build_where_condition(cond, params))
                .collect();
            sql.push_str(&parts.join(" AND "));
        }
    }

    fn write_ctes(&self, sql: &mut String, params: &mut Vec<Value>) {
        if self.ctes.is_empty() {
            return;
        }
        sql.push_str("WITH ");
        let parts: Vec<String> = self
            .ctes
            .iter()
            .map(|cte| {
                let offset = params.len();
                params.extend(cte.params.clone());
                let adjusted = adjust_param_indices(&cte.sql, offset);
                format!("{} AS ({})", quote_identifier(&cte.name), adjusted)
            })
            .collect();
        sql.push_str(&parts.join(", "));
        sql.push(' ');
    }

    fn write_order_by(&self, sql: &mut String) {
        if self.order_by_clauses.is_empty() {
            return;
        }
        sql.push_str(" ORDER BY ");
        let parts: Vec<String> = self
            .order_by_clauses
            .iter()
            .map(|(field, dir)| format!("{} {}", quote_identifier(field), dir.to_sql()))
            .collect();
        sql.push_str(&parts.join(", "));
    }

    fn write_limit_offset(&self, sql: &mut String, params: &mut Vec<Value>) {
        if let Some(limit) = self.limit_value {
            params.push(Value::BigInt(limit));
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }
        if let Some(offset) = self.offset_value {
            params.push(Value::BigInt(offset));
            sql.push_str(&format!(" OFFSET ${}", params.len()));
        }
    }
}

/// Builds the SQL fragment for a single `WHERE` condition, pushing any
/// bound values onto `params` and returning `$N` markers for them.
pub(crate) fn build_where_condition(cond: &WhereCondition, params: &mut Vec<Value>) -> String {
    let field = quote_identifier(&cond.field);
    match cond.comparator {
        Comparator::IsNull => format!("{field} IS NULL"),
        Comparator::IsNotNull => format!("{field} IS NOT NULL"),
        Comparator::In => bind_one(&field, "IN", cond.value.as_ref(), params),
        Comparator::NotIn => bind_one(&field, "NOT IN", cond.value.as_ref(), params),
        Comparator::Between => {
            let lo = cond.value.clone().unwrap_or(Value::Null);
            let hi = cond.value2.clone().unwrap_or(Value::Null);
            params.push(lo);
            let lo_n = params.len();
            params.push(hi);
            let hi_n = params.len();
            format!("{field} BETWEEN ${lo_n} AND ${hi_n}")
        }
        Comparator::NotBetween => {
            let lo = cond.value.clone().unwrap_or(Value::Null);
            let hi = cond.value2.clone().unwrap_or(Value::Null);
            params.push(lo);
            let lo_n = params.len();
            params.push(hi);
            let hi_n = params.len();
            format!("{field} NOT BETWEEN ${lo_n} AND ${hi_n}")
        }
        Comparator::Prefix => bind_like(&field, cond, params, "{}%"),
        Comparator::Suffix => bind_like(&field, cond, params, "%{}"),
        Comparator::WordPart => bind_word_part(&field, cond, params),
        Comparator::Includes => bind_includes(&field, cond, params),
        Comparator::Equal => bind_op(&field, "=", cond, params),
        Comparator::NotEqual => bind_op(&field, "!=", cond, params),
        Comparator::LessThan => bind_op(&field, "<", cond, params),
        Comparator::LessOrEqual => bind_op(&field, "<=", cond, params),
        Comparator::GreaterThan => bind_op(&field, ">", cond, params),
        Comparator::GreaterOrEqual => bind_op(&field, ">=", cond, params),
    }
}

fn bind_op(field: &str, op: &str, cond: &WhereCondition, params: &mut Vec<Value>) -> String {
    params.push(cond.value.clone().unwrap_or(Value::Null));
    format!("{field} {op} ${}", params.len())
}

fn bind_one(field: &str, op: &str, value: Option<&Value>, params: &mut Vec<Value>) -> String {
    params.push(value.cloned().unwrap_or(Value::Null));
    format!("{field} {op} (${})", params.len())
}

fn bind_like(field: &str, cond: &WhereCondition, params: &mut Vec<Value>, pattern: &str) -> String {
    let text = match &cond.value {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    };
    params.push(Value::Text(pattern.replace("{}", &text)));
    format!("{field} LIKE ${}", params.len())
}

/// `WordPart` delegates to each backend's full-text search machinery.
/// On PostgreSQL that's `@@ plainto_tsquery(...)`; on SQLite it's the
/// `sp_ts_query_valid`-gated FTS5 `MATCH`. The builder only knows the
/// comparator name carries that intent - the concrete operator is filled
/// in by the backend's SQL rewrite pass before the statement is prepared.
fn bind_word_part(field: &str, cond: &WhereCondition, params: &mut Vec<Value>) -> String {
    params.push(cond.value.clone().unwrap_or(Value::Null));
    format!("__WORD_PART__({field}, ${})", params.len())
}

/// `Includes` checks whether a `Set`/`Array` field contains a value.
/// Emits a backend-neutral marker the adapter rewrites: `@>` with a
/// one-element array on PostgreSQL, `EXISTS (SELECT 1 FROM json_each(...))`
/// on SQLite.
fn bind_includes(field: &str, cond: &WhereCondition, params: &mut Vec<Value>) -> String {
    params.push(cond.value.clone().unwrap_or(Value::Null));
    format!("__INCLUDES__({field}, ${})", params.len())
}
