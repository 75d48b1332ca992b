//! `INSERT`/`UPDATE`/`DELETE` SQL emission.

use corestore_common::{Result, StoreError};

use crate::value::Value;

use super::builder::QueryBuilder;
use super::helpers::quote_identifier;
use super::select::build_where_condition;

impl QueryBuilder {
    pub fn build_insert(&self, values: &[(String, Value)]) -> Result<(String, Vec<Value>)> {
        if values.is_empty() {
            return Err(StoreError::Validation("cannot insert with no values".into()));
        }
        for (col, _) in values {
            Self::validate_identifier(col)?;
        }

        let mut sql = format!("INSERT INTO {} (", quote_identifier(&self.table));
        let columns: Vec<String> = values.iter().map(|(col, _)| quote_identifier(col)).collect();
        sql.push_str(&columns.join(", "));
        sql.push_str(") VALUES (");
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("${i}")).collect();
        sql.push_str(&placeholders.join(", "));
        sql.push(')');
        self.append_returning(&mut sql);

        let params = values.iter().map(|(_, v)| v.clone()).collect();
        Ok((sql, params))
    }

    pub fn build_update(&self, values: &[(String, Value)]) -> Result<(String, Vec<Value>)> {
        if values.is_empty() {
            return Err(StoreError::Validation("cannot update with no values".into()));
        }
        for (col, _) in values {
            Self::validate_identifier(col)?;
        }

        let mut sql = format!("UPDATE {} SET ", quote_identifier(&self.table));
        let mut params: Vec<Value> = Vec::new();
        let set_parts: Vec<String> = values
            .iter()
            .map(|(col, val)| {
                params.push(val.clone());
                format!("{} = ${}", quote_identifier(col), params.len())
            })
            .collect();
        sql.push_str(&set_parts.join(", "));

        self.append_where_and_returning(&mut sql, &mut params);
        Ok((sql, params))
    }

    /// Builds an upsert (`INSERT ... ON CONFLICT DO UPDATE`). On SQLite
    /// the adapter rewrites `ON CONFLICT` identically - SQLite has used
    /// the same upsert syntax since 3.24.
    pub fn build_upsert(
        &self,
        values: &[(String, Value)],
        conflict_target: &[String],
        update_columns: Option<&[String]>,
    ) -> Result<(String, Vec<Value>)> {
        if values.is_empty() {
            return Err(StoreError::Validation("cannot upsert with no values".into()));
        }
        if conflict_target.is_empty() {
            return Err(StoreError::Validation("conflict target cannot be empty".into()));
        }
        for (col, _) in values {
            Self::validate_identifier(col)?;
        }
        for col in conflict_target {
            Self::validate_identifier(col)?;
        }

        let mut sql = format!("INSERT INTO {} (", quote_identifier(&self.table));
        let columns: Vec<String> = values.iter().map(|(col, _)| quote_identifier(col)).collect();
        sql.push_str(&columns.join(", "));
        sql.push_str(") VALUES (");
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("${i}")).collect();
        sql.push_str(&placeholders.join(", "));
        sql.push(')');

        sql.push_str(" ON CONFLICT (");
        let targets: Vec<String> = conflict_target.iter().map(|c| quote_identifier(c)).collect();
        sql.push_str(&targets.join(", "));
        sql.push_str(") DO UPDATE SET ");

        let columns_to_update: Vec<String> = match update_columns {
            Some(cols) => cols.to_vec(),
            None => values
                .iter()
                .map(|(col, _)| col.clone())
                .filter(|col| !conflict_target.contains(col))
                .collect(),
        };
        if columns_to_update.is_empty() {
            return Err(StoreError::Validation(
                "no columns to update after excluding conflict target".into(),
            ));
        }
        let set_parts: Vec<String> = columns_to_update
            .iter()
            .map(|col| format!("{0} = EXCLUDED.{0}", quote_identifier(col)))
            .collect();
        sql.push_str(&set_parts.join(", "));
        self.append_returning(&mut sql);

        let params = values.iter().map(|(_, v)| v.clone()).collect();
        Ok((sql, params))
    }

    pub fn build_delete(&self) -> (String, Vec<Value>) {
        let mut sql = format!("DELETE FROM {}", quote_identifier(&self.table));
        let mut params: Vec<Value> = Vec::new();
        self.append_where_and_returning(&mut sql, &mut params);
        (sql, params)
    }

    fn append_where_and_returning(&self, sql: &mut String, params: &mut Vec<Value>) {
        if !self.where_conditions.is_empty() {
            sql.push_str(" WHERE ");
            let parts: Vec<String> = self
                .where_conditions
                .iter()
                .map(|cond| build_where_condition(cond, params))
                .collect();
            sql.push_str(&parts.join(" AND "));
        }
        self.append_returning(sql);
    }

    /// Appends a `RETURNING` clause from `self.returning`, shared by
    /// `build_insert`/`build_upsert` (no `WHERE` clause of their own) and
    /// `build_update`/`build_delete` (via `append_where_and_returning`).
    fn append_returning(&self, sql: &mut String) {
        if !self.returning.is_empty() {
            sql.push_str(" RETURNING ");
            if self.returning.iter().any(|c| c == "*") {
                sql.push('*');
            } else {
                let cols: Vec<String> = self.returning.iter().map(|c| quote_identifier(c)).collect();
                sql.push_str(&cols.join(", "));
            }
        }
    }
}
