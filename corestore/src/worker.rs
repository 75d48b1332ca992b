//! [`Worker`]: a short-lived façade binding a [`Scheme`] to an
//! adapter/transaction and per-request state, exposing the create/update/
//! delete/find operations applications actually call.
//!
//! A worker does not own the connection; it borrows a [`Transaction`] for
//! the lifetime of the request and leaves commit/rollback to the caller,
//! matching the spec's "bind a scheme, an adapter/transaction, and
//! per-request state" contract.

use corestore_common::{Result, StoreError};

use crate::field::{FieldKind, OnRemove};
use crate::query::{Comparator, QueryBuilder};
use crate::row::ObjectRow;
use crate::scheme::{Scheme, SchemeRegistry};
use crate::transaction::Transaction;
use crate::validation;
use crate::value::Value;

/// What happens when a save's unique constraint collides with an existing
/// row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    /// Fail with `StoreError::Constraint`.
    #[default]
    Fail,
    /// `INSERT ... ON CONFLICT DO UPDATE` over the conflicting columns.
    Overwrite,
    /// Silently keep the existing row and return it unchanged.
    Ignore,
}

/// Which fields a save/find request touches.
#[derive(Debug, Clone, Default)]
pub enum FieldSelection {
    /// Every stored field (the worker's default).
    #[default]
    All,
    /// No fields beyond `__oid` - used for existence checks and
    /// touch-only updates.
    None,
    /// Exactly the named fields.
    Only(Vec<String>),
    /// Every stored field except the named ones.
    Exclude(Vec<String>),
}

impl FieldSelection {
    fn resolve(&self, scheme: &Scheme) -> Vec<String> {
        let stored: Vec<String> = scheme
            .fields
            .iter()
            .filter(|f| f.kind.is_stored())
            .map(|f| f.name.clone())
            .collect();
        let force_excluded: Vec<&str> = scheme
            .fields
            .iter()
            .filter(|f| f.flags.contains(crate::field::FieldFlags::FORCE_EXCLUDE))
            .map(|f| f.name.as_str())
            .collect();
        match self {
            FieldSelection::All => stored.into_iter().filter(|f| !force_excluded.contains(&f.as_str())).collect(),
            FieldSelection::None => Vec::new(),
            FieldSelection::Only(names) => stored.into_iter().filter(|f| names.contains(f)).collect(),
            FieldSelection::Exclude(names) => stored
                .into_iter()
                .filter(|f| !names.contains(f) && !force_excluded.contains(&f.as_str()))
                .collect(),
        }
    }
}

/// Per-request state a [`Worker`] carries across one create/update/delete
/// call: which fields to read back, how to resolve a conflicting unique
/// constraint, an extra condition a save must satisfy to apply, and
/// whether the request only bumps `mtime` without touching other columns.
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    pub fields: FieldSelection,
    pub conflict: ConflictResolution,
    /// Additional `(field, comparator, value)` the row must already
    /// satisfy for an update to apply - optimistic-concurrency guards.
    pub condition: Option<(String, Comparator, Value)>,
    pub touch_only: bool,
}

impl WorkerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(mut self, selection: FieldSelection) -> Self {
        self.fields = selection;
        self
    }

    pub fn conflict(mut self, resolution: ConflictResolution) -> Self {
        self.conflict = resolution;
        self
    }

    pub fn condition(mut self, field: &str, comparator: Comparator, value: Value) -> Self {
        self.condition = Some((field.to_string(), comparator, value));
        self
    }

    pub fn touch_only(mut self) -> Self {
        self.touch_only = true;
        self
    }
}

/// Binds a [`Scheme`] to a [`Transaction`] for the lifetime of one request.
/// Cheap to construct; applications create a fresh `Worker` per logical
/// operation rather than holding one across requests.
pub struct Worker<'a> {
    scheme: &'a Scheme,
    registry: &'a SchemeRegistry,
    tx: &'a mut Transaction,
}

impl<'a> Worker<'a> {
    pub fn new(scheme: &'a Scheme, registry: &'a SchemeRegistry, tx: &'a mut Transaction) -> Self {
        Self { scheme, registry, tx }
    }

    /// Validates `values` against the scheme, inserts the base row, and
    /// runs post-update statements for `Set`/`Array` fields in field
    /// declaration order, all inside the bound transaction.
    pub async fn create(&mut self, values: Vec<(String, Value)>, options: &WorkerOptions) -> Result<ObjectRow> {
        validation::validate_write(self.scheme, &values)?;

        let (base_values, collection_values): (Vec<_>, Vec<_>) = values.into_iter().partition(|(name, _)| {
            !matches!(
                self.scheme.find_field(name).map(|f| &f.kind),
                Some(FieldKind::Set { .. }) | Some(FieldKind::Array { .. })
            )
        });

        let returning = self.selected_columns(options);
        let returning: Vec<&str> = returning.iter().map(String::as_str).collect();
        let qb = QueryBuilder::new(&self.scheme.name)?.returning(&returning)?;
        let (sql, params) = match options.conflict {
            ConflictResolution::Fail | ConflictResolution::Ignore => qb.build_insert(&base_values)?,
            ConflictResolution::Overwrite => {
                let conflict_target = self.unique_columns();
                qb.build_upsert(&base_values, &conflict_target, None)?
            }
        };

        let mut row = match self.tx.fetch_all(&sql, &params).await {
            Ok(mut rows) if !rows.is_empty() => ObjectRow::from_value_row(rows.remove(0))?,
            Ok(_) => return Err(StoreError::Backend("insert returned no row".into())),
            Err(e) if e.is_constraint_violation() && options.conflict == ConflictResolution::Ignore => {
                return self.find_by_unique(&base_values).await;
            }
            Err(e) => return Err(e),
        };
        row.resolve_virtuals(self.scheme);

        for (field_name, value) in &collection_values {
            self.write_collection_field(row.oid, field_name, value).await?;
        }
        self.refresh_fulltext_views(row.oid).await?;

        Ok(row)
    }

    /// Applies `values` to the row identified by `oid`. When
    /// `options.touch_only` is set, `values` must be empty and the update
    /// only bumps whatever auto-mtime column the scheme declares.
    pub async fn update(&mut self, oid: i64, values: Vec<(String, Value)>, options: &WorkerOptions) -> Result<ObjectRow> {
        if options.touch_only && !values.is_empty() {
            return Err(StoreError::logic("touch_only updates must not carry field values"));
        }
        validation::validate_write(self.scheme, &values)?;

        let (mut base_values, collection_values): (Vec<_>, Vec<_>) = values.into_iter().partition(|(name, _)| {
            !matches!(
                self.scheme.find_field(name).map(|f| &f.kind),
                Some(FieldKind::Set { .. }) | Some(FieldKind::Array { .. })
            )
        });

        if options.touch_only {
            let mtime_field = self.auto_mtime_field()?.to_string();
            base_values.push((mtime_field, Value::BigInt(chrono::Utc::now().timestamp_millis())));
        }

        let returning = self.selected_columns(options);
        let returning: Vec<&str> = returning.iter().map(String::as_str).collect();
        let mut qb = QueryBuilder::new(&self.scheme.name)?
            .where_clause("__oid", Comparator::Equal, Value::BigInt(oid))?
            .returning(&returning)?;
        if let Some((field, comparator, value)) = &options.condition {
            qb = qb.where_clause(field, *comparator, value.clone())?;
        }

        let to_write = base_values;
        if to_write.is_empty() && collection_values.is_empty() {
            return self.find(oid, options).await?.ok_or_else(|| StoreError::NotFound(oid.to_string()));
        }

        let mut row = if to_write.is_empty() {
            self.find(oid, options).await?.ok_or_else(|| StoreError::NotFound(oid.to_string()))?
        } else {
            let (sql, params) = qb.build_update(&to_write)?;
            let mut rows = self.tx.fetch_all(&sql, &params).await?;
            if rows.is_empty() {
                return Err(StoreError::NotFound(format!("no row with __oid={oid} matched the save condition")));
            }
            ObjectRow::from_value_row(rows.remove(0))?
        };
        row.resolve_virtuals(self.scheme);

        for (field_name, value) in &collection_values {
            self.write_collection_field(row.oid, field_name, value).await?;
        }
        self.refresh_fulltext_views(row.oid).await?;

        Ok(row)
    }

    /// Deletes the row identified by `oid`, first resolving on-remove
    /// policies for every scheme that references it.
    pub async fn delete(&mut self, oid: i64) -> Result<()> {
        self.cascade_on_remove(oid).await?;
        let (sql, params) = QueryBuilder::new(&self.scheme.name)?
            .where_clause("__oid", Comparator::Equal, Value::BigInt(oid))?
            .build_delete();
        let affected = self.tx.execute(&sql, &params).await?;
        if affected == 0 {
            return Err(StoreError::NotFound(oid.to_string()));
        }
        Ok(())
    }

    pub async fn find(&mut self, oid: i64, options: &WorkerOptions) -> Result<Option<ObjectRow>> {
        let (sql, params) = QueryBuilder::new(&self.scheme.name)?
            .select(self.selected_columns(options))?
            .where_clause("__oid", Comparator::Equal, Value::BigInt(oid))?
            .build_select();
        match self.tx.fetch_optional(&sql, &params).await? {
            Some(row) => {
                let mut row = ObjectRow::from_value_row(row)?;
                row.resolve_virtuals(self.scheme);
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    pub async fn find_many(&mut self, qb: QueryBuilder) -> Result<Vec<ObjectRow>> {
        let (sql, params) = qb.build_select();
        let rows = self.tx.fetch_all(&sql, &params).await?;
        rows.into_iter()
            .map(|row| {
                let mut row = ObjectRow::from_value_row(row)?;
                row.resolve_virtuals(self.scheme);
                Ok(row)
            })
            .collect()
    }

    fn selected_columns(&self, options: &WorkerOptions) -> Vec<String> {
        let mut columns = options.fields.resolve(self.scheme);
        if !columns.iter().any(|c| c == "__oid") {
            columns.push("__oid".to_string());
        }
        columns
    }

    /// The scheme's auto-mtime column, if declared, for a `touch_only`
    /// update to bump.
    fn auto_mtime_field(&self) -> Result<&str> {
        self.scheme
            .fields
            .iter()
            .find(|f| f.flags.contains(crate::field::FieldFlags::AUTO_MTIME))
            .map(|f| f.name.as_str())
            .ok_or_else(|| {
                StoreError::logic(format!(
                    "scheme '{}' has no auto-mtime field for a touch_only update",
                    self.scheme.name
                ))
            })
    }

    fn unique_columns(&self) -> Vec<String> {
        self.scheme
            .fields
            .iter()
            .filter(|f| f.flags.contains(crate::field::FieldFlags::UNIQUE))
            .map(|f| f.name.clone())
            .collect()
    }

    async fn find_by_unique(&mut self, base_values: &[(String, Value)]) -> Result<ObjectRow> {
        let unique = self.unique_columns();
        let mut qb = QueryBuilder::new(&self.scheme.name)?;
        for (name, value) in base_values {
            if unique.contains(name) {
                qb = qb.where_clause(name, Comparator::Equal, value.clone())?;
            }
        }
        let (sql, params) = qb.build_select();
        let row = self
            .tx
            .fetch_optional(&sql, &params)
            .await?
            .ok_or_else(|| StoreError::Backend("ignored-conflict insert left no matching row".into()))?;
        let mut row = ObjectRow::from_value_row(row)?;
        row.resolve_virtuals(self.scheme);
        Ok(row)
    }

    /// Walks every scheme with an `Object`/`Set` field pointing at this
    /// scheme and applies its `on_remove` policy before the row at `oid`
    /// is deleted, so referential integrity survives even without
    /// database-level foreign keys.
    async fn cascade_on_remove(&mut self, oid: i64) -> Result<()> {
        for (dependent, field, policy) in self.registry.dependents_of(&self.scheme.name) {
            match policy {
                OnRemove::Cascade => {
                    let (sql, params) = QueryBuilder::new(&dependent.name)?
                        .where_clause(field, Comparator::Equal, Value::BigInt(oid))?
                        .build_delete();
                    self.tx.execute(&sql, &params).await?;
                }
                OnRemove::Restrict => {
                    let (sql, params) = QueryBuilder::new(&dependent.name)?
                        .select(vec!["__oid".to_string()])?
                        .where_clause(field, Comparator::Equal, Value::BigInt(oid))?
                        .limit(1)
                        .build_select();
                    if self.tx.fetch_optional(&sql, &params).await?.is_some() {
                        return Err(StoreError::Constraint(format!(
                            "cannot remove {}({oid}): referenced by {}.{field}",
                            self.scheme.name, dependent.name
                        )));
                    }
                }
                OnRemove::SetNull => {
                    let (sql, params) = QueryBuilder::new(&dependent.name)?
                        .where_clause(field, Comparator::Equal, Value::BigInt(oid))?
                        .build_update(&[(field.to_string(), Value::Null)])?;
                    self.tx.execute(&sql, &params).await?;
                }
                OnRemove::Reference => {
                    let join_table = format!("{}_{field}_{field}", dependent.name);
                    let (sql, params) = QueryBuilder::new(&join_table)?
                        .where_clause("T_id", Comparator::Equal, Value::BigInt(oid))?
                        .build_delete();
                    self.tx.execute(&sql, &params).await?;
                }
                OnRemove::StrongReference => {
                    let (sql, params) = QueryBuilder::new(&dependent.name)?
                        .where_clause(field, Comparator::Equal, Value::BigInt(oid))?
                        .build_delete();
                    self.tx.execute(&sql, &params).await?;
                }
            }
        }
        Ok(())
    }

    /// Recomputes every `FullTextView` field's vector from its source
    /// columns' current values. PostgreSQL stores the vector in a plain
    /// `tsvector` column refreshed here; on SQLite the shadow FTS table is
    /// maintained by `SqliteDriver::ensure_fts_shadow` outside the worker's
    /// transaction boundary, so there is nothing to do here for that backend.
    async fn refresh_fulltext_views(&mut self, oid: i64) -> Result<()> {
        if self.tx.kind() != crate::backend::BackendKind::Postgres {
            return Ok(());
        }
        for field in &self.scheme.fields {
            let FieldKind::FullTextView { sources } = &field.kind else { continue };
            if sources.is_empty() {
                continue;
            }
            let concat = sources
                .iter()
                .map(|s| format!("coalesce(\"{s}\", '')"))
                .collect::<Vec<_>>()
                .join(" || ' ' || ");
            let sql = format!(
                "UPDATE \"{}\" SET \"{}\" = to_tsvector('english', {concat}) WHERE __oid = $1",
                self.scheme.name, field.name
            );
            self.tx.execute(&sql, &[Value::BigInt(oid)]).await?;
        }
        Ok(())
    }

    /// Writes the join-table (`Set`) or value-table (`Array`) rows for a
    /// single field after the owning row exists. Replaces the field's
    /// entire contents: deletes any prior rows for `oid`, then inserts
    /// the new elements, all inside the caller's transaction.
    async fn write_collection_field(&mut self, oid: i64, field_name: &str, value: &Value) -> Result<()> {
        let field = self
            .scheme
            .find_field(field_name)
            .ok_or_else(|| StoreError::Validation(format!("unknown field '{field_name}'")))?;
        let table = format!("{}_{field_name}_{field_name}", self.scheme.name);
        let elements = match value {
            Value::Set(items) | Value::Array(items) => items.clone(),
            other => return Err(StoreError::Validation(format!("field '{field_name}' expects a collection, got {}", other.kind_name()))),
        };

        let (del_sql, del_params) = QueryBuilder::new(&table)?
            .where_clause("S_id", Comparator::Equal, Value::BigInt(oid))?
            .build_delete();
        self.tx.execute(&del_sql, &del_params).await?;

        for element in elements {
            match &field.kind {
                FieldKind::Set { .. } => {
                    let target_id = element
                        .as_object_id()
                        .ok_or_else(|| StoreError::Validation(format!("field '{field_name}' element is not an object id")))?;
                    let (sql, params) = QueryBuilder::new(&table)?.build_insert(&[
                        ("S_id".to_string(), Value::BigInt(oid)),
                        ("T_id".to_string(), Value::BigInt(target_id)),
                    ])?;
                    self.tx.execute(&sql, &params).await?;
                }
                FieldKind::Array { .. } => {
                    let (sql, params) = QueryBuilder::new(&table)?.build_insert(&[
                        ("S_id".to_string(), Value::BigInt(oid)),
                        ("data".to_string(), element),
                    ])?;
                    self.tx.execute(&sql, &params).await?;
                }
                _ => unreachable!("partition only routes Set/Array fields here"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;

    fn scheme() -> Scheme {
        Scheme::new("users")
            .field(Field::new("email", FieldKind::Text).required().unique())
            .field(Field::new("age", FieldKind::Integer))
    }

    #[test]
    fn field_selection_all_includes_every_stored_field() {
        let s = scheme();
        let resolved = FieldSelection::All.resolve(&s);
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn field_selection_none_is_empty() {
        let s = scheme();
        assert!(FieldSelection::None.resolve(&s).is_empty());
    }

    #[test]
    fn field_selection_exclude_drops_named_field() {
        let s = scheme();
        let resolved = FieldSelection::Exclude(vec!["age".to_string()]).resolve(&s);
        assert_eq!(resolved, vec!["email".to_string()]);
    }

    #[test]
    fn field_selection_all_drops_force_excluded_field() {
        let s = scheme().field(Field::new("password_hash", FieldKind::Bytes).force_exclude());
        let resolved = FieldSelection::All.resolve(&s);
        assert!(!resolved.contains(&"password_hash".to_string()));
    }

    #[test]
    fn field_selection_only_still_returns_force_excluded_field_if_named() {
        let s = scheme().field(Field::new("password_hash", FieldKind::Bytes).force_exclude());
        let resolved = FieldSelection::Only(vec!["password_hash".to_string()]).resolve(&s);
        assert_eq!(resolved, vec!["password_hash".to_string()]);
    }
}
