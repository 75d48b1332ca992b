//! Result row types: the object a scheme materializes on read, and the
//! change-log row a delta-enabled scheme's shadow table emits.

use corestore_common::{Result, StoreError};
use tracing::warn;

use crate::scheme::Scheme;
use crate::value::{Value, ValueRow};

/// A single persisted object: its `__oid` plus its field values in
/// declaration order. Virtual fields are not present here until a
/// worker resolves them from their declared dependencies.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRow {
    pub oid: i64,
    pub values: ValueRow,
}

impl ObjectRow {
    /// Builds an `ObjectRow` from a decoded backend row, pulling `__oid`
    /// out of the column map and validating it is present and non-null -
    /// every stored row carries one regardless of scheme.
    pub fn from_value_row(mut row: ValueRow) -> Result<Self> {
        let oid = row
            .remove("__oid")
            .ok_or_else(|| StoreError::Backend("row is missing __oid".into()))?
            .as_object_id()
            .ok_or_else(|| StoreError::Backend("__oid column is not an integer".into()))?;
        Ok(Self { oid, values: row })
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Materializes `Virtual` fields by running the scheme's declared
    /// dependency projection. A field with no registered resolver, or
    /// whose dependencies are missing from this row (e.g. excluded by a
    /// prior field-resolution pass), is skipped with a warning rather than
    /// failing the whole read.
    pub fn resolve_virtuals(&mut self, scheme: &Scheme) {
        for field in &scheme.fields {
            let crate::field::FieldKind::Virtual(resolver) = &field.kind else { continue };
            if self.values.contains_key(&field.name) {
                continue;
            }
            let Some(resolver) = resolver else {
                warn!(
                    scheme = %scheme.name,
                    field = %field.name,
                    "virtual field has no registered resolver; leaving unset"
                );
                continue;
            };
            if !resolver.deps.iter().all(|dep| self.values.contains_key(dep)) {
                warn!(
                    scheme = %scheme.name,
                    field = %field.name,
                    "virtual field dependencies missing from row; leaving unset"
                );
                continue;
            }
            let value = (resolver.read)(&self.values);
            self.values.insert(field.name.clone(), value);
        }
    }
}

/// The kind of mutation a delta row records, in the numeric encoding the
/// shadow table's `action` column uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaAction {
    Create = 1,
    Update = 2,
    Delete = 3,
    Append = 4,
    Erase = 5,
}

impl DeltaAction {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(DeltaAction::Create),
            2 => Ok(DeltaAction::Update),
            3 => Ok(DeltaAction::Delete),
            4 => Ok(DeltaAction::Append),
            5 => Ok(DeltaAction::Erase),
            other => Err(StoreError::Backend(format!("unknown delta action code {other}"))),
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// One entry from a scheme's delta (change-log) shadow table. `tag` is
/// only populated for view deltas, where it names the parent row the
/// view entry belonged to at the time of the change.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRow {
    pub id: i64,
    pub object: i64,
    pub action: DeltaAction,
    pub time: i64,
    pub user: i64,
    pub tag: Option<i64>,
}

impl DeltaRow {
    pub fn from_value_row(row: &ValueRow) -> Result<Self> {
        let field = |name: &str| -> Result<i64> {
            row.get(name)
                .and_then(Value::as_object_id)
                .ok_or_else(|| StoreError::Backend(format!("delta row is missing '{name}'")))
        };
        Ok(Self {
            id: field("id")?,
            object: field("object")?,
            action: DeltaAction::from_code(field("action")?)?,
            time: field("time")?,
            user: field("user")?,
            tag: row.get("tag").and_then(Value::as_object_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn object_row_extracts_oid() {
        let mut values = BTreeMap::new();
        values.insert("__oid".to_string(), Value::BigInt(7));
        values.insert("name".to_string(), Value::Text("x".into()));
        let row = ObjectRow::from_value_row(values).unwrap();
        assert_eq!(row.oid, 7);
        assert_eq!(row.get("name"), Some(&Value::Text("x".into())));
        assert!(row.get("__oid").is_none());
    }

    #[test]
    fn object_row_without_oid_rejected() {
        let values: ValueRow = BTreeMap::new();
        assert!(ObjectRow::from_value_row(values).is_err());
    }

    #[test]
    fn delta_action_round_trips_through_code() {
        for action in [
            DeltaAction::Create,
            DeltaAction::Update,
            DeltaAction::Delete,
            DeltaAction::Append,
            DeltaAction::Erase,
        ] {
            assert_eq!(DeltaAction::from_code(action.code()).unwrap(), action);
        }
        assert!(DeltaAction::from_code(99).is_err());
    }

    #[test]
    fn delta_row_parses_from_value_row() {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::BigInt(1));
        values.insert("object".to_string(), Value::BigInt(42));
        values.insert("action".to_string(), Value::BigInt(2));
        values.insert("time".to_string(), Value::BigInt(1_700_000_000));
        values.insert("user".to_string(), Value::BigInt(9));
        let delta = DeltaRow::from_value_row(&values).unwrap();
        assert_eq!(delta.action, DeltaAction::Update);
        assert_eq!(delta.tag, None);
    }
}
