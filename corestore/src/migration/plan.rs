//! Translates a declared [`Scheme`](crate::scheme::Scheme) into the set of
//! tables the migration engine must ensure exist: the base table, a join
//! table per `Set`/`Object` field, a value table per `Array` field, and a
//! delta (change-log) table for delta-enabled schemes.

use crate::backend::BackendKind;
use crate::field::{Field, FieldKind};
use crate::scheme::Scheme;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPlan {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
}

#[derive(Debug, Clone)]
pub struct IndexPlan {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// A named `UNIQUE` table constraint, emitted as `ADD CONSTRAINT`/`DROP
/// CONSTRAINT` DDL rather than as an index. PostgreSQL only - SQLite has no
/// constraint catalog distinct from its indexes, so there `base_table_plan`
/// keeps the same uniqueness requirement expressed as a unique `IndexPlan`
/// instead.
#[derive(Debug, Clone)]
pub struct ConstraintPlan {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TablePlan {
    pub name: String,
    pub columns: Vec<ColumnPlan>,
    pub indexes: Vec<IndexPlan>,
    pub constraints: Vec<ConstraintPlan>,
    pub version: u32,
}

/// Every table a scheme requires, in creation-safe order (base table
/// first, so join/value/delta tables' foreign references are never
/// emitted before the table they point at).
pub fn plan_for_scheme(scheme: &Scheme, backend: BackendKind) -> Vec<TablePlan> {
    if scheme.is_detached {
        return Vec::new();
    }
    let mut plans = vec![base_table_plan(scheme, backend)];
    for field in &scheme.fields {
        match &field.kind {
            FieldKind::Set { .. } => plans.push(join_table_plan(scheme, field)),
            FieldKind::Array { element } => plans.push(value_table_plan(scheme, field, element, backend)),
            FieldKind::View { .. } => plans.push(view_table_plan(scheme, field)),
            FieldKind::FullTextView { .. } if backend == BackendKind::Postgres => {
                // PostgreSQL stores the vector as a plain tsvector column
                // on the base table, refreshed by the worker after every
                // write that touches one of the field's source columns.
                let base = &mut plans[0];
                base.columns.push(ColumnPlan {
                    name: field.name.clone(),
                    sql_type: "tsvector".to_string(),
                    not_null: false,
                });
                base.indexes.push(IndexPlan {
                    name: format!("{}_{}_gin", scheme.name, field.name),
                    columns: vec![field.name.clone()],
                    unique: false,
                });
            }
            FieldKind::FullTextView { .. } => {
                // The SQLite FTS shadow table is created lazily by
                // `SqliteDriver::ensure_fts_shadow` the first time the
                // field is written, since it needs the live source table
                // name rather than a static plan.
            }
            _ => {}
        }
    }
    if scheme.has_delta {
        plans.push(delta_table_plan(scheme));
    }
    plans
}

fn base_table_plan(scheme: &Scheme, backend: BackendKind) -> TablePlan {
    let mut columns = vec![ColumnPlan {
        name: "__oid".to_string(),
        sql_type: "BIGINT".to_string(),
        not_null: true,
    }];
    let mut indexes = Vec::new();
    let mut constraints = Vec::new();
    for field in &scheme.fields {
        if !field.kind.is_stored() {
            continue;
        }
        if matches!(field.kind, FieldKind::Set { .. } | FieldKind::Array { .. }) {
            continue;
        }
        columns.push(ColumnPlan {
            name: field.name.clone(),
            sql_type: column_sql_type(field, backend),
            not_null: field.flags.contains(crate::field::FieldFlags::REQUIRED),
        });
        if field.flags.contains(crate::field::FieldFlags::INDEXED) {
            indexes.push(IndexPlan {
                name: format!("{}_{}_idx", scheme.name, field.name),
                columns: vec![field.name.clone()],
                unique: false,
            });
        }
        if field.flags.contains(crate::field::FieldFlags::UNIQUE) {
            push_unique(&mut indexes, &mut constraints, backend, format!("{}_{}_uidx", scheme.name, field.name), vec![field.name.clone()]);
        }
    }
    for constraint in &scheme.unique_constraints {
        push_unique(
            &mut indexes,
            &mut constraints,
            backend,
            format!("{}_{}_uidx", scheme.name, constraint.join("_")),
            constraint.clone(),
        );
    }
    TablePlan {
        name: scheme.name.clone(),
        columns,
        indexes,
        constraints,
        version: scheme.version,
    }
}

/// Records a uniqueness requirement as a named `ADD CONSTRAINT` on
/// PostgreSQL, or as a unique index everywhere else (SQLite has no table
/// constraint catalog separate from its indexes).
fn push_unique(indexes: &mut Vec<IndexPlan>, constraints: &mut Vec<ConstraintPlan>, backend: BackendKind, name: String, columns: Vec<String>) {
    match backend {
        BackendKind::Postgres => constraints.push(ConstraintPlan { name, columns }),
        BackendKind::Sqlite => indexes.push(IndexPlan { name, columns, unique: true }),
    }
}

fn join_table_plan(scheme: &Scheme, field: &Field) -> TablePlan {
    TablePlan {
        name: join_table_name(&scheme.name, &field.name),
        columns: vec![
            ColumnPlan { name: "S_id".to_string(), sql_type: "BIGINT".to_string(), not_null: true },
            ColumnPlan { name: "T_id".to_string(), sql_type: "BIGINT".to_string(), not_null: true },
        ],
        indexes: vec![IndexPlan {
            name: format!("{}_pk", join_table_name(&scheme.name, &field.name)),
            columns: vec!["S_id".to_string(), "T_id".to_string()],
            unique: true,
        }],
        constraints: Vec::new(),
        version: scheme.version,
    }
}

fn value_table_plan(scheme: &Scheme, field: &Field, element: &FieldKind, backend: BackendKind) -> TablePlan {
    TablePlan {
        name: join_table_name(&scheme.name, &field.name),
        columns: vec![
            ColumnPlan { name: "id".to_string(), sql_type: "BIGINT".to_string(), not_null: true },
            ColumnPlan { name: "S_id".to_string(), sql_type: "BIGINT".to_string(), not_null: true },
            ColumnPlan { name: "data".to_string(), sql_type: element_sql_type(element, backend), not_null: false },
        ],
        indexes: vec![IndexPlan {
            name: format!("{}_s_idx", join_table_name(&scheme.name, &field.name)),
            columns: vec!["S_id".to_string()],
            unique: false,
        }],
        constraints: Vec::new(),
        version: scheme.version,
    }
}

fn view_table_plan(scheme: &Scheme, field: &Field) -> TablePlan {
    TablePlan {
        name: format!("{}_{}_{}_view", scheme.name, field.name, field.name),
        columns: vec![
            ColumnPlan { name: "__vid".to_string(), sql_type: "BIGINT".to_string(), not_null: true },
            ColumnPlan { name: "S_id".to_string(), sql_type: "BIGINT".to_string(), not_null: true },
            ColumnPlan { name: "T_id".to_string(), sql_type: "BIGINT".to_string(), not_null: true },
        ],
        indexes: Vec::new(),
        constraints: Vec::new(),
        version: scheme.version,
    }
}

fn delta_table_plan(scheme: &Scheme) -> TablePlan {
    TablePlan {
        name: format!("{}_delta", scheme.name),
        columns: vec![
            ColumnPlan { name: "id".to_string(), sql_type: "BIGINT".to_string(), not_null: true },
            ColumnPlan { name: "object".to_string(), sql_type: "BIGINT".to_string(), not_null: true },
            ColumnPlan { name: "action".to_string(), sql_type: "BIGINT".to_string(), not_null: true },
            ColumnPlan { name: "time".to_string(), sql_type: "BIGINT".to_string(), not_null: true },
            ColumnPlan { name: "user".to_string(), sql_type: "BIGINT".to_string(), not_null: true },
        ],
        indexes: vec![IndexPlan {
            name: format!("{}_delta_object_time_idx", scheme.name),
            columns: vec!["object".to_string(), "time".to_string()],
            unique: false,
        }],
        constraints: Vec::new(),
        version: scheme.version,
    }
}

pub fn join_table_name(scheme: &str, field: &str) -> String {
    format!("{scheme}_{field}_{field}")
}

fn column_sql_type(field: &Field, backend: BackendKind) -> String {
    match &field.kind {
        FieldKind::Integer => "BIGINT".to_string(),
        FieldKind::Float => if backend == BackendKind::Postgres { "DOUBLE PRECISION".to_string() } else { "REAL".to_string() },
        FieldKind::Boolean => "BOOLEAN".to_string(),
        FieldKind::Text => "TEXT".to_string(),
        FieldKind::Bytes | FieldKind::File | FieldKind::Image => if backend == BackendKind::Postgres { "BYTEA".to_string() } else { "BLOB".to_string() },
        FieldKind::Data | FieldKind::Extra => if backend == BackendKind::Postgres { "JSONB".to_string() } else { "TEXT".to_string() },
        FieldKind::Object { .. } => "BIGINT".to_string(),
        FieldKind::Custom(tag) => tag.clone(),
        other => unreachable!("{other:?} is not a base-table column"),
    }
}

fn element_sql_type(element: &FieldKind, backend: BackendKind) -> String {
    match element {
        FieldKind::Integer => "BIGINT".to_string(),
        FieldKind::Float => if backend == BackendKind::Postgres { "DOUBLE PRECISION".to_string() } else { "REAL".to_string() },
        FieldKind::Text => "TEXT".to_string(),
        FieldKind::Object { .. } => "BIGINT".to_string(),
        _ => "TEXT".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field, OnRemove};

    #[test]
    fn base_table_skips_collection_fields_but_adds_join_table() {
        let scheme = Scheme::new("items").field(
            Field::new("tags", FieldKind::Set { element: Box::new(FieldKind::Text) })
                .on_remove(OnRemove::Reference)
                .unwrap(),
        );
        let plans = plan_for_scheme(&scheme, BackendKind::Postgres);
        assert_eq!(plans[0].name, "items");
        assert!(plans[0].columns.iter().all(|c| c.name != "tags"));
        assert_eq!(plans[1].name, "items_tags_tags");
    }

    #[test]
    fn delta_enabled_scheme_gets_delta_table() {
        let scheme = Scheme::new("items").field(Field::new("name", FieldKind::Text));
        let plans = plan_for_scheme(&scheme, BackendKind::Sqlite);
        assert!(plans.iter().any(|p| p.name == "items_delta"));
    }

    #[test]
    fn detached_scheme_has_no_tables() {
        let scheme = Scheme::new("embedded").detached().field(Field::new("x", FieldKind::Text));
        assert!(plan_for_scheme(&scheme, BackendKind::Postgres).is_empty());
    }
}
