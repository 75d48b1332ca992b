//! Catalog introspection: reads the backend's own metadata (PostgreSQL's
//! `information_schema`, SQLite's `sqlite_schema`/`PRAGMA`) into a
//! backend-neutral snapshot the diff engine compares against the desired
//! [`super::plan::TablePlan`]s.

use std::collections::HashMap;

use corestore_common::Result;

use crate::backend::{BackendKind, Driver};
use crate::query::QueryBuilder;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    pub not_null: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogTable {
    pub columns: Vec<CatalogColumn>,
    pub index_names: Vec<String>,
    /// Named `UNIQUE`/`CHECK`/etc. table constraints. Only ever populated on
    /// PostgreSQL - SQLite has no catalog distinct from `index_names`.
    pub constraint_names: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub tables: HashMap<String, CatalogTable>,
    /// `__versions` table contents: table name -> recorded version.
    pub versions: HashMap<String, u32>,
    /// Every trigger name that exists on the backend right now, regardless
    /// of which table it is attached to.
    pub trigger_names: Vec<String>,
}

impl CatalogSnapshot {
    pub fn table(&self, name: &str) -> Option<&CatalogTable> {
        self.tables.get(name)
    }
}

pub async fn introspect(driver: &dyn Driver) -> Result<CatalogSnapshot> {
    match driver.kind() {
        BackendKind::Postgres => introspect_postgres(driver).await,
        BackendKind::Sqlite => introspect_sqlite(driver).await,
    }
}

async fn introspect_postgres(driver: &dyn Driver) -> Result<CatalogSnapshot> {
    let mut snapshot = CatalogSnapshot::default();

    let rows = driver
        .fetch_all(
            "SELECT table_name, column_name, is_nullable FROM information_schema.columns WHERE table_schema = 'public'",
            &[],
        )
        .await?;
    for row in rows {
        let table = text(&row, "table_name");
        let column = text(&row, "column_name");
        let nullable = text(&row, "is_nullable") == "YES";
        snapshot.tables.entry(table).or_default().columns.push(CatalogColumn {
            name: column,
            not_null: !nullable,
        });
    }

    let rows = driver
        .fetch_all(
            "SELECT tablename, indexname FROM pg_indexes WHERE schemaname = 'public'",
            &[],
        )
        .await?;
    for row in rows {
        let table = text(&row, "tablename");
        let index = text(&row, "indexname");
        snapshot.tables.entry(table).or_default().index_names.push(index);
    }

    let rows = driver
        .fetch_all(
            "SELECT trigger_name FROM information_schema.triggers WHERE trigger_schema = 'public'",
            &[],
        )
        .await?;
    for row in rows {
        snapshot.trigger_names.push(text(&row, "trigger_name"));
    }

    let rows = driver
        .fetch_all(
            "SELECT table_name, constraint_name FROM information_schema.table_constraints \
             WHERE table_schema = 'public' AND constraint_type = 'UNIQUE'",
            &[],
        )
        .await?;
    for row in rows {
        let table = text(&row, "table_name");
        let constraint = text(&row, "constraint_name");
        snapshot.tables.entry(table).or_default().constraint_names.push(constraint);
    }

    load_versions(driver, &mut snapshot).await?;
    Ok(snapshot)
}

async fn introspect_sqlite(driver: &dyn Driver) -> Result<CatalogSnapshot> {
    let mut snapshot = CatalogSnapshot::default();

    let tables = driver
        .fetch_all(
            "SELECT name FROM sqlite_schema WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            &[],
        )
        .await?;
    for row in tables {
        let table = text(&row, "name");
        QueryBuilder::validate_identifier(&table)?;

        let columns = driver.fetch_all(&format!("PRAGMA table_info({table})"), &[]).await?;
        let mut entry = CatalogTable::default();
        for col in columns {
            entry.columns.push(CatalogColumn {
                name: text(&col, "name"),
                not_null: col.get("notnull").and_then(Value::as_object_id).unwrap_or(0) != 0,
            });
        }

        let indexes = driver.fetch_all(&format!("PRAGMA index_list({table})"), &[]).await?;
        for idx in indexes {
            entry.index_names.push(text(&idx, "name"));
        }
        snapshot.tables.insert(table, entry);
    }

    let triggers = driver
        .fetch_all("SELECT name FROM sqlite_schema WHERE type = 'trigger'", &[])
        .await?;
    for row in triggers {
        snapshot.trigger_names.push(text(&row, "name"));
    }

    load_versions(driver, &mut snapshot).await?;
    Ok(snapshot)
}

async fn load_versions(driver: &dyn Driver, snapshot: &mut CatalogSnapshot) -> Result<()> {
    if !snapshot.tables.contains_key("__versions") {
        return Ok(());
    }
    let rows = driver.fetch_all("SELECT name, version FROM __versions", &[]).await?;
    for row in rows {
        let name = text(&row, "name");
        let version = row.get("version").and_then(Value::as_object_id).unwrap_or(0) as u32;
        snapshot.versions.insert(name, version);
    }
    Ok(())
}

fn text(row: &crate::value::ValueRow, column: &str) -> String {
    row.get(column).and_then(Value::as_text).unwrap_or_default().to_string()
}
