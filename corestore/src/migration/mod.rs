//! Schema migration: brings the backend's schema in line with a declared
//! [`SchemeRegistry`](crate::scheme::SchemeRegistry) by introspecting the
//! catalog, diffing it against the required tables, and running the
//! resulting DDL inside a transaction. Every batch (success or failure) is
//! written to an audit file under `<document_root>/.reports/`.

mod catalog;
mod ddl;
mod plan;
mod triggers;

pub use catalog::{CatalogColumn, CatalogSnapshot, CatalogTable};
pub use plan::{ColumnPlan, ConstraintPlan, IndexPlan, TablePlan};
pub use triggers::delta_trigger_name;

use std::path::{Path, PathBuf};

use corestore_common::{Result, StoreError};
use tracing::{info, warn};

use crate::backend::Driver;
use crate::scheme::SchemeRegistry;

/// The housekeeping tables every backend must carry regardless of the
/// declared scheme set.
const HOUSEKEEPING_POSTGRES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS __objects(control INTEGER PRIMARY KEY, __oid BIGINT NOT NULL)",
    "CREATE TABLE IF NOT EXISTS __versions(name TEXT PRIMARY KEY, version INTEGER NOT NULL)",
    "CREATE TABLE IF NOT EXISTS __removed(__oid BIGINT PRIMARY KEY)",
    "CREATE TABLE IF NOT EXISTS __sessions(name BYTEA PRIMARY KEY, mtime BIGINT NOT NULL, maxage BIGINT NOT NULL, data BYTEA NOT NULL)",
    "CREATE TABLE IF NOT EXISTS __broadcasts(id BIGSERIAL PRIMARY KEY, date BIGINT NOT NULL, msg BYTEA NOT NULL)",
    "CREATE TABLE IF NOT EXISTS __login(id BIGSERIAL PRIMARY KEY, \"user\" BIGINT, name TEXT, password BYTEA, date BIGINT, success BOOLEAN, addr TEXT, host TEXT, path TEXT)",
];

const HOUSEKEEPING_SQLITE: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS __objects(control INTEGER PRIMARY KEY, __oid BIGINT NOT NULL)",
    "CREATE TABLE IF NOT EXISTS __versions(name TEXT PRIMARY KEY, version INTEGER NOT NULL)",
    "CREATE TABLE IF NOT EXISTS __removed(__oid BIGINT PRIMARY KEY)",
    "CREATE TABLE IF NOT EXISTS __sessions(name BLOB PRIMARY KEY, mtime BIGINT NOT NULL, maxage BIGINT NOT NULL, data BLOB NOT NULL)",
    "CREATE TABLE IF NOT EXISTS __broadcasts(id INTEGER PRIMARY KEY AUTOINCREMENT, date BIGINT NOT NULL, msg BLOB NOT NULL)",
    "CREATE TABLE IF NOT EXISTS __login(id INTEGER PRIMARY KEY AUTOINCREMENT, user BIGINT, name TEXT, password BLOB, date BIGINT, success BOOLEAN, addr TEXT, host TEXT, path TEXT)",
];

/// Outcome of one `MigrationEngine::migrate` call: the DDL statements run
/// (or that would have run, for a dry run) and whether the batch applied
/// cleanly.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub statements: Vec<String>,
    pub applied: bool,
    pub failure: Option<String>,
}

impl MigrationReport {
    fn to_audit_text(&self) -> String {
        let mut text = String::new();
        for stmt in &self.statements {
            text.push_str(stmt);
            text.push_str(";\n");
        }
        if let Some(failure) = &self.failure {
            text.push_str(&format!("-- FAILED: {failure}\n"));
        }
        text
    }
}

pub struct MigrationEngine<'a> {
    driver: &'a dyn Driver,
    document_root: PathBuf,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(driver: &'a dyn Driver, document_root: impl Into<PathBuf>) -> Self {
        Self { driver, document_root: document_root.into() }
    }

    /// Ensures housekeeping tables exist, introspects the catalog,
    /// computes the DDL needed to match `registry`, and applies it
    /// statement by statement. The first failure aborts the batch; DDL
    /// already applied before the failure is not rolled back by this
    /// method (each statement auto-commits on both backends), but the
    /// audit record captures exactly how far the batch got.
    pub async fn migrate(&self, registry: &SchemeRegistry) -> Result<MigrationReport> {
        self.ensure_housekeeping().await?;

        let existing = catalog::introspect(self.driver).await?;
        let mut statements = Vec::new();
        for scheme in registry.iter() {
            let plans = plan::plan_for_scheme(scheme, self.driver.kind());
            statements.extend(ddl::diff_plans(&plans, &existing, self.driver.kind()));
        }
        statements.extend(self.diff_triggers(registry, &existing));

        if statements.is_empty() {
            info!("migration: schema already converged, no DDL to run");
            return Ok(MigrationReport { statements, applied: true, failure: None });
        }

        let mut report = MigrationReport { statements: statements.clone(), applied: false, failure: None };
        for statement in &statements {
            if let Err(e) = self.run_batch_statement(statement).await {
                warn!(statement = %statement, error = %e, "migration DDL statement failed");
                report.failure = Some(format!("{statement}: {e}"));
                self.write_audit(&report).await;
                return Err(StoreError::SchemaMismatch(format!(
                    "migration failed on `{statement}`: {e}"
                )));
            }
        }
        for scheme in registry.iter() {
            self.record_version(&scheme.name, scheme.version).await?;
        }
        report.applied = true;
        self.write_audit(&report).await;
        Ok(report)
    }

    /// Every delta trigger a registered scheme requires but the catalog
    /// does not yet have, plus a drop for every `*_delta_trg` trigger in
    /// the catalog that no longer corresponds to a registered scheme.
    fn diff_triggers(&self, registry: &SchemeRegistry, existing: &CatalogSnapshot) -> Vec<String> {
        let mut statements = Vec::new();
        let mut required = std::collections::HashSet::new();
        for scheme in registry.iter() {
            for (name, stmts) in triggers::triggers_for_scheme(scheme, self.driver.kind()) {
                required.insert(name.clone());
                if !existing.trigger_names.contains(&name) {
                    statements.extend(stmts);
                }
            }
        }
        for name in &existing.trigger_names {
            if name.ends_with("_delta_trg") && !required.contains(name) {
                let table = name.trim_end_matches("_delta_trg");
                statements.extend(triggers::drop_statements(name, table, self.driver.kind()));
            }
        }
        statements
    }

    async fn run_batch_statement(&self, statement: &str) -> Result<()> {
        for part in statement.split("; ") {
            self.driver.execute(part, &[]).await?;
        }
        Ok(())
    }

    async fn ensure_housekeeping(&self) -> Result<()> {
        let statements = match self.driver.kind() {
            crate::backend::BackendKind::Postgres => HOUSEKEEPING_POSTGRES,
            crate::backend::BackendKind::Sqlite => HOUSEKEEPING_SQLITE,
        };
        for statement in statements {
            self.driver.execute(statement, &[]).await?;
        }
        self.driver
            .execute(
                "INSERT INTO __objects (control, __oid) VALUES (0, 0) ON CONFLICT DO NOTHING",
                &[],
            )
            .await?;
        Ok(())
    }

    async fn record_version(&self, name: &str, version: u32) -> Result<()> {
        let sql = match self.driver.kind() {
            crate::backend::BackendKind::Postgres => {
                "INSERT INTO __versions (name, version) VALUES ($1, $2) ON CONFLICT (name) DO UPDATE SET version = EXCLUDED.version"
            }
            crate::backend::BackendKind::Sqlite => {
                "INSERT INTO __versions (name, version) VALUES ($1, $2) ON CONFLICT (name) DO UPDATE SET version = EXCLUDED.version"
            }
        };
        self.driver
            .execute(sql, &[crate::value::Value::Text(name.to_string()), crate::value::Value::BigInt(version as i64)])
            .await?;
        Ok(())
    }

    async fn write_audit(&self, report: &MigrationReport) {
        let reports_dir = self.document_root.join(".reports");
        if let Err(e) = tokio::fs::create_dir_all(&reports_dir).await {
            warn!(error = %e, "could not create .reports directory for migration audit");
            return;
        }
        let path = reports_dir.join(format!("update.{}.sql", chrono::Utc::now().timestamp_millis()));
        if let Err(e) = tokio::fs::write(&path, report.to_audit_text()).await {
            warn!(error = %e, path = %path.display(), "could not write migration audit record");
        }
    }
}

/// Convenience for callers that only want the report directory's path
/// without constructing an engine (used by tests and CLI front-ends).
pub fn reports_dir(document_root: &Path) -> PathBuf {
    document_root.join(".reports")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_report_renders_audit_text_with_failure() {
        let report = MigrationReport {
            statements: vec!["CREATE TABLE x (id BIGINT)".to_string()],
            applied: false,
            failure: Some("boom".to_string()),
        };
        let text = report.to_audit_text();
        assert!(text.contains("CREATE TABLE"));
        assert!(text.contains("FAILED: boom"));
    }
}
