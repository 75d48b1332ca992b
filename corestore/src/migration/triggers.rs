//! Trigger generation: for every delta-enabled scheme, synthesizes the
//! AFTER INSERT/UPDATE/DELETE trigger that appends a row to the scheme's
//! shadow delta table, so a change is recorded atomically with the
//! mutation that caused it rather than depending on every write path
//! going through [`crate::worker::Worker`]. Trigger names encode the
//! scheme and purpose they were generated for, so an existing trigger's
//! intent can be recovered from its name alone during a diff.

use crate::backend::BackendKind;
use crate::scheme::Scheme;

/// The trigger (and, on PostgreSQL, its backing function) that appends to
/// `<scheme>_delta` on every insert, update, and delete of `<scheme>`.
pub fn delta_trigger_name(scheme: &str) -> String {
    format!("{scheme}_delta_trg")
}

/// Every trigger a scheme requires, as the standalone statements needed
/// to (re)install it: a DROP, then its CREATE(s). Each entry is a single
/// executable statement — callers must not re-split these on `"; "`, since
/// a PostgreSQL trigger function body legitimately contains that sequence
/// inside its dollar-quoted body. The caller filters the returned name
/// against an introspected trigger-name set before running the statements.
pub fn triggers_for_scheme(scheme: &Scheme, backend: BackendKind) -> Vec<(String, Vec<String>)> {
    if scheme.is_detached || !scheme.has_delta {
        return Vec::new();
    }
    let name = delta_trigger_name(&scheme.name);
    let statements = match backend {
        BackendKind::Postgres => postgres_delta_trigger(&scheme.name, &name),
        BackendKind::Sqlite => sqlite_delta_trigger(&scheme.name, &name),
    };
    vec![(name, statements)]
}

/// DROP statements for triggers present in the catalog but no longer
/// required by any registered scheme.
pub fn drop_statements(trigger_name: &str, table: &str, backend: BackendKind) -> Vec<String> {
    match backend {
        BackendKind::Postgres => vec![
            format!("DROP TRIGGER IF EXISTS \"{trigger_name}\" ON \"{table}\""),
            format!("DROP FUNCTION IF EXISTS \"{trigger_name}_func\"()"),
        ],
        BackendKind::Sqlite => vec![format!("DROP TRIGGER IF EXISTS \"{trigger_name}\"")],
    }
}

fn postgres_delta_trigger(table: &str, trigger_name: &str) -> Vec<String> {
    let delta_table = format!("{table}_delta");
    let function = format!(
        "CREATE OR REPLACE FUNCTION \"{trigger_name}_func\"() RETURNS TRIGGER AS ${trigger_name}$\n\
         BEGIN\n\
         IF (TG_OP = 'DELETE') THEN\n\
         INSERT INTO \"{delta_table}\" (object, action, time, \"user\") VALUES (OLD.__oid, 3, current_setting('serenity.now')::bigint, current_setting('serenity.user')::bigint);\n\
         ELSIF (TG_OP = 'UPDATE') THEN\n\
         INSERT INTO \"{delta_table}\" (object, action, time, \"user\") VALUES (NEW.__oid, 2, current_setting('serenity.now')::bigint, current_setting('serenity.user')::bigint);\n\
         ELSE\n\
         INSERT INTO \"{delta_table}\" (object, action, time, \"user\") VALUES (NEW.__oid, 1, current_setting('serenity.now')::bigint, current_setting('serenity.user')::bigint);\n\
         END IF;\n\
         RETURN NULL;\n\
         END;\n\
         ${trigger_name}$ LANGUAGE plpgsql"
    );
    let trigger = format!(
        "CREATE TRIGGER \"{trigger_name}\" AFTER INSERT OR UPDATE OR DELETE ON \"{table}\" FOR EACH ROW EXECUTE PROCEDURE \"{trigger_name}_func\"()"
    );
    vec![
        format!("DROP TRIGGER IF EXISTS \"{trigger_name}\" ON \"{table}\""),
        function,
        trigger,
    ]
}

fn sqlite_delta_trigger(table: &str, trigger_name: &str) -> Vec<String> {
    let delta_table = format!("{table}_delta");
    let trigger = format!(
        "CREATE TRIGGER \"{trigger_name}\" AFTER INSERT OR UPDATE OR DELETE ON \"{table}\" BEGIN\n\
         INSERT INTO \"{delta_table}\" (object, action, time, \"user\") VALUES (\n\
           CASE WHEN old.__oid IS NOT NULL THEN old.__oid ELSE new.__oid END,\n\
           CASE WHEN old.__oid IS NULL THEN 1 WHEN new.__oid IS NULL THEN 3 ELSE 2 END,\n\
           sp_sqlite_now(), sp_sqlite_user());\n\
         END"
    );
    vec![format!("DROP TRIGGER IF EXISTS \"{trigger_name}\""), trigger]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field, FieldKind};

    #[test]
    fn non_delta_scheme_gets_no_trigger() {
        let scheme = Scheme::new("items")
            .field(Field::new("name", FieldKind::Text))
            .without_delta();
        assert!(triggers_for_scheme(&scheme, BackendKind::Postgres).is_empty());
    }

    #[test]
    fn delta_scheme_gets_one_trigger_per_backend() {
        let scheme = Scheme::new("items").field(Field::new("name", FieldKind::Text));
        let pg = triggers_for_scheme(&scheme, BackendKind::Postgres);
        assert_eq!(pg.len(), 1);
        assert_eq!(pg[0].0, "items_delta_trg");
        assert!(pg[0].1.iter().any(|s| s.contains("CREATE TRIGGER")));
        assert!(!pg[0].1.iter().any(|s| s.contains("; ")));

        let sqlite = triggers_for_scheme(&scheme, BackendKind::Sqlite);
        assert_eq!(sqlite.len(), 1);
        assert!(sqlite[0].1.iter().any(|s| s.contains("sp_sqlite_now")));
    }

    #[test]
    fn detached_scheme_gets_no_trigger_even_with_delta() {
        let scheme = Scheme::new("items").detached();
        assert!(triggers_for_scheme(&scheme, BackendKind::Sqlite).is_empty());
    }
}
