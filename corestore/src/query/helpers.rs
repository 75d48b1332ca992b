//! Query builder helper functions: identifier quoting/validation and SQL
//! fragment assembly shared by `select.rs` and `modify.rs`.

use corestore_common::{Result, StoreError};
use unicode_normalization::UnicodeNormalization;

/// Quotes a SQL identifier, handling schema-qualified names
/// (`schema.table`) by quoting each part separately.
pub fn quote_identifier(name: &str) -> String {
    if name.contains('.') {
        name.split('.')
            .map(|part| format!("\"{}\"", part))
            .collect::<Vec<_>>()
            .join(".")
    } else {
        format!("\"{}\"", name)
    }
}

/// Validates a table/column identifier, allowing a single `schema.table`
/// qualification.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::Validation("identifier cannot be empty".into()));
    }
    if name.contains('.') {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() != 2 {
            return Err(StoreError::Validation(format!(
                "invalid schema-qualified identifier '{name}': must be 'schema.table'"
            )));
        }
        for part in parts {
            validate_identifier_part(part)?;
        }
        return Ok(());
    }
    validate_identifier_part(name)
}

/// Validates a single identifier part: no dots, ASCII alnum/underscore,
/// not a reserved word, not a system-catalog prefix.
pub fn validate_identifier_part(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::Validation("identifier part cannot be empty".into()));
    }

    // Normalize to NFKC to prevent Unicode confusable smuggling.
    let name = name.nfkc().collect::<String>();

    if name.len() > 63 {
        return Err(StoreError::Validation(format!(
            "identifier '{name}' exceeds maximum length of 63"
        )));
    }

    let first_char = name.chars().next().expect("checked non-empty above");
    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(StoreError::Validation(format!(
            "identifier '{name}' must start with a letter or underscore"
        )));
    }

    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            return Err(StoreError::Validation(format!(
                "identifier '{name}' contains invalid character '{ch}'"
            )));
        }
    }

    let name_lower = name.to_lowercase();
    if name_lower.starts_with("pg_") {
        return Err(StoreError::Validation(format!(
            "access to system catalog '{name}' is not allowed"
        )));
    }
    if name_lower == "information_schema" || name_lower == "sqlite_master" {
        return Err(StoreError::Validation(format!(
            "access to '{name}' is not allowed"
        )));
    }

    const SQL_KEYWORDS: &[&str] = &[
        "select", "insert", "update", "delete", "drop", "create", "alter", "truncate", "grant",
        "revoke", "exec", "execute", "union", "declare", "table", "index", "view", "schema",
        "database", "user", "role", "from", "where", "join", "inner", "outer", "left", "right",
        "on", "using", "and", "or", "not", "in", "exists", "between", "like", "is", "null",
        "true", "false", "case", "when", "then", "else", "end", "as", "order", "by", "group",
        "having", "limit", "offset", "distinct", "all", "any", "some",
    ];
    if SQL_KEYWORDS.contains(&name_lower.as_str()) {
        return Err(StoreError::Validation(format!(
            "identifier '{name}' is a reserved SQL keyword"
        )));
    }

    Ok(())
}

/// Adjusts `$N` parameter markers in a CTE's SQL by an offset, so its
/// params can be spliced into the outer query's parameter list.
pub fn adjust_param_indices(sql: &str, offset: usize) -> String {
    if offset == 0 {
        return sql.to_string();
    }
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '$' {
            let mut num_str = String::new();
            while let Some(&next_ch) = chars.peek() {
                if next_ch.is_ascii_digit() {
                    num_str.push(chars.next().expect("peeked digit"));
                } else {
                    break;
                }
            }
            if let Ok(num) = num_str.parse::<usize>() {
                result.push('$');
                result.push_str(&(num + offset).to_string());
            } else {
                result.push('$');
                result.push_str(&num_str);
            }
        } else {
            result.push(ch);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_system_catalog_access() {
        assert!(validate_identifier("pg_catalog.pg_class").is_err());
    }

    #[test]
    fn rejects_reserved_keywords() {
        assert!(validate_identifier("select").is_err());
    }

    #[test]
    fn accepts_schema_qualified_identifier() {
        assert!(validate_identifier("public.users").is_ok());
    }

    #[test]
    fn offset_shifts_every_marker() {
        assert_eq!(adjust_param_indices("a = $1 AND b = $2", 2), "a = $3 AND b = $4");
    }
}
