use super::*;
use crate::value::Value;

#[test]
fn select_with_where_and_limit() {
    let qb = QueryBuilder::new("users")
        .unwrap()
        .where_clause("age", Comparator::GreaterOrEqual, Value::Int(18))
        .unwrap()
        .where_clause("active", Comparator::Equal, Value::Bool(true))
        .unwrap()
        .order_by("name", OrderDirection::Asc)
        .unwrap()
        .limit(10);
    let (sql, params) = qb.build_select();
    assert_eq!(
        sql,
        "SELECT * FROM \"users\" WHERE \"age\" >= $1 AND \"active\" = $2 ORDER BY \"name\" ASC LIMIT $3"
    );
    assert_eq!(params.len(), 3);
}

#[test]
fn between_binds_two_params_in_order() {
    let qb = QueryBuilder::new("events")
        .unwrap()
        .where_between("created_at", Value::Int(100), Value::Int(200))
        .unwrap();
    let (sql, params) = qb.build_select();
    assert!(sql.contains("BETWEEN $1 AND $2"));
    assert_eq!(params, vec![Value::Int(100), Value::Int(200)]);
}

#[test]
fn soft_limit_wraps_query_in_row_number_cte() {
    let qb = QueryBuilder::new("comments")
        .unwrap()
        .order_by("created_at", OrderDirection::Desc)
        .unwrap()
        .soft_limit("post_id", 3)
        .unwrap();
    let (sql, params) = qb.build_select();
    assert!(sql.starts_with("WITH \"__soft_limited\" AS"));
    assert!(sql.contains("ROW_NUMBER() OVER (PARTITION BY \"post_id\" ORDER BY \"created_at\" DESC)"));
    assert!(sql.contains("WHERE \"__rn\" <= $1"));
    assert_eq!(params, vec![Value::BigInt(3)]);
}

#[test]
fn insert_rejects_empty_values() {
    let qb = QueryBuilder::new("users").unwrap();
    assert!(qb.build_insert(&[]).is_err());
}

#[test]
fn insert_builds_positional_placeholders() {
    let qb = QueryBuilder::new("users").unwrap();
    let (sql, params) = qb
        .build_insert(&[
            ("name".to_string(), Value::Text("Alice".into())),
            ("age".to_string(), Value::Int(30)),
        ])
        .unwrap();
    assert_eq!(
        sql,
        "INSERT INTO \"users\" (\"name\", \"age\") VALUES ($1, $2) RETURNING *"
    );
    assert_eq!(params.len(), 2);
}

#[test]
fn update_combines_set_and_where_params() {
    let qb = QueryBuilder::new("users")
        .unwrap()
        .where_clause("id", Comparator::Equal, Value::Int(42))
        .unwrap();
    let (sql, params) = qb
        .build_update(&[("name".to_string(), Value::Text("Bob".into()))])
        .unwrap();
    assert_eq!(sql, "UPDATE \"users\" SET \"name\" = $1 WHERE \"id\" = $2");
    assert_eq!(params, vec![Value::Text("Bob".into()), Value::Int(42)]);
}

#[test]
fn delete_with_returning_all() {
    let qb = QueryBuilder::new("users")
        .unwrap()
        .where_clause("id", Comparator::Equal, Value::Int(1))
        .unwrap()
        .returning_all();
    let (sql, _params) = qb.build_delete();
    assert_eq!(sql, "DELETE FROM \"users\" WHERE \"id\" = $1 RETURNING *");
}

#[test]
fn identifier_validation_rejects_keywords_and_system_catalogs() {
    assert!(QueryBuilder::new("select").is_err());
    assert!(QueryBuilder::new("pg_class").is_err());
    assert!(QueryBuilder::new("users").is_ok());
}
