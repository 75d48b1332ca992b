//! SQL emission throughput for the query builder: plain selects,
//! soft-limit CTE rewriting, and insert/update statement construction.

use corestore::query::{Comparator, OrderDirection, QueryBuilder};
use corestore::value::Value;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_plain_select(c: &mut Criterion) {
    c.bench_function("query_select_plain", |b| {
        b.iter(|| {
            let qb = QueryBuilder::new("users")
                .unwrap()
                .where_clause("age", Comparator::GreaterOrEqual, Value::Int(18))
                .unwrap()
                .order_by("name", OrderDirection::Asc)
                .unwrap()
                .limit(50);
            black_box(qb.build_select());
        });
    });
}

fn bench_soft_limit_select(c: &mut Criterion) {
    c.bench_function("query_select_soft_limit", |b| {
        b.iter(|| {
            let qb = QueryBuilder::new("posts")
                .unwrap()
                .where_clause("published", Comparator::Equal, Value::Bool(true))
                .unwrap()
                .order_by("score", OrderDirection::Desc)
                .unwrap()
                .soft_limit("author_id", 5)
                .unwrap();
            black_box(qb.build_select());
        });
    });
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("query_build_insert", |b| {
        b.iter(|| {
            let qb = QueryBuilder::new("users").unwrap();
            let values = vec![
                ("email".to_string(), Value::Text("a@b.com".into())),
                ("age".to_string(), Value::Int(30)),
            ];
            black_box(qb.build_insert(&values).unwrap());
        });
    });
}

criterion_group!(benches, bench_plain_select, bench_soft_limit_select, bench_insert);
criterion_main!(benches);
