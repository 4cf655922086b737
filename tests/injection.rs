//! Literal values only ever travel as bound parameters.

use quarry::query::col;
use quarry::schema::{Column, Schema, Table};
use quarry::{Delete, Insert, Query, QueryError, Update, Value};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const HOSTILE: &[&str] = &["'", "\"", ";", "--", "/*", "*/", "\\", "$1", "\0", " OR 1=1"];

fn person() -> Arc<Schema> {
    let mut schema = Schema::new();
    schema
        .define_table(
            Table::new("person")
                .column(Column::integer("id"))
                .column(Column::text("name"))
                .column(Column::text("nickname").nullable())
                .primary_key(&["id"]),
        )
        .unwrap();
    Arc::new(schema)
}

fn payload(rng: &mut StdRng) -> String {
    let mut s = String::from("DROP TABLE person");
    for _ in 0..rng.gen_range(1..6) {
        s.push_str(HOSTILE[rng.gen_range(0..HOSTILE.len())]);
        let len = rng.gen_range(0..8);
        s.push_str(&Alphanumeric.sample_string(rng, len));
    }
    s
}

#[test]
fn test_hostile_literals_are_parameters() {
    let schema = person();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..200 {
        let evil = payload(&mut rng);
        let statements = vec![
            Query::new(schema.clone(), "person")
                .unwrap()
                .filter(col("name").eq(evil.as_str()).or(col("nickname").like(evil.as_str())))
                .unwrap()
                .compile()
                .unwrap(),
            Insert::into_table(schema.clone(), "person")
                .unwrap()
                .set("name", evil.as_str())
                .unwrap()
                .compile()
                .unwrap(),
            Update::table(schema.clone(), "person")
                .unwrap()
                .set("nickname", evil.as_str())
                .unwrap()
                .filter(col("name").is_in([evil.as_str()]))
                .unwrap()
                .compile()
                .unwrap(),
            Delete::from_table(schema.clone(), "person")
                .unwrap()
                .filter(col("name").ne(evil.as_str()))
                .unwrap()
                .compile()
                .unwrap(),
        ];

        for compiled in statements {
            assert!(!compiled.sql.contains("DROP TABLE"), "{}", compiled.sql);
            assert!(compiled.params.contains(&Value::from(evil.as_str())));
        }
    }
}

#[test]
fn test_hostile_identifiers_are_rejected() {
    let schema = person();
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..50 {
        let evil = payload(&mut rng);
        let filtered = Query::new(schema.clone(), "person")
            .unwrap()
            .filter(col(evil.as_str()).eq(1));
        assert!(matches!(filtered, Err(QueryError::UnknownField { .. })));
        assert!(matches!(
            Query::new(schema.clone(), &evil),
            Err(QueryError::UnknownTable(_))
        ));
    }
}
