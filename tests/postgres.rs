//! Round trip against a live PostgreSQL.
//!
//! Set `QUARRY_TEST_DATABASE_URL` to run; the tests pass trivially otherwise.

use quarry::migration::{MigrationBatch, MigrationPlanner, Migrator};
use quarry::query::{col, count_all};
use quarry::schema::{Column, OnDelete, Schema, Table};
use quarry::{atomic, Delete, Error, Insert, PostgresConnection, Query, Value};
use rand::Rng;
use std::sync::Arc;

fn connect() -> Option<PostgresConnection> {
    let url = std::env::var("QUARRY_TEST_DATABASE_URL").ok()?;
    Some(PostgresConnection::connect(&url).expect("QUARRY_TEST_DATABASE_URL is not reachable"))
}

fn library(suffix: u32) -> Schema {
    let author = format!("author_{suffix}");
    let mut schema = Schema::new();
    schema
        .define_table(
            Table::new(author.as_str())
                .column(Column::integer("id"))
                .column(Column::text("name"))
                .primary_key(&["id"]),
        )
        .unwrap();
    schema
        .define_table(
            Table::new(format!("book_{suffix}"))
                .column(Column::integer("id"))
                .column(Column::text("title"))
                .column(Column::reference("author_id", author.as_str(), "id"))
                .primary_key(&["id"])
                .foreign_key("author_id", &author, "id", OnDelete::Cascade),
        )
        .unwrap();
    schema
}

#[test]
fn test_apply_write_cascade_revert() {
    let Some(conn) = connect() else {
        eprintln!("QUARRY_TEST_DATABASE_URL not set; skipping");
        return;
    };
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    let (author, book) = (format!("author_{suffix}"), format!("book_{suffix}"));
    let desired = library(suffix);
    let schema = Arc::new(desired.clone());

    let plan = MigrationPlanner::new().plan(&Schema::new(), &desired).unwrap();
    let batch = MigrationBatch::next(None, "initial", plan.operations).unwrap();
    let migrator = Migrator::new().with_history_table(&format!("quarry_history_{suffix}"));
    migrator.apply(&conn, &batch).unwrap();
    assert_eq!(migrator.history(&conn).unwrap().len(), 1);

    let author_id = atomic(&conn, |tx| -> Result<i64, Error> {
        let rows = Insert::into_table(schema.clone(), &author)?
            .set("name", "Ursula")?
            .returning(&["id"])?
            .fetch(tx)?;
        let id = rows[0].get("id").and_then(Value::as_i64).unwrap_or_default();
        for title in ["The Dispossessed", "The Lathe of Heaven"] {
            Insert::into_table(schema.clone(), &book)?
                .set("title", title)?
                .set("author_id", id)?
                .execute(tx)?;
        }
        Ok(id)
    })
    .unwrap();

    let count = |conn: &PostgresConnection| {
        Query::new(schema.clone(), &book)
            .unwrap()
            .aggregate("n", count_all())
            .unwrap()
            .fetch_one(conn)
            .unwrap()
            .get("n")
            .and_then(Value::as_i64)
    };
    assert_eq!(count(&conn), Some(2));

    Delete::from_table(schema.clone(), &author)
        .unwrap()
        .filter(col("id").eq(author_id))
        .unwrap()
        .execute(&conn)
        .unwrap();
    assert_eq!(count(&conn), Some(0));

    migrator.revert(&conn, &batch).unwrap();
    assert!(migrator.history(&conn).unwrap().is_empty());
    migrator.reset_history(&conn).unwrap();
}

#[test]
fn test_failed_batch_leaves_no_trace() {
    let Some(conn) = connect() else {
        eprintln!("QUARRY_TEST_DATABASE_URL not set; skipping");
        return;
    };
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    let mut desired = library(suffix);
    desired
        .define_table(
            Table::new(format!("broken_{suffix}"))
                .column(Column::integer("id"))
                .primary_key(&["id"])
                .check(&format!("broken_{suffix}_check"), "no_such_column > 0"),
        )
        .unwrap();

    let plan = MigrationPlanner::new().plan(&Schema::new(), &desired).unwrap();
    let batch = MigrationBatch::next(None, "initial", plan.operations).unwrap();
    let migrator = Migrator::new().with_history_table(&format!("quarry_history_{suffix}"));
    assert!(migrator.apply(&conn, &batch).is_err());

    let tables = Query::new(
        Arc::new({
            let mut catalog = Schema::new();
            catalog
                .define_table(
                    Table::new("pg_tables")
                        .column(Column::text("tablename"))
                        .primary_key(&["tablename"]),
                )
                .unwrap();
            catalog
        }),
        "pg_tables",
    )
    .unwrap()
    .filter(col("tablename").eq(format!("author_{suffix}")))
    .unwrap()
    .fetch(&conn)
    .unwrap();
    assert!(tables.is_empty());
    migrator.reset_history(&conn).unwrap();
}

#[test]
fn test_count_of_adults() {
    let Some(conn) = connect() else {
        eprintln!("QUARRY_TEST_DATABASE_URL not set; skipping");
        return;
    };
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    let person = format!("person_{suffix}");
    let mut desired = Schema::new();
    desired
        .define_table(
            Table::new(person.as_str())
                .column(Column::integer("id"))
                .column(Column::integer("age"))
                .primary_key(&["id"]),
        )
        .unwrap();
    let schema = Arc::new(desired.clone());

    let plan = MigrationPlanner::new().plan(&Schema::new(), &desired).unwrap();
    let batch = MigrationBatch::next(None, "people", plan.operations).unwrap();
    let migrator = Migrator::new().with_history_table(&format!("quarry_history_{suffix}"));
    migrator.apply(&conn, &batch).unwrap();

    for age in [15, 20, 30, 17] {
        Insert::into_table(schema.clone(), &person)
            .unwrap()
            .set("age", age)
            .unwrap()
            .execute(&conn)
            .unwrap();
    }

    let row = Query::new(schema.clone(), &person)
        .unwrap()
        .filter(col("age").gte(18))
        .unwrap()
        .aggregate("count", count_all())
        .unwrap()
        .fetch_one(&conn)
        .unwrap();
    assert_eq!(row.len(), 1);
    assert_eq!(row.get("count").and_then(Value::as_i64), Some(2));

    migrator.revert(&conn, &batch).unwrap();
    migrator.reset_history(&conn).unwrap();
}
