//! Planning and rendering against artifact directories

use quarry::migration::{load_batches, MigrationOperation};
use quarry::RenamePolicy;
use quarry_migrate::{batch_sql, find_batch, load_schema, plan_next, save};
use std::fs;
use tempfile::TempDir;

const LIBRARY: &str = r#"{
  "tables": [
    {
      "name": "book",
      "columns": [
        {"name": "id", "type": {"kind": "integer"}},
        {"name": "title", "type": {"kind": "text"}},
        {"name": "author_id", "type": {"kind": "reference", "table": "author", "column": "id"}}
      ],
      "constraints": [
        {"kind": "primary_key", "name": "book_pkey", "columns": ["id"]},
        {"kind": "foreign_key", "name": "book_author_id_fkey", "column": "author_id",
         "references_table": "author", "references_column": "id", "on_delete": "cascade"}
      ]
    },
    {
      "name": "author",
      "columns": [
        {"name": "id", "type": {"kind": "integer"}},
        {"name": "name", "type": {"kind": "text"}}
      ],
      "constraints": [
        {"kind": "primary_key", "name": "author_pkey", "columns": ["id"]}
      ]
    }
  ]
}"#;

fn write_schema(dir: &TempDir, json: &str) -> std::path::PathBuf {
    let path = dir.path().join("schema.json");
    fs::write(&path, json).unwrap();
    path
}

#[test]
fn test_plan_then_replan_is_empty() {
    let dir = TempDir::new().unwrap();
    let migrations = dir.path().join("migrations");
    let desired = load_schema(&write_schema(&dir, LIBRARY)).unwrap();

    let planned = plan_next(&migrations, &desired, "initial", RenamePolicy::Strict)
        .unwrap()
        .unwrap();
    assert_eq!(planned.batch.identifier, "0001_initial");
    let tables: Vec<&str> = planned
        .batch
        .operations
        .iter()
        .map(|op| match op {
            MigrationOperation::CreateTable { table } => table.name.as_str(),
            other => panic!("unexpected {other}"),
        })
        .collect();
    assert_eq!(tables, vec!["author", "book"]);

    let path = save(&migrations, &planned).unwrap();
    assert!(path.ends_with("0001_initial.json"));
    assert!(plan_next(&migrations, &desired, "again", RenamePolicy::Strict)
        .unwrap()
        .is_none());
}

#[test]
fn test_second_batch_chains_to_first() {
    let dir = TempDir::new().unwrap();
    let migrations = dir.path().join("migrations");
    let desired = load_schema(&write_schema(&dir, LIBRARY)).unwrap();
    let first = plan_next(&migrations, &desired, "initial", RenamePolicy::Strict)
        .unwrap()
        .unwrap();
    save(&migrations, &first).unwrap();

    let extended = LIBRARY.replace(
        r#"{"name": "name", "type": {"kind": "text"}}"#,
        r#"{"name": "name", "type": {"kind": "text"}},
        {"name": "bio", "type": {"kind": "text"}, "nullable": true}"#,
    );
    let desired = load_schema(&write_schema(&dir, &extended)).unwrap();
    let second = plan_next(&migrations, &desired, "author_bio", RenamePolicy::Strict)
        .unwrap()
        .unwrap();
    assert_eq!(second.batch.parent.as_deref(), Some("0001_initial"));
    assert_eq!(second.batch.operations.len(), 1);
    save(&migrations, &second).unwrap();

    let batches = load_batches(&migrations).unwrap();
    let newest = find_batch(&batches, None).unwrap();
    assert_eq!(newest.identifier, "0002_author_bio");
    let sql = batch_sql(newest, false);
    assert!(sql[0].contains(r#"ADD COLUMN "bio""#));
    let revert = batch_sql(newest, true);
    assert!(revert[0].contains(r#"DROP COLUMN "bio""#));
    assert!(find_batch(&batches, Some("0009_missing")).is_err());
}

#[test]
fn test_invalid_desired_schema_rejected() {
    let dir = TempDir::new().unwrap();
    let broken = LIBRARY.replace(r#""references_table": "author""#, r#""references_table": "writer""#);
    let err = load_schema(&write_schema(&dir, &broken)).unwrap_err();
    assert!(format!("{err:#}").contains("invalid"));
}
