//! Quarry Migration Library
//!
//! Everything the CLI does that does not need a database: reading the
//! desired schema, replaying the batch artifacts into the current schema,
//! planning the next batch and rendering batches to SQL. The binary
//! (`main.rs`) adds the commands that talk to PostgreSQL.

use anyhow::{bail, Context};
use quarry::migration::{load_batches, render, replay, write_batch};
use quarry::{MigrationBatch, MigrationPlanner, RenamePolicy, Schema};
use std::fs;
use std::path::{Path, PathBuf};

/// Read and validate a desired schema from a JSON file
///
/// The file holds `{"tables": [...]}` in the same shape the batch
/// artifacts use for `create_table` operations.
pub fn load_schema(path: &Path) -> anyhow::Result<Schema> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read desired schema {}", path.display()))?;
    let schema: Schema = serde_json::from_str(&json)
        .with_context(|| format!("{} is not a valid schema document", path.display()))?;
    schema
        .validate()
        .with_context(|| format!("desired schema {} is invalid", path.display()))?;
    Ok(schema)
}

/// A planned batch that has not been written yet
#[derive(Debug, Clone)]
pub struct PlannedBatch {
    pub batch: MigrationBatch,
    pub warnings: Vec<String>,
}

/// Plan the batch turning the artifacts' schema into `desired`
///
/// Returns `None` when the artifacts already produce `desired`.
pub fn plan_next(
    migrations_dir: &Path,
    desired: &Schema,
    name: &str,
    policy: RenamePolicy,
) -> anyhow::Result<Option<PlannedBatch>> {
    let batches = load_batches(migrations_dir)?;
    let current = replay(&batches).context("batch artifacts do not replay cleanly")?;
    let plan = MigrationPlanner::with_policy(policy).plan(&current, desired)?;
    if plan.is_empty() {
        return Ok(None);
    }
    let batch = MigrationBatch::next(batches.last(), name, plan.operations)?;
    Ok(Some(PlannedBatch {
        batch,
        warnings: plan.warnings,
    }))
}

/// Write a planned batch into the migrations directory
pub fn save(migrations_dir: &Path, planned: &PlannedBatch) -> anyhow::Result<PathBuf> {
    Ok(write_batch(migrations_dir, &planned.batch)?)
}

/// The statements a batch runs, or its inverse statements when `revert`
pub fn batch_sql(batch: &MigrationBatch, revert: bool) -> Vec<String> {
    if revert {
        batch
            .operations
            .iter()
            .rev()
            .flat_map(|op| render(&op.inverse()))
            .collect()
    } else {
        batch.operations.iter().flat_map(render).collect()
    }
}

/// Find a batch by identifier; `None` picks the newest
pub fn find_batch<'a>(
    batches: &'a [MigrationBatch],
    identifier: Option<&str>,
) -> anyhow::Result<&'a MigrationBatch> {
    match identifier {
        Some(id) => match batches.iter().find(|b| b.identifier == id) {
            Some(batch) => Ok(batch),
            None => bail!("no batch named '{id}'"),
        },
        None => batches.last().context("no batches found"),
    }
}
