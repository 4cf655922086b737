//! Migration history table management

use super::batch::MigrationBatch;
use super::record::MigrationRecord;
use crate::error::ExecutionError;
use crate::executor::Executor;
use crate::query::quote_ident;
use crate::value::Value;
use sea_query::{ColumnDef, PostgresQueryBuilder, Table, TableCreateStatement};

/// The history table recording applied batches, oldest first
///
/// The table is created on first use and only removed by an explicit
/// [`HistoryTable::drop_table`].
#[derive(Debug, Clone)]
pub struct HistoryTable {
    name: String,
}

impl HistoryTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for the history table
    pub fn create_statement(&self) -> TableCreateStatement {
        Table::create()
            .table(self.name.clone())
            .if_not_exists()
            .col(
                ColumnDef::new("id")
                    .big_integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(ColumnDef::new("identifier").text().not_null().unique_key())
            .col(ColumnDef::new("applied_at").timestamp().not_null())
            .col(ColumnDef::new("checksum").text().not_null())
            .to_owned()
    }

    /// Create the table if it does not exist yet
    pub fn ensure(&self, executor: &dyn Executor) -> Result<(), ExecutionError> {
        executor.execute(&self.create_statement().build(PostgresQueryBuilder), &[])?;
        Ok(())
    }

    /// Every recorded batch, in application order
    pub fn load(&self, executor: &dyn Executor) -> Result<Vec<MigrationRecord>, ExecutionError> {
        let sql = format!(
            r#"SELECT "id", "identifier", "applied_at", "checksum" FROM {} ORDER BY "id""#,
            quote_ident(&self.name)
        );
        executor
            .query(&sql, &[])?
            .iter()
            .map(MigrationRecord::from_record)
            .collect()
    }

    pub fn insert(&self, executor: &dyn Executor, batch: &MigrationBatch) -> Result<(), ExecutionError> {
        let sql = format!(
            r#"INSERT INTO {} ("identifier", "applied_at", "checksum") VALUES ($1, $2, $3)"#,
            quote_ident(&self.name)
        );
        executor.execute(
            &sql,
            &[
                Value::Text(batch.identifier.clone()),
                Value::DateTime(chrono::Utc::now().naive_utc()),
                Value::Text(batch.checksum.clone()),
            ],
        )?;
        Ok(())
    }

    pub fn remove(&self, executor: &dyn Executor, identifier: &str) -> Result<(), ExecutionError> {
        let sql = format!(
            r#"DELETE FROM {} WHERE "identifier" = $1"#,
            quote_ident(&self.name)
        );
        let removed = executor.execute(&sql, &[Value::Text(identifier.to_string())])?;
        log::debug!("removed {removed} history row(s) for {identifier}");
        Ok(())
    }

    /// Drop the table and everything it records
    pub fn drop_table(&self, executor: &dyn Executor) -> Result<(), ExecutionError> {
        executor.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(&self.name)), &[])?;
        Ok(())
    }
}

impl Default for HistoryTable {
    fn default() -> Self {
        Self::new("quarry_migrations")
    }
}
