//! Migrator - applies and reverts batches against a database

use super::batch::MigrationBatch;
use super::checksum::{calculate_checksum, validate_checksum};
use super::lock::MigrationLock;
use super::record::MigrationRecord;
use super::schema_manager::SchemaManager;
use super::state_table::HistoryTable;
use super::status::MigrationStatus;
use super::BatchState;
use crate::config::MigrationsConfig;
use crate::error::MigrationError;
use crate::executor::{Connection, Executor};
use crate::transaction::{atomic, Transaction};
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Applies and reverts migration batches
///
/// Every apply or revert runs in one transaction holding the migration
/// advisory lock, so concurrent runs against the same database serialize
/// and a failed batch leaves neither schema changes nor a history entry.
#[derive(Debug, Clone, Default)]
pub struct Migrator {
    history: HistoryTable,
    lock: MigrationLock,
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MigrationsConfig) -> Self {
        Self {
            history: HistoryTable::new(config.history_table.clone()),
            lock: MigrationLock::new(
                config.lock_key,
                Duration::from_secs(config.lock_timeout_seconds),
            ),
        }
    }

    #[must_use]
    pub fn with_history_table(mut self, name: &str) -> Self {
        self.history = HistoryTable::new(name);
        self
    }

    pub fn history_table(&self) -> &HistoryTable {
        &self.history
    }

    /// Recorded batches, oldest first
    ///
    /// Creates the history table if it does not exist yet.
    pub fn history(&self, conn: &dyn Connection) -> Result<Vec<MigrationRecord>, MigrationError> {
        atomic(conn, |tx| {
            let executor: &dyn Executor = &*tx;
            self.lock.acquire(executor)?;
            self.history.ensure(executor)?;
            Ok(self.history.load(executor)?)
        })
    }

    /// Compare the history with the available batches
    ///
    /// # Arguments
    ///
    /// * `conn` - The database connection
    /// * `batches` - Every known batch, in sequence order
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::ChecksumMismatch` if an applied batch's
    /// artifact has changed since it was recorded.
    pub fn status(
        &self,
        conn: &dyn Connection,
        batches: &[MigrationBatch],
    ) -> Result<MigrationStatus, MigrationError> {
        let applied = self.history(conn)?;
        check_recorded(&applied, batches)?;
        for record in &applied {
            if !batches.iter().any(|b| b.identifier == record.identifier) {
                log::warn!("history records {} but no artifact exists for it", record.identifier);
            }
        }
        let pending = batches
            .iter()
            .filter(|b| !applied.iter().any(|r| r.identifier == b.identifier))
            .cloned()
            .collect();
        Ok(MigrationStatus::new(applied, pending))
    }

    /// Apply one batch atomically
    ///
    /// Drives the batch through `Pending → Applying → Applied`, or
    /// `Applying → Failed → RolledBack` when anything goes wrong.
    ///
    /// # Errors
    ///
    /// - `MigrationError::Conflict` if the last recorded batch is not the
    ///   batch's parent
    /// - `MigrationError::AlreadyApplied` if the batch is already recorded
    /// - `MigrationError::OperationFailed` if a statement fails; nothing is
    ///   recorded and every earlier operation of the batch is rolled back
    pub fn apply(&self, conn: &dyn Connection, batch: &MigrationBatch) -> Result<(), MigrationError> {
        self.apply_checked(conn, batch, &[])
    }

    /// Like [`Migrator::apply`], first checking every recorded batch found
    /// in `known` against its checksum while holding the migration lock
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::ChecksumMismatch` if a recorded batch no
    /// longer matches its artifact, plus everything [`Migrator::apply`]
    /// returns.
    pub fn apply_checked(
        &self,
        conn: &dyn Connection,
        batch: &MigrationBatch,
        known: &[MigrationBatch],
    ) -> Result<(), MigrationError> {
        let mut state = BatchState::Pending;
        self.apply_tracked(conn, batch, known, &mut state)
    }

    fn apply_tracked(
        &self,
        conn: &dyn Connection,
        batch: &MigrationBatch,
        known: &[MigrationBatch],
        state: &mut BatchState,
    ) -> Result<(), MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::migration_span("apply", &batch.identifier).entered();

        batch.verify_checksum()?;
        *state = state.transition(&batch.identifier, BatchState::Applying)?;
        let start = Instant::now();

        match atomic(conn, |tx| self.apply_locked(tx, batch, known)) {
            Ok(()) => {
                *state = state.transition(&batch.identifier, BatchState::Applied)?;
                #[cfg(feature = "metrics")]
                METRICS.record_batch_applied(start.elapsed());
                log::info!(
                    "applied {} ({} operation(s)) in {:?}",
                    batch.identifier,
                    batch.operations.len(),
                    start.elapsed()
                );
                Ok(())
            }
            Err(err) => {
                *state = state.transition(&batch.identifier, BatchState::Failed)?;
                *state = state.transition(&batch.identifier, BatchState::RolledBack)?;
                #[cfg(feature = "metrics")]
                METRICS.record_batch_failed();
                log::error!("batch {} rolled back: {err}", batch.identifier);
                Err(err)
            }
        }
    }

    fn apply_locked(
        &self,
        tx: &mut Transaction<'_>,
        batch: &MigrationBatch,
        known: &[MigrationBatch],
    ) -> Result<(), MigrationError> {
        let executor: &dyn Executor = &*tx;
        self.lock.acquire(executor)?;
        self.history.ensure(executor)?;

        let records = self.history.load(executor)?;
        if records.iter().any(|r| r.identifier == batch.identifier) {
            return Err(MigrationError::AlreadyApplied(batch.identifier.clone()));
        }
        check_recorded(&records, known)?;
        let last = records.last().map(|r| r.identifier.clone());
        if last != batch.parent {
            return Err(MigrationError::Conflict {
                batch: batch.identifier.clone(),
                expected: batch.parent.clone(),
                actual: last,
            });
        }

        let manager = SchemaManager::new(executor);
        for (index, operation) in batch.operations.iter().enumerate() {
            log::debug!("{}: {operation}", batch.identifier);
            manager
                .run(operation)
                .map_err(|source| MigrationError::OperationFailed {
                    identifier: batch.identifier.clone(),
                    index,
                    kind: operation.kind(),
                    source,
                })?;
        }
        self.history.insert(executor, batch)?;
        Ok(())
    }

    /// Revert the most recently applied batch
    ///
    /// Runs the inverse of every operation in reverse order, then deletes
    /// the history entry, all in one transaction.
    ///
    /// # Errors
    ///
    /// - `MigrationError::NotApplied` if the batch is not recorded
    /// - `MigrationError::OutOfOrder` if a later batch is recorded
    /// - `MigrationError::ChecksumMismatch` if the batch differs from what
    ///   was applied
    pub fn revert(&self, conn: &dyn Connection, batch: &MigrationBatch) -> Result<(), MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::migration_span("revert", &batch.identifier).entered();

        let start = Instant::now();
        let result = atomic(conn, |tx| self.revert_locked(tx, batch));
        match &result {
            Ok(()) => log::info!("reverted {} in {:?}", batch.identifier, start.elapsed()),
            Err(err) => log::error!("revert of {} rolled back: {err}", batch.identifier),
        }
        result
    }

    fn revert_locked(&self, tx: &mut Transaction<'_>, batch: &MigrationBatch) -> Result<(), MigrationError> {
        let executor: &dyn Executor = &*tx;
        self.lock.acquire(executor)?;
        self.history.ensure(executor)?;

        let records = self.history.load(executor)?;
        let Some(record) = records.iter().find(|r| r.identifier == batch.identifier) else {
            return Err(MigrationError::NotApplied(batch.identifier.clone()));
        };
        let latest = records.last().map(|r| r.identifier.clone());
        if latest.as_deref() != Some(batch.identifier.as_str()) {
            return Err(MigrationError::OutOfOrder {
                requested: batch.identifier.clone(),
                latest,
            });
        }
        validate_checksum(
            &batch.identifier,
            &record.checksum,
            &calculate_checksum(&batch.operations)?,
        )?;

        let manager = SchemaManager::new(executor);
        for (index, operation) in batch.operations.iter().enumerate().rev() {
            let inverse = operation.inverse();
            log::debug!("{}: {inverse}", batch.identifier);
            manager
                .run(&inverse)
                .map_err(|source| MigrationError::OperationFailed {
                    identifier: batch.identifier.clone(),
                    index,
                    kind: inverse.kind(),
                    source,
                })?;
        }
        self.history.remove(executor, &batch.identifier)?;
        Ok(())
    }

    /// Apply every pending batch in order, stopping at the first failure
    ///
    /// # Returns
    ///
    /// Returns the number of batches applied.
    pub fn apply_pending(
        &self,
        conn: &dyn Connection,
        batches: &[MigrationBatch],
    ) -> Result<usize, MigrationError> {
        let status = self.status(conn, batches)?;
        for batch in &status.pending {
            self.apply_checked(conn, batch, batches)?;
        }
        Ok(status.pending_count())
    }

    /// Drop the history table
    ///
    /// Meant for disposable test databases: the schema objects created by
    /// applied batches are left in place.
    pub fn reset_history(&self, conn: &dyn Connection) -> Result<(), MigrationError> {
        log::warn!("dropping migration history table {}", self.history.name());
        atomic(conn, |tx| {
            let executor: &dyn Executor = &*tx;
            self.lock.acquire(executor)?;
            Ok(self.history.drop_table(executor)?)
        })
    }
}

/// Recorded batches whose artifact in `known` no longer matches
fn check_recorded(records: &[MigrationRecord], known: &[MigrationBatch]) -> Result<(), MigrationError> {
    for record in records {
        if let Some(batch) = known.iter().find(|b| b.identifier == record.identifier) {
            validate_checksum(&record.identifier, &record.checksum, &batch.checksum)?;
        }
    }
    Ok(())
}
