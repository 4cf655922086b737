//! Migration status tracking

use super::batch::MigrationBatch;
use super::record::MigrationRecord;

/// Applied versus pending batches
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Applied batches (from the history table), oldest first
    pub applied: Vec<MigrationRecord>,

    /// Batches with no history entry, in sequence order
    pub pending: Vec<MigrationBatch>,
}

impl MigrationStatus {
    #[must_use]
    pub fn new(applied: Vec<MigrationRecord>, pending: Vec<MigrationBatch>) -> Self {
        Self { applied, pending }
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn total(&self) -> usize {
        self.applied.len() + self.pending.len()
    }

    /// Check if all batches are applied
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    /// Identifier of the most recently applied batch
    #[must_use]
    pub fn latest_applied(&self) -> Option<&str> {
        self.applied.last().map(|r| r.identifier.as_str())
    }

    /// Identifier of the next batch to apply
    #[must_use]
    pub fn next_pending(&self) -> Option<&str> {
        self.pending.first().map(|b| b.identifier.as_str())
    }
}
