//! Schema migrations
//!
//! - [`MigrationPlanner`] diffs two schema snapshots into an ordered
//!   [`MigrationPlan`] of [`MigrationOperation`]s
//! - [`MigrationBatch`] groups operations into a checksummed, chained unit,
//!   stored on disk as `NNNN_name.json` (see [`file`])
//! - [`Migrator`] applies and reverts batches atomically, recording them
//!   in a history table
//!
//! # Example
//!
//! ```rust
//! use quarry::migration::{MigrationBatch, MigrationPlanner, Migrator};
//! use quarry::mock::MockConnection;
//! use quarry::schema::{Column, OnDelete, Schema, Table};
//!
//! let mut desired = Schema::new();
//! desired.define_table(
//!     Table::new("author")
//!         .column(Column::integer("id"))
//!         .column(Column::text("name"))
//!         .primary_key(&["id"]),
//! )?;
//! desired.define_table(
//!     Table::new("book")
//!         .column(Column::integer("id"))
//!         .column(Column::reference("author_id", "author", "id"))
//!         .primary_key(&["id"])
//!         .foreign_key("author_id", "author", "id", OnDelete::Cascade),
//! )?;
//!
//! let plan = MigrationPlanner::new().plan(&Schema::new(), &desired)?;
//! let batch = MigrationBatch::next(None, "initial", plan.operations)?;
//! assert_eq!(batch.identifier, "0001_initial");
//!
//! let conn = MockConnection::new();
//! Migrator::new().apply(&conn, &batch)?;
//! # Ok::<(), quarry::Error>(())
//! ```

pub mod batch;
pub mod checksum;
pub mod dependency;
pub mod file;
pub mod lock;
pub mod migrator;
pub mod operation;
pub mod planner;
pub mod record;
pub mod schema_manager;
pub mod state_table;
pub mod status;

pub use crate::error::MigrationError;
pub use batch::{replay, validate_chain, MigrationBatch};
pub use checksum::{calculate_checksum, validate_checksum};
pub use file::{discover_batches, load_batches, write_batch, BatchFile};
pub use lock::MigrationLock;
pub use migrator::Migrator;
pub use operation::MigrationOperation;
pub use planner::{MigrationPlan, MigrationPlanner, RenamePolicy};
pub use record::MigrationRecord;
pub use schema_manager::{render, SchemaManager};
pub use state_table::HistoryTable;
pub use status::MigrationStatus;

/// Lifecycle of a batch during [`Migrator::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Applying,
    Applied,
    Failed,
    RolledBack,
}

impl BatchState {
    pub fn can_transition_to(self, next: BatchState) -> bool {
        matches!(
            (self, next),
            (BatchState::Pending, BatchState::Applying)
                | (BatchState::Applying, BatchState::Applied)
                | (BatchState::Applying, BatchState::Failed)
                | (BatchState::Failed, BatchState::RolledBack)
        )
    }

    /// Move to `next`, logging the transition
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidTransition` for any move outside
    /// `Pending → Applying → Applied` and `Applying → Failed → RolledBack`.
    pub fn transition(self, identifier: &str, next: BatchState) -> Result<BatchState, MigrationError> {
        if !self.can_transition_to(next) {
            return Err(MigrationError::InvalidTransition {
                identifier: identifier.to_string(),
                from: self,
                to: next,
            });
        }
        log::info!("batch {identifier}: {self:?} -> {next:?}");
        Ok(next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchState::Applied | BatchState::RolledBack)
    }
}
