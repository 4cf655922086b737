//! Migration batches: the unit of application and reversal.

use super::checksum::{calculate_checksum, validate_checksum};
use super::operation::MigrationOperation;
use crate::error::MigrationError;
use crate::schema::Schema;
use serde::{Deserialize, Serialize};

/// An ordered, checksummed group of operations applied atomically.
///
/// Batches form a chain: each names the identifier of the batch before it
/// as its `parent`, and the first batch has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationBatch {
    /// `NNNN_name`, e.g. `0001_initial`
    pub identifier: String,
    pub sequence: u32,
    pub parent: Option<String>,
    pub checksum: String,
    pub operations: Vec<MigrationOperation>,
}

impl MigrationBatch {
    /// Build the batch following `previous` in the chain.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidArtifact` if `name` is empty or holds
    /// anything other than ASCII letters, digits and underscores.
    pub fn next(
        previous: Option<&MigrationBatch>,
        name: &str,
        operations: Vec<MigrationOperation>,
    ) -> Result<Self, MigrationError> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(MigrationError::InvalidArtifact(format!(
                "batch name '{name}' must be non-empty and use only letters, digits and '_'"
            )));
        }
        let sequence = previous.map_or(1, |p| p.sequence + 1);
        let checksum = calculate_checksum(&operations)?;
        Ok(Self {
            identifier: format!("{sequence:04}_{name}"),
            sequence,
            parent: previous.map(|p| p.identifier.clone()),
            checksum,
            operations,
        })
    }

    /// Name part of the identifier.
    pub fn name(&self) -> &str {
        self.identifier
            .split_once('_')
            .map_or(self.identifier.as_str(), |(_, name)| name)
    }

    /// Check that the stored checksum still matches the operations.
    pub fn verify_checksum(&self) -> Result<(), MigrationError> {
        let current = calculate_checksum(&self.operations)?;
        validate_checksum(&self.identifier, &self.checksum, &current)
    }

    pub fn to_json(&self) -> Result<String, MigrationError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MigrationError::InvalidArtifact(format!("cannot serialize {}: {e}", self.identifier)))
    }

    pub fn from_json(json: &str) -> Result<Self, MigrationError> {
        serde_json::from_str(json)
            .map_err(|e| MigrationError::InvalidArtifact(format!("malformed batch: {e}")))
    }
}

/// Check that `batches` form one unbroken chain starting at sequence 1.
pub fn validate_chain(batches: &[MigrationBatch]) -> Result<(), MigrationError> {
    let mut previous: Option<&MigrationBatch> = None;
    for batch in batches {
        let expected_sequence = previous.map_or(1, |p| p.sequence + 1);
        if batch.sequence != expected_sequence {
            return Err(MigrationError::InvalidArtifact(format!(
                "batch '{}' has sequence {}, expected {expected_sequence}",
                batch.identifier, batch.sequence
            )));
        }
        let expected_parent = previous.map(|p| p.identifier.as_str());
        if batch.parent.as_deref() != expected_parent {
            return Err(MigrationError::InvalidArtifact(format!(
                "batch '{}' names parent {:?}, expected {:?}",
                batch.identifier, batch.parent, expected_parent
            )));
        }
        previous = Some(batch);
    }
    Ok(())
}

/// The schema snapshot the batches produce when applied to an empty database.
pub fn replay(batches: &[MigrationBatch]) -> Result<Schema, MigrationError> {
    let mut schema = Schema::new();
    for batch in batches {
        for operation in &batch.operations {
            schema.apply_operation(operation)?;
        }
    }
    Ok(schema)
}
