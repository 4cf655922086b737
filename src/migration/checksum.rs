//! Checksum calculation for migration batches

use super::operation::MigrationOperation;
use crate::error::MigrationError;
use sha2::{Digest, Sha256};

/// Calculate the SHA-256 checksum of a batch's operations
///
/// The checksum covers the canonical JSON form of the operations, so it is
/// independent of how the artifact file was formatted on disk. It is used
/// to detect artifacts edited after they were applied.
///
/// # Returns
///
/// Returns the hexadecimal SHA-256 hash of the serialized operations
///
/// # Errors
///
/// Returns `MigrationError::InvalidArtifact` if the operations cannot be
/// serialized
pub fn calculate_checksum(operations: &[MigrationOperation]) -> Result<String, MigrationError> {
    let canonical = serde_json::to_vec(operations)
        .map_err(|e| MigrationError::InvalidArtifact(format!("cannot serialize operations: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    let hash = hasher.finalize();

    Ok(format!("{:x}", hash))
}

/// Validate a checksum against the stored value
///
/// # Arguments
///
/// * `identifier` - Batch the checksums belong to, for the error
/// * `stored` - The checksum recorded when the batch was applied
/// * `current` - The checksum calculated from the artifact now
pub fn validate_checksum(identifier: &str, stored: &str, current: &str) -> Result<(), MigrationError> {
    if stored == current {
        Ok(())
    } else {
        Err(MigrationError::ChecksumMismatch {
            identifier: identifier.to_string(),
            stored: stored.to_string(),
            current: current.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Table};

    fn ops() -> Vec<MigrationOperation> {
        vec![MigrationOperation::CreateTable {
            table: Table::new("author").column(Column::integer("id")).primary_key(&["id"]),
        }]
    }

    #[test]
    fn test_checksum_is_stable_hex() {
        let a = calculate_checksum(&ops()).unwrap();
        let b = calculate_checksum(&ops()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let mut changed = ops();
        changed.push(MigrationOperation::Rename {
            table: "author".into(),
            column: None,
            to: "writer".into(),
        });
        assert_ne!(calculate_checksum(&ops()).unwrap(), calculate_checksum(&changed).unwrap());
        assert_ne!(calculate_checksum(&[]).unwrap(), calculate_checksum(&ops()).unwrap());
    }

    #[test]
    fn test_validate_checksum() {
        assert!(validate_checksum("0001_initial", "abc", "abc").is_ok());
        let err = validate_checksum("0001_initial", "abc", "def").unwrap_err();
        assert!(matches!(err, MigrationError::ChecksumMismatch { ref identifier, .. } if identifier == "0001_initial"));
    }
}
