//! `MigrationRecord` - Represents entries in the migration history table

use crate::error::ExecutionError;
use crate::query::Record;
use crate::value::Value;
use chrono::NaiveDateTime;

/// One applied batch as recorded in the history table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub id: i64,
    pub identifier: String,
    /// When the batch was applied (UTC)
    pub applied_at: NaiveDateTime,
    /// `SHA-256` checksum of the batch operations at apply time
    pub checksum: String,
}

impl MigrationRecord {
    /// Create a `MigrationRecord` from a history row
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::Parse` if a column is missing or has an
    /// unexpected type.
    pub fn from_record(record: &Record) -> Result<Self, ExecutionError> {
        let field = |name: &str| {
            record
                .get(name)
                .ok_or_else(|| ExecutionError::Parse(format!("history row has no '{name}' column")))
        };
        let text = |name: &str| -> Result<String, ExecutionError> {
            field(name)?
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ExecutionError::Parse(format!("history column '{name}' is not text")))
        };

        let id = field("id")?
            .as_i64()
            .ok_or_else(|| ExecutionError::Parse("history column 'id' is not an integer".to_string()))?;
        let applied_at = match field("applied_at")? {
            Value::DateTime(dt) => *dt,
            other => {
                return Err(ExecutionError::Parse(format!(
                    "history column 'applied_at' is a {} value, expected a timestamp",
                    other.kind()
                )))
            }
        };

        Ok(Self {
            id,
            identifier: text("identifier")?,
            applied_at,
            checksum: text("checksum")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn applied_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_from_record() {
        let row = Record::new()
            .with("id", 1)
            .with("identifier", "0001_initial")
            .with("applied_at", Value::DateTime(applied_at()))
            .with("checksum", "abc");
        let record = MigrationRecord::from_record(&row).unwrap();
        assert_eq!(record.identifier, "0001_initial");
        assert_eq!(record.applied_at, applied_at());
        assert_eq!(record.id, 1);
    }

    #[test]
    fn test_from_record_rejects_bad_rows() {
        let missing = Record::new().with("id", 1);
        assert!(matches!(
            MigrationRecord::from_record(&missing),
            Err(ExecutionError::Parse(_))
        ));

        let wrong_type = Record::new()
            .with("id", 1)
            .with("identifier", "0001_initial")
            .with("applied_at", "yesterday")
            .with("checksum", "abc");
        let err = MigrationRecord::from_record(&wrong_type).unwrap_err();
        assert!(err.to_string().contains("expected a timestamp"));
    }
}
