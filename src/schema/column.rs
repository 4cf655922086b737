//! Column definitions.

use super::validator::Validator;
use crate::error::ValidationError;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Semantic type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
    Date,
    DateTime,
    Binary,
    Decimal,
    /// Integer key pointing at `table.column`
    Reference { table: String, column: String },
}

impl ColumnType {
    /// PostgreSQL type name used in DDL and in error messages.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Reference { .. } => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Text => "TEXT",
            ColumnType::Date => "DATE",
            ColumnType::DateTime => "TIMESTAMP",
            ColumnType::Binary => "BYTEA",
            ColumnType::Decimal => "NUMERIC",
        }
    }

    /// Whether a non-null `value` can be stored in a column of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ColumnType::Integer | ColumnType::Reference { .. }, Value::Int(_))
                | (ColumnType::Float, Value::Float(_) | Value::Int(_))
                | (ColumnType::Decimal, Value::Decimal(_) | Value::Int(_))
                | (ColumnType::Boolean, Value::Bool(_))
                | (ColumnType::Text, Value::Text(_))
                | (ColumnType::Date, Value::Date(_))
                | (ColumnType::DateTime, Value::DateTime(_))
                | (ColumnType::Binary, Value::Bytes(_))
        )
    }
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            default: None,
            validators: Vec::new(),
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Date)
    }

    pub fn date_time(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::DateTime)
    }

    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Binary)
    }

    pub fn decimal(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Decimal)
    }

    pub fn reference(
        name: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            ColumnType::Reference {
                table: table.into(),
                column: column.into(),
            },
        )
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Check a value about to be written to this column.
    ///
    /// Order: nullability, type compatibility, then every validator in
    /// declaration order. The first failure is reported.
    pub fn validate_value(&self, table: &str, value: &Value) -> Result<(), ValidationError> {
        let fail = |message: String| ValidationError {
            table: table.to_string(),
            column: self.name.clone(),
            message,
        };
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err(fail("may not be null".to_string()))
            };
        }
        if !self.column_type.accepts(value) {
            return Err(fail(format!(
                "expected {} value, got {}",
                self.column_type.sql_name(),
                value.kind()
            )));
        }
        match self.validators.iter().find(|v| !v.check(value)) {
            Some(v) => Err(fail(v.message.clone())),
            None => Ok(()),
        }
    }
}
