//! Relationships between tables.

use serde::{Deserialize, Serialize};

/// Cardinality of a relationship, read from the referenced (`target`) side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// One `target` row, many `table` rows; the key column lives on `table`
    OneToMany,
    /// Rows are paired through a junction table
    ManyToMany,
    /// One `target` row, at most one `table` row
    OneToOne,
}

/// Action taken on dependent rows when a referenced row is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    Cascade,
    SetNull,
    /// Deleting a referenced row fails while dependents exist
    Protect,
    SetDefault,
    #[default]
    NoAction,
}

impl OnDelete {
    /// Referential action keyword used in foreign-key DDL.
    pub fn sql(&self) -> &'static str {
        match self {
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
            OnDelete::Protect => "RESTRICT",
            OnDelete::SetDefault => "SET DEFAULT",
            OnDelete::NoAction => "NO ACTION",
        }
    }
}

/// Directed edge `table` → `target`.
///
/// For one-to-many and one-to-one the referencing `column` lives on `table`.
/// Many-to-many relationships leave `column` empty and name the junction
/// table in `through` once the relationship is added to a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: RelationKind,
    pub table: String,
    #[serde(default)]
    pub column: Option<String>,
    pub target: String,
    /// Referenced column; defaults to the target's primary key
    #[serde(default)]
    pub target_column: Option<String>,
    #[serde(default)]
    pub on_delete: OnDelete,
    #[serde(default)]
    pub through: Option<String>,
}

impl Relationship {
    pub fn one_to_many(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::with_column(RelationKind::OneToMany, table.into(), column.into())
    }

    pub fn one_to_one(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::with_column(RelationKind::OneToOne, table.into(), column.into())
    }

    pub fn many_to_many(table: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::ManyToMany,
            table: table.into(),
            column: None,
            target: target.into(),
            target_column: None,
            on_delete: OnDelete::Cascade,
            through: None,
        }
    }

    fn with_column(kind: RelationKind, table: String, column: String) -> Self {
        Self {
            kind,
            table,
            column: Some(column),
            target: String::new(),
            target_column: None,
            on_delete: OnDelete::NoAction,
            through: None,
        }
    }

    /// Point the relationship at `target` (its primary key).
    #[must_use]
    pub fn references(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Point the relationship at an explicit `target.column`.
    #[must_use]
    pub fn references_column(mut self, target: impl Into<String>, column: impl Into<String>) -> Self {
        self.target = target.into();
        self.target_column = Some(column.into());
        self
    }

    #[must_use]
    pub fn on_delete(mut self, policy: OnDelete) -> Self {
        self.on_delete = policy;
        self
    }

    /// Human-readable label used in validation messages.
    pub fn label(&self) -> String {
        match &self.column {
            Some(column) => format!("{}.{} -> {}", self.table, column, self.target),
            None => format!("{} <-> {}", self.table, self.target),
        }
    }
}
