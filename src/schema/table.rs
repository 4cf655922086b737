//! Tables, constraints and indexes.

use super::column::Column;
use super::relationship::OnDelete;
use serde::{Deserialize, Serialize};

/// A named table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    PrimaryKey {
        name: String,
        columns: Vec<String>,
    },
    ForeignKey {
        name: String,
        column: String,
        references_table: String,
        references_column: String,
        on_delete: OnDelete,
    },
    Unique {
        name: String,
        columns: Vec<String>,
    },
    /// Raw SQL boolean expression authored with the schema
    Check {
        name: String,
        expression: String,
    },
}

impl Constraint {
    pub fn name(&self) -> &str {
        match self {
            Constraint::PrimaryKey { name, .. }
            | Constraint::ForeignKey { name, .. }
            | Constraint::Unique { name, .. }
            | Constraint::Check { name, .. } => name,
        }
    }

    /// Local columns the constraint covers.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Constraint::PrimaryKey { columns, .. } | Constraint::Unique { columns, .. } => {
                columns.iter().map(String::as_str).collect()
            }
            Constraint::ForeignKey { column, .. } => vec![column.as_str()],
            Constraint::Check { .. } => Vec::new(),
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self, Constraint::ForeignKey { .. })
    }

    /// Table referenced by a foreign key.
    pub fn referenced_table(&self) -> Option<&str> {
        match self {
            Constraint::ForeignKey {
                references_table, ..
            } => Some(references_table),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Constraint::PrimaryKey { .. } => "primary_key",
            Constraint::ForeignKey { .. } => "foreign_key",
            Constraint::Unique { .. } => "unique",
            Constraint::Check { .. } => "check",
        }
    }
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// A table definition.
///
/// Columns keep declaration order. Constraints and indexes behave as sets:
/// two tables are equal when they hold the same constraints and indexes in
/// any order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub indexes: Vec<Index>,
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.columns == other.columns
            && same_set(&self.constraints, &other.constraints)
            && same_set(&self.indexes, &other.indexes)
    }
}

fn same_set<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x))
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a primary key named `<table>_pkey`.
    #[must_use]
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        let name = format!("{}_pkey", self.name);
        self.constraints.push(Constraint::PrimaryKey {
            name,
            columns: owned(columns),
        });
        self
    }

    /// Add a foreign key named `<table>_<column>_fkey`.
    #[must_use]
    pub fn foreign_key(
        mut self,
        column: &str,
        references_table: &str,
        references_column: &str,
        on_delete: OnDelete,
    ) -> Self {
        self.constraints.push(Constraint::ForeignKey {
            name: format!("{}_{}_fkey", self.name, column),
            column: column.to_string(),
            references_table: references_table.to_string(),
            references_column: references_column.to_string(),
            on_delete,
        });
        self
    }

    /// Add a unique constraint named `<table>_<columns>_key`.
    #[must_use]
    pub fn unique(mut self, columns: &[&str]) -> Self {
        let name = format!("{}_{}_key", self.name, columns.join("_"));
        self.constraints.push(Constraint::Unique {
            name,
            columns: owned(columns),
        });
        self
    }

    #[must_use]
    pub fn check(mut self, name: &str, expression: &str) -> Self {
        self.constraints.push(Constraint::Check {
            name: name.to_string(),
            expression: expression.to_string(),
        });
        self
    }

    #[must_use]
    pub fn index(mut self, name: &str, columns: &[&str], unique: bool) -> Self {
        self.indexes.push(Index {
            name: name.to_string(),
            columns: owned(columns),
            unique,
        });
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(|c| matches!(c, Constraint::PrimaryKey { .. }))
    }

    /// The single primary-key column, if the key is not composite.
    pub fn primary_key_column(&self) -> Option<&str> {
        match self.primary_keys().next() {
            Some(Constraint::PrimaryKey { columns, .. }) if columns.len() == 1 => {
                Some(columns[0].as_str())
            }
            _ => None,
        }
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(|c| c.is_foreign_key())
    }

    pub fn get_constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name() == name)
    }

    /// Tables this table depends on through foreign keys (self references
    /// excluded), in constraint order without duplicates.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        for target in self.foreign_keys().filter_map(Constraint::referenced_table) {
            if target != self.name && !deps.iter().any(|d| d == target) {
                deps.push(target.to_string());
            }
        }
        deps
    }
}

fn owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}
