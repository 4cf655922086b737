//! Structural differences between two schema snapshots.

use super::column::Column;
use super::table::{Constraint, Index, Table};
use super::Schema;

/// One structural difference, described from `current` towards `desired`.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    TableAdded(Table),
    TableRemoved(Table),
    ColumnAdded {
        table: String,
        column: Column,
        position: usize,
    },
    ColumnRemoved {
        table: String,
        column: Column,
        position: usize,
    },
    /// Same column name, different type, nullability, default or validators
    ColumnAltered {
        table: String,
        from: Column,
        to: Column,
    },
    ConstraintAdded {
        table: String,
        constraint: Constraint,
    },
    ConstraintRemoved {
        table: String,
        constraint: Constraint,
    },
    IndexAdded {
        table: String,
        index: Index,
    },
    IndexRemoved {
        table: String,
        index: Index,
    },
}

impl SchemaChange {
    /// Table the change belongs to.
    pub fn table(&self) -> &str {
        match self {
            SchemaChange::TableAdded(t) | SchemaChange::TableRemoved(t) => &t.name,
            SchemaChange::ColumnAdded { table, .. }
            | SchemaChange::ColumnRemoved { table, .. }
            | SchemaChange::ColumnAltered { table, .. }
            | SchemaChange::ConstraintAdded { table, .. }
            | SchemaChange::ConstraintRemoved { table, .. }
            | SchemaChange::IndexAdded { table, .. }
            | SchemaChange::IndexRemoved { table, .. } => table,
        }
    }
}

pub(crate) fn diff(current: &Schema, desired: &Schema) -> Vec<SchemaChange> {
    let mut changes = Vec::new();

    for table in desired.tables() {
        if current.table(&table.name).is_none() {
            changes.push(SchemaChange::TableAdded(table.clone()));
        }
    }
    for table in current.tables() {
        if desired.table(&table.name).is_none() {
            changes.push(SchemaChange::TableRemoved(table.clone()));
        }
    }

    for to in desired.tables() {
        if let Some(from) = current.table(&to.name) {
            diff_table(from, to, &mut changes);
        }
    }
    changes
}

fn diff_table(from: &Table, to: &Table, changes: &mut Vec<SchemaChange>) {
    let name = || to.name.clone();

    for (position, column) in from.columns.iter().enumerate() {
        if !to.has_column(&column.name) {
            changes.push(SchemaChange::ColumnRemoved {
                table: name(),
                column: column.clone(),
                position,
            });
        }
    }
    for (position, column) in to.columns.iter().enumerate() {
        if !from.has_column(&column.name) {
            changes.push(SchemaChange::ColumnAdded {
                table: name(),
                column: column.clone(),
                position,
            });
        }
    }
    for column in &to.columns {
        if let Some(old) = from.get_column(&column.name) {
            if old != column {
                changes.push(SchemaChange::ColumnAltered {
                    table: name(),
                    from: old.clone(),
                    to: column.clone(),
                });
            }
        }
    }

    // Constraints are matched by full definition; a redefined constraint
    // shows up as a removal plus an addition.
    for constraint in &from.constraints {
        if !to.constraints.contains(constraint) {
            changes.push(SchemaChange::ConstraintRemoved {
                table: name(),
                constraint: constraint.clone(),
            });
        }
    }
    for constraint in &to.constraints {
        if !from.constraints.contains(constraint) {
            changes.push(SchemaChange::ConstraintAdded {
                table: name(),
                constraint: constraint.clone(),
            });
        }
    }

    for index in &from.indexes {
        if !to.indexes.contains(index) {
            changes.push(SchemaChange::IndexRemoved {
                table: name(),
                index: index.clone(),
            });
        }
    }
    for index in &to.indexes {
        if !from.indexes.contains(index) {
            changes.push(SchemaChange::IndexAdded {
                table: name(),
                index: index.clone(),
            });
        }
    }
}
