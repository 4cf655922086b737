//! Migration operations.
//!
//! Every operation carries what it needs to be applied and to build its
//! inverse: drops keep the full definition they remove, alterations keep
//! both the old and the new column. [`MigrationOperation::apply_to`]
//! evolves an in-memory [`Schema`] the same way the rendered DDL evolves
//! the database.

use crate::error::MigrationError;
use crate::schema::{Column, ColumnType, Constraint, Index, Schema, Table};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One structural change, serialized with a `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MigrationOperation {
    CreateTable {
        table: Table,
    },
    DropTable {
        table: Table,
    },
    AddColumn {
        table: String,
        column: Column,
        /// Index in the table after the column is added; `None` appends
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    DropColumn {
        table: String,
        column: Column,
        /// Index of the column before it was dropped
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    AlterColumn {
        table: String,
        column: String,
        #[serde(rename = "from_type")]
        from: Column,
        #[serde(rename = "to_type")]
        to: Column,
    },
    AddConstraint {
        table: String,
        constraint: Constraint,
    },
    DropConstraint {
        table: String,
        constraint: Constraint,
    },
    CreateIndex {
        table: String,
        index: Index,
    },
    DropIndex {
        table: String,
        index: Index,
    },
    /// Rename a table (`column` unset) or one of its columns.
    Rename {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column: Option<String>,
        to: String,
    },
}

fn invalid(message: String) -> MigrationError {
    MigrationError::InvalidOperation(message)
}

fn table_mut<'s>(schema: &'s mut Schema, name: &str) -> Result<&'s mut Table, MigrationError> {
    schema
        .table_mut(name)
        .ok_or_else(|| invalid(format!("table '{name}' does not exist")))
}

impl MigrationOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationOperation::CreateTable { .. } => "create_table",
            MigrationOperation::DropTable { .. } => "drop_table",
            MigrationOperation::AddColumn { .. } => "add_column",
            MigrationOperation::DropColumn { .. } => "drop_column",
            MigrationOperation::AlterColumn { .. } => "alter_column",
            MigrationOperation::AddConstraint { .. } => "add_constraint",
            MigrationOperation::DropConstraint { .. } => "drop_constraint",
            MigrationOperation::CreateIndex { .. } => "create_index",
            MigrationOperation::DropIndex { .. } => "drop_index",
            MigrationOperation::Rename { .. } => "rename",
        }
    }

    /// Table the operation acts on.
    pub fn table(&self) -> &str {
        match self {
            MigrationOperation::CreateTable { table } | MigrationOperation::DropTable { table } => {
                &table.name
            }
            MigrationOperation::AddColumn { table, .. }
            | MigrationOperation::DropColumn { table, .. }
            | MigrationOperation::AlterColumn { table, .. }
            | MigrationOperation::AddConstraint { table, .. }
            | MigrationOperation::DropConstraint { table, .. }
            | MigrationOperation::CreateIndex { table, .. }
            | MigrationOperation::DropIndex { table, .. }
            | MigrationOperation::Rename { table, .. } => table,
        }
    }

    /// Whether applying the operation discards stored data.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            MigrationOperation::DropTable { .. } | MigrationOperation::DropColumn { .. }
        )
    }

    /// The operation that undoes this one.
    pub fn inverse(&self) -> MigrationOperation {
        match self.clone() {
            MigrationOperation::CreateTable { table } => MigrationOperation::DropTable { table },
            MigrationOperation::DropTable { table } => MigrationOperation::CreateTable { table },
            MigrationOperation::AddColumn {
                table,
                column,
                position,
            } => MigrationOperation::DropColumn {
                table,
                column,
                position,
            },
            MigrationOperation::DropColumn {
                table,
                column,
                position,
            } => MigrationOperation::AddColumn {
                table,
                column,
                position,
            },
            MigrationOperation::AlterColumn {
                table,
                column,
                from,
                to,
            } => MigrationOperation::AlterColumn {
                table,
                column,
                from: to,
                to: from,
            },
            MigrationOperation::AddConstraint { table, constraint } => {
                MigrationOperation::DropConstraint { table, constraint }
            }
            MigrationOperation::DropConstraint { table, constraint } => {
                MigrationOperation::AddConstraint { table, constraint }
            }
            MigrationOperation::CreateIndex { table, index } => {
                MigrationOperation::DropIndex { table, index }
            }
            MigrationOperation::DropIndex { table, index } => {
                MigrationOperation::CreateIndex { table, index }
            }
            MigrationOperation::Rename {
                table,
                column: None,
                to,
            } => MigrationOperation::Rename {
                table: to,
                column: None,
                to: table,
            },
            MigrationOperation::Rename {
                table,
                column: Some(column),
                to,
            } => MigrationOperation::Rename {
                table,
                column: Some(to),
                to: column,
            },
        }
    }

    /// Evolve `schema` by this operation.
    ///
    /// Fails without modifying `schema` when the operation does not fit the
    /// snapshot: a missing table, a duplicate name, or a drop that would
    /// leave dangling references.
    pub fn apply_to(&self, schema: &mut Schema) -> Result<(), MigrationError> {
        match self {
            MigrationOperation::CreateTable { table } => {
                if schema.table(&table.name).is_some() {
                    return Err(invalid(format!("table '{}' already exists", table.name)));
                }
                schema.push_table(table.clone());
            }
            MigrationOperation::DropTable { table } => {
                if let Some((dependent, fk)) = schema
                    .referencing_foreign_keys(&table.name)
                    .find(|(t, _)| t.name != table.name)
                {
                    return Err(invalid(format!(
                        "table '{}' is still referenced by '{}' ({})",
                        table.name,
                        dependent.name,
                        fk.name()
                    )));
                }
                schema
                    .remove_table(&table.name)
                    .ok_or_else(|| invalid(format!("table '{}' does not exist", table.name)))?;
            }
            MigrationOperation::AddColumn {
                table,
                column,
                position,
            } => {
                let t = table_mut(schema, table)?;
                if t.has_column(&column.name) {
                    return Err(invalid(format!(
                        "column '{table}.{}' already exists",
                        column.name
                    )));
                }
                let at = position.map_or(t.columns.len(), |p| p.min(t.columns.len()));
                t.columns.insert(at, column.clone());
            }
            MigrationOperation::DropColumn { table, column, .. } => {
                let referenced = schema.tables().iter().any(|t| {
                    t.foreign_keys().any(|fk| {
                        matches!(fk, Constraint::ForeignKey { references_table, references_column, .. }
                            if references_table == table && *references_column == column.name)
                    })
                });
                if referenced {
                    return Err(invalid(format!(
                        "column '{table}.{}' is still referenced by a foreign key",
                        column.name
                    )));
                }
                let t = table_mut(schema, table)?;
                if let Some(c) = t
                    .constraints
                    .iter()
                    .find(|c| c.columns().contains(&column.name.as_str()))
                {
                    return Err(invalid(format!(
                        "column '{table}.{}' is still used by constraint '{}'",
                        column.name,
                        c.name()
                    )));
                }
                if let Some(i) = t.indexes.iter().find(|i| i.columns.contains(&column.name)) {
                    return Err(invalid(format!(
                        "column '{table}.{}' is still used by index '{}'",
                        column.name, i.name
                    )));
                }
                let at = t.column_position(&column.name).ok_or_else(|| {
                    invalid(format!("column '{table}.{}' does not exist", column.name))
                })?;
                t.columns.remove(at);
            }
            MigrationOperation::AlterColumn {
                table, column, to, ..
            } => {
                let t = table_mut(schema, table)?;
                let slot = t
                    .columns
                    .iter_mut()
                    .find(|c| c.name == *column)
                    .ok_or_else(|| invalid(format!("column '{table}.{column}' does not exist")))?;
                *slot = to.clone();
            }
            MigrationOperation::AddConstraint { table, constraint } => {
                let t = table_mut(schema, table)?;
                if t.get_constraint(constraint.name()).is_some() {
                    return Err(invalid(format!(
                        "constraint '{}' already exists on '{table}'",
                        constraint.name()
                    )));
                }
                t.constraints.push(constraint.clone());
            }
            MigrationOperation::DropConstraint { table, constraint } => {
                let t = table_mut(schema, table)?;
                let at = t
                    .constraints
                    .iter()
                    .position(|c| c.name() == constraint.name())
                    .ok_or_else(|| {
                        invalid(format!(
                            "constraint '{}' does not exist on '{table}'",
                            constraint.name()
                        ))
                    })?;
                t.constraints.remove(at);
            }
            MigrationOperation::CreateIndex { table, index } => {
                let t = table_mut(schema, table)?;
                if t.indexes.iter().any(|i| i.name == index.name) {
                    return Err(invalid(format!("index '{}' already exists", index.name)));
                }
                t.indexes.push(index.clone());
            }
            MigrationOperation::DropIndex { table, index } => {
                let t = table_mut(schema, table)?;
                let at = t
                    .indexes
                    .iter()
                    .position(|i| i.name == index.name)
                    .ok_or_else(|| invalid(format!("index '{}' does not exist", index.name)))?;
                t.indexes.remove(at);
            }
            MigrationOperation::Rename {
                table,
                column: None,
                to,
            } => rename_table(schema, table, to)?,
            MigrationOperation::Rename {
                table,
                column: Some(column),
                to,
            } => rename_column(schema, table, column, to)?,
        }
        Ok(())
    }
}

fn rename_table(schema: &mut Schema, from: &str, to: &str) -> Result<(), MigrationError> {
    if schema.table(to).is_some() {
        return Err(invalid(format!("table '{to}' already exists")));
    }
    table_mut(schema, from)?.name = to.to_string();
    for table in schema.tables_mut() {
        for constraint in &mut table.constraints {
            if let Constraint::ForeignKey {
                references_table, ..
            } = constraint
            {
                if references_table == from {
                    *references_table = to.to_string();
                }
            }
        }
        for column in &mut table.columns {
            if let ColumnType::Reference { table: target, .. } = &mut column.column_type {
                if target == from {
                    *target = to.to_string();
                }
            }
        }
    }
    Ok(())
}

fn rename_column(
    schema: &mut Schema,
    table: &str,
    from: &str,
    to: &str,
) -> Result<(), MigrationError> {
    let t = table_mut(schema, table)?;
    if t.has_column(to) {
        return Err(invalid(format!("column '{table}.{to}' already exists")));
    }
    let column = t
        .columns
        .iter_mut()
        .find(|c| c.name == from)
        .ok_or_else(|| invalid(format!("column '{table}.{from}' does not exist")))?;
    column.name = to.to_string();

    let rename = |name: &mut String| {
        if name == from {
            *name = to.to_string();
        }
    };
    for constraint in &mut t.constraints {
        match constraint {
            Constraint::PrimaryKey { columns, .. } | Constraint::Unique { columns, .. } => {
                columns.iter_mut().for_each(rename);
            }
            Constraint::ForeignKey { column, .. } => rename(column),
            Constraint::Check { .. } => {}
        }
    }
    for index in &mut t.indexes {
        index.columns.iter_mut().for_each(rename);
    }

    for other in schema.tables_mut() {
        for constraint in &mut other.constraints {
            if let Constraint::ForeignKey {
                references_table,
                references_column,
                ..
            } = constraint
            {
                if references_table == table && references_column == from {
                    *references_column = to.to_string();
                }
            }
        }
        for column in &mut other.columns {
            if let ColumnType::Reference {
                table: target,
                column: target_column,
            } = &mut column.column_type
            {
                if target == table && target_column == from {
                    *target_column = to.to_string();
                }
            }
        }
    }
    Ok(())
}

impl fmt::Display for MigrationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationOperation::CreateTable { table } => write!(f, "create table {}", table.name),
            MigrationOperation::DropTable { table } => write!(f, "drop table {}", table.name),
            MigrationOperation::AddColumn { table, column, .. } => {
                write!(f, "add column {table}.{} ({})", column.name, column.column_type.sql_name())
            }
            MigrationOperation::DropColumn { table, column, .. } => {
                write!(f, "drop column {table}.{}", column.name)
            }
            MigrationOperation::AlterColumn { table, column, .. } => {
                write!(f, "alter column {table}.{column}")
            }
            MigrationOperation::AddConstraint { table, constraint } => {
                write!(f, "add {} {} on {table}", constraint.kind(), constraint.name())
            }
            MigrationOperation::DropConstraint { table, constraint } => {
                write!(f, "drop {} {} on {table}", constraint.kind(), constraint.name())
            }
            MigrationOperation::CreateIndex { table, index } => {
                write!(f, "create index {} on {table}", index.name)
            }
            MigrationOperation::DropIndex { table, index } => {
                write!(f, "drop index {} on {table}", index.name)
            }
            MigrationOperation::Rename {
                table,
                column: None,
                to,
            } => write!(f, "rename table {table} to {to}"),
            MigrationOperation::Rename {
                table,
                column: Some(column),
                to,
            } => write!(f, "rename column {table}.{column} to {to}"),
        }
    }
}
