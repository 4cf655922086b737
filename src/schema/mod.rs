//! In-memory schema model
//!
//! A [`Schema`] is a snapshot of tables, their columns and constraints, and
//! the relationships between them. Snapshots are plain values: the query
//! builder reads them (shared behind an `Arc`), the migration planner diffs
//! two of them, and [`Schema::apply_operation`] evolves one by a single
//! migration step.
//!
//! # Example
//!
//! ```
//! use quarry::schema::{Column, OnDelete, Relationship, Schema, Table};
//!
//! let mut schema = Schema::new();
//! schema.define_table(
//!     Table::new("author")
//!         .column(Column::integer("id"))
//!         .column(Column::text("name"))
//!         .primary_key(&["id"]),
//! )?;
//! schema.define_table(
//!     Table::new("book")
//!         .column(Column::integer("id"))
//!         .column(Column::text("title"))
//!         .column(Column::reference("author_id", "author", "id"))
//!         .primary_key(&["id"]),
//! )?;
//! schema.add_relationship(
//!     Relationship::one_to_many("book", "author_id")
//!         .references("author")
//!         .on_delete(OnDelete::Cascade),
//! )?;
//! schema.validate()?;
//! # Ok::<(), quarry::SchemaError>(())
//! ```

pub mod column;
pub mod diff;
pub mod relationship;
pub mod table;
pub mod validator;

pub use column::{Column, ColumnType};
pub use diff::SchemaChange;
pub use relationship::{OnDelete, RelationKind, Relationship};
pub use table::{Constraint, Index, Table};
pub use validator::{Rule, Validator};

use crate::error::{SchemaError, SchemaViolation};
use crate::migration::MigrationOperation;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A snapshot of every table in a database schema.
///
/// Equality is structural: the same tables (in any order) with equal
/// definitions. Relationships are not compared directly; they are
/// materialized as constraints and junction tables when added.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    tables: Vec<Table>,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.tables.len() == other.tables.len()
            && self
                .tables
                .iter()
                .all(|t| other.table(&t.name).is_some_and(|o| o == t))
    }
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table. Table names are unique within a schema.
    pub fn define_table(&mut self, table: Table) -> Result<(), SchemaError> {
        if self.table(&table.name).is_some() {
            return Err(SchemaError::DuplicateTable(table.name));
        }
        self.tables.push(table);
        Ok(())
    }

    /// Record a relationship and materialize its constraints.
    ///
    /// One-to-many adds a foreign key on the referencing column, one-to-one
    /// adds the foreign key and a unique constraint, many-to-many defines a
    /// junction table `<table>_<target>`. Policy invariants (set-null needs
    /// a nullable column, ...) are reported by [`Schema::validate`].
    pub fn add_relationship(&mut self, mut relationship: Relationship) -> Result<(), SchemaError> {
        let target = self
            .table(&relationship.target)
            .ok_or_else(|| SchemaError::UnknownTable(relationship.target.clone()))?;
        let target_column = match &relationship.target_column {
            Some(column) => column.clone(),
            None => target
                .primary_key_column()
                .ok_or_else(|| SchemaError::UnknownColumn {
                    table: relationship.target.clone(),
                    column: "<primary key>".to_string(),
                })?
                .to_string(),
        };
        relationship.target_column = Some(target_column.clone());

        match relationship.kind {
            relationship::RelationKind::ManyToMany => {
                let junction = self.junction_table(&relationship, &target_column)?;
                relationship.through = Some(junction.name.clone());
                self.define_table(junction)?;
            }
            kind => {
                let column = relationship.column.clone().unwrap_or_default();
                let owner = self
                    .tables
                    .iter_mut()
                    .find(|t| t.name == relationship.table)
                    .ok_or_else(|| SchemaError::UnknownTable(relationship.table.clone()))?;
                if !owner.has_column(&column) {
                    return Err(SchemaError::UnknownColumn {
                        table: owner.name.clone(),
                        column,
                    });
                }
                let mut updated = owner.clone().foreign_key(
                    &column,
                    &relationship.target,
                    &target_column,
                    relationship.on_delete,
                );
                if kind == relationship::RelationKind::OneToOne {
                    updated = updated.unique(&[column.as_str()]);
                }
                *owner = updated;
            }
        }
        self.relationships.push(relationship);
        Ok(())
    }

    fn junction_table(
        &self,
        relationship: &Relationship,
        target_column: &str,
    ) -> Result<Table, SchemaError> {
        let source = self
            .table(&relationship.table)
            .ok_or_else(|| SchemaError::UnknownTable(relationship.table.clone()))?;
        let source_column = source
            .primary_key_column()
            .ok_or_else(|| SchemaError::UnknownColumn {
                table: source.name.clone(),
                column: "<primary key>".to_string(),
            })?;
        let name = format!("{}_{}", relationship.table, relationship.target);
        let left = format!("{}_id", relationship.table);
        let right = format!("{}_id", relationship.target);
        Ok(Table::new(name)
            .column(Column::integer("id"))
            .column(Column::reference(&left, &relationship.table, source_column))
            .column(Column::reference(&right, &relationship.target, target_column))
            .primary_key(&["id"])
            .foreign_key(&left, &relationship.table, source_column, relationship.on_delete)
            .foreign_key(&right, &relationship.target, target_column, relationship.on_delete)
            .unique(&[left.as_str(), right.as_str()]))
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub(crate) fn remove_table(&mut self, name: &str) -> Option<Table> {
        let position = self.tables.iter().position(|t| t.name == name)?;
        Some(self.tables.remove(position))
    }

    pub(crate) fn tables_mut(&mut self) -> impl Iterator<Item = &mut Table> {
        self.tables.iter_mut()
    }

    pub(crate) fn push_table(&mut self, table: Table) {
        self.tables.push(table);
    }

    /// Tables in declaration order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Foreign keys in any table that reference `table`, as
    /// `(referencing table, constraint)` pairs.
    pub fn referencing_foreign_keys<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = (&'a Table, &'a Constraint)> + 'a {
        self.tables.iter().flat_map(move |t| {
            t.foreign_keys()
                .filter(move |fk| fk.referenced_table() == Some(table))
                .map(move |fk| (t, fk))
        })
    }

    /// Check every invariant and report all violations at once.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut violations = Vec::new();
        let mut push = |table: &str, message: String| {
            violations.push(SchemaViolation {
                table: table.to_string(),
                message,
            })
        };

        let mut seen_tables = HashSet::new();
        for table in &self.tables {
            if !seen_tables.insert(table.name.as_str()) {
                push(&table.name, "table name is defined more than once".to_string());
            }
            if table.name.is_empty() {
                push("", "table with an empty name".to_string());
            }

            let mut seen_columns = HashSet::new();
            for column in &table.columns {
                if !seen_columns.insert(column.name.as_str()) {
                    push(&table.name, format!("column '{}' is defined more than once", column.name));
                }
                if let ColumnType::Reference { table: rt, column: rc } = &column.column_type {
                    if !self.table(rt).is_some_and(|t| t.has_column(rc)) {
                        push(
                            &table.name,
                            format!("column '{}' references unknown column '{rt}.{rc}'", column.name),
                        );
                    }
                }
                if let Some(default) = &column.default {
                    if !column.column_type.accepts(default) {
                        push(
                            &table.name,
                            format!(
                                "default for column '{}' is a {} value, expected {}",
                                column.name,
                                default.kind(),
                                column.column_type.sql_name()
                            ),
                        );
                    }
                }
                for validator in &column.validators {
                    if let Some(problem) = validator.definition_error() {
                        push(&table.name, format!("column '{}': {problem}", column.name));
                    }
                }
            }

            match table.primary_keys().count() {
                1 => {}
                0 => push(&table.name, "table has no primary key".to_string()),
                n => push(&table.name, format!("table has {n} primary keys, expected exactly one")),
            }

            let mut seen_constraints = HashSet::new();
            for constraint in &table.constraints {
                if !seen_constraints.insert(constraint.name()) {
                    push(
                        &table.name,
                        format!("constraint '{}' is defined more than once", constraint.name()),
                    );
                }
                for column in constraint.columns() {
                    if !table.has_column(column) {
                        push(
                            &table.name,
                            format!("constraint '{}' uses unknown column '{column}'", constraint.name()),
                        );
                    }
                }
                if let Constraint::ForeignKey {
                    name,
                    column,
                    references_table,
                    references_column,
                    on_delete,
                } = constraint
                {
                    if !self
                        .table(references_table)
                        .is_some_and(|t| t.has_column(references_column))
                    {
                        push(
                            &table.name,
                            format!(
                                "foreign key '{name}' references unknown column \
                                 '{references_table}.{references_column}'"
                            ),
                        );
                    }
                    if let Some(local) = table.get_column(column) {
                        if *on_delete == OnDelete::SetNull && !local.nullable {
                            push(
                                &table.name,
                                format!("foreign key '{name}' uses SET NULL but column '{column}' is not nullable"),
                            );
                        }
                        if *on_delete == OnDelete::SetDefault && local.default.is_none() {
                            push(
                                &table.name,
                                format!("foreign key '{name}' uses SET DEFAULT but column '{column}' has no default"),
                            );
                        }
                    }
                }
            }

            for index in &table.indexes {
                for column in &index.columns {
                    if !table.has_column(column) {
                        push(
                            &table.name,
                            format!("index '{}' uses unknown column '{column}'", index.name),
                        );
                    }
                }
            }
        }

        for relationship in &self.relationships {
            for endpoint in [&relationship.table, &relationship.target] {
                if self.table(endpoint).is_none() {
                    push(
                        "",
                        format!("relationship {} uses unknown table '{endpoint}'", relationship.label()),
                    );
                }
            }
            if let (Some(column), Some(owner)) =
                (&relationship.column, self.table(&relationship.table))
            {
                if !owner.has_column(column) {
                    push(
                        &owner.name,
                        format!("relationship {} uses unknown column '{column}'", relationship.label()),
                    );
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Invalid(violations))
        }
    }

    /// Structural differences turning `self` into `other`.
    ///
    /// Order is stable: added tables, removed tables, then per common table
    /// (in `other`'s declaration order) removed, added and altered columns,
    /// constraints and indexes.
    pub fn diff(&self, other: &Schema) -> Vec<SchemaChange> {
        diff::diff(self, other)
    }

    /// Evolve this snapshot by one migration operation.
    pub fn apply_operation(
        &mut self,
        operation: &MigrationOperation,
    ) -> Result<(), crate::error::MigrationError> {
        operation.apply_to(self)
    }
}
