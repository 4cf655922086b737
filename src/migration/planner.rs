//! Migration planning: the ordered operations turning one schema snapshot
//! into another.
//!
//! The planner replays every operation it emits on a working copy of the
//! current snapshot, so each step is checked against the state it will
//! actually run on, and position and inverse data are taken from that state.
//!
//! Order of the plan:
//!
//! 1. drop foreign keys (then other constraints, then indexes) that do not
//!    survive, including every foreign key of a table about to be dropped
//! 2. drop removed tables, dependents first
//! 3. create added tables, referenced tables first; foreign keys whose
//!    target does not exist yet are deferred to step 5
//! 4. per surviving table: renames, dropped columns, added columns, altered
//!    columns
//! 5. add missing constraints (foreign keys last) and indexes

use super::dependency::{topological_sort, TableInfo};
use super::operation::MigrationOperation;
use crate::error::MigrationError;
use crate::schema::{Column, Constraint, Index, Schema, Table};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a removed column and an added column of the same type at the same
/// position are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenamePolicy {
    /// Rename only when no other removed or added column of the table
    /// shares the type
    #[default]
    Strict,
    /// Rename every equal type and position pair
    Positional,
    /// Always drop and add
    Never,
}

/// Ordered operations plus human-readable warnings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationPlan {
    pub operations: Vec<MigrationOperation>,
    pub warnings: Vec<String>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether any operation discards stored data.
    pub fn has_data_loss(&self) -> bool {
        self.operations.iter().any(MigrationOperation::is_destructive)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationPlanner {
    policy: RenamePolicy,
}

impl MigrationPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RenamePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RenamePolicy {
        self.policy
    }

    /// Plan the operations turning `current` into `desired`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Schema`] if `desired` does not validate,
    /// and [`MigrationError::InvalidOperation`] if an operation cannot be
    /// applied to `current` (for instance when `current` itself is
    /// inconsistent).
    pub fn plan(&self, current: &Schema, desired: &Schema) -> Result<MigrationPlan, MigrationError> {
        desired.validate()?;

        let mut draft = Draft {
            current,
            desired,
            working: current.clone(),
            renames: HashMap::new(),
            plan: MigrationPlan::default(),
        };
        draft.detect_renames(self.policy);
        draft.drop_constraints()?;
        draft.drop_tables()?;
        draft.create_tables()?;
        draft.evolve_columns()?;
        draft.add_constraints()?;

        log::debug!(
            "planned {} operation(s) with {} warning(s)",
            draft.plan.operations.len(),
            draft.plan.warnings.len()
        );
        Ok(draft.plan)
    }
}

struct Draft<'a> {
    current: &'a Schema,
    desired: &'a Schema,
    working: Schema,
    /// Per table, `(old, new)` column renames in position order
    renames: HashMap<String, Vec<(String, String)>>,
    plan: MigrationPlan,
}

impl<'a> Draft<'a> {
    fn emit(&mut self, operation: MigrationOperation) -> Result<(), MigrationError> {
        operation.apply_to(&mut self.working)?;
        self.plan.operations.push(operation);
        Ok(())
    }

    fn warn(&mut self, message: String) {
        log::warn!("{message}");
        self.plan.warnings.push(message);
    }

    fn surviving(&self) -> impl Iterator<Item = (&'a Table, &'a Table)> + 'a {
        let (current, desired) = (self.current, self.desired);
        desired
            .tables()
            .iter()
            .filter_map(move |d| current.table(&d.name).map(|c| (c, d)))
    }

    fn renamed(&self, table: &str, column: &str) -> String {
        self.renames
            .get(table)
            .and_then(|pairs| pairs.iter().find(|(old, _)| old == column))
            .map_or_else(|| column.to_string(), |(_, new)| new.clone())
    }

    fn detect_renames(&mut self, policy: RenamePolicy) {
        if policy == RenamePolicy::Never {
            return;
        }
        let pairs: Vec<(&Table, &Table)> = self.surviving().collect();
        for (current, desired) in pairs {
            let removed: Vec<(usize, &Column)> = current
                .columns
                .iter()
                .enumerate()
                .filter(|(_, c)| !desired.has_column(&c.name))
                .collect();
            let added: Vec<(usize, &Column)> = desired
                .columns
                .iter()
                .enumerate()
                .filter(|(_, c)| !current.has_column(&c.name))
                .collect();

            let mut accepted = Vec::new();
            for &(position, old) in &removed {
                let Some(&(_, new)) = added
                    .iter()
                    .find(|(p, c)| *p == position && c.column_type == old.column_type)
                else {
                    continue;
                };
                let sharing = removed
                    .iter()
                    .chain(added.iter())
                    .filter(|(_, c)| c.column_type == old.column_type)
                    .count();
                if policy == RenamePolicy::Strict && sharing > 2 {
                    self.warn(format!(
                        "ambiguous rename of {}.{} to {}: several {} columns changed, treating it as drop and add",
                        current.name,
                        old.name,
                        new.name,
                        old.column_type.sql_name()
                    ));
                    continue;
                }
                accepted.push((old.name.clone(), new.name.clone()));
            }
            if !accepted.is_empty() {
                self.renames.insert(current.name.clone(), accepted);
            }
        }
    }

    /// `constraint` as it reads once the planned column renames are applied.
    fn rename_constraint(&self, table: &str, constraint: &Constraint) -> Constraint {
        let mut renamed = constraint.clone();
        match &mut renamed {
            Constraint::PrimaryKey { columns, .. } | Constraint::Unique { columns, .. } => {
                for column in columns.iter_mut() {
                    *column = self.renamed(table, column);
                }
            }
            Constraint::ForeignKey {
                column,
                references_table,
                references_column,
                ..
            } => {
                *column = self.renamed(table, column);
                *references_column = self.renamed(references_table, references_column);
            }
            Constraint::Check { .. } => {}
        }
        renamed
    }

    fn rename_index(&self, table: &str, index: &Index) -> Index {
        let mut renamed = index.clone();
        for column in renamed.columns.iter_mut() {
            *column = self.renamed(table, column);
        }
        renamed
    }

    fn survives(&self, table: &str, constraint: &Constraint) -> bool {
        let renamed = self.rename_constraint(table, constraint);
        self.desired
            .table(table)
            .and_then(|t| t.get_constraint(constraint.name()))
            .is_some_and(|d| *d == renamed)
    }

    fn drop_constraints(&mut self) -> Result<(), MigrationError> {
        let mut drops = Vec::new();
        for table in self.current.tables() {
            for fk in table.foreign_keys() {
                if !self.survives(&table.name, fk) {
                    drops.push(MigrationOperation::DropConstraint {
                        table: table.name.clone(),
                        constraint: fk.clone(),
                    });
                }
            }
        }
        for (current, _) in self.surviving() {
            for constraint in current.constraints.iter().filter(|c| !c.is_foreign_key()) {
                if !self.survives(&current.name, constraint) {
                    drops.push(MigrationOperation::DropConstraint {
                        table: current.name.clone(),
                        constraint: constraint.clone(),
                    });
                }
            }
        }
        for (current, desired) in self.surviving() {
            for index in &current.indexes {
                let renamed = self.rename_index(&current.name, index);
                if !desired.indexes.iter().any(|i| *i == renamed) {
                    drops.push(MigrationOperation::DropIndex {
                        table: current.name.clone(),
                        index: index.clone(),
                    });
                }
            }
        }
        drops.into_iter().try_for_each(|op| self.emit(op))
    }

    fn drop_tables(&mut self) -> Result<(), MigrationError> {
        let removed: Vec<TableInfo> = self
            .working
            .tables()
            .iter()
            .filter(|t| self.desired.table(&t.name).is_none())
            .map(TableInfo::from)
            .collect();
        let mut order = topological_sort(&removed).into_names();
        order.reverse();

        for name in order {
            let Some(table) = self.working.table(&name).cloned() else {
                continue;
            };
            self.warn(format!("dropping table {name} discards all of its rows"));
            self.emit(MigrationOperation::DropTable { table })?;
        }
        Ok(())
    }

    fn create_tables(&mut self) -> Result<(), MigrationError> {
        let added: Vec<TableInfo> = self
            .desired
            .tables()
            .iter()
            .filter(|t| self.current.table(&t.name).is_none())
            .map(TableInfo::from)
            .collect();
        let ordering = topological_sort(&added);
        if ordering.has_cycle() {
            log::debug!(
                "reference cycle between {}; deferring their foreign keys",
                ordering.cyclic.join(", ")
            );
        }

        for name in ordering.into_names() {
            let Some(desired) = self.desired.table(&name) else {
                continue;
            };
            let mut table = desired.clone();
            let working = &self.working;
            table.constraints.retain(|c| match c {
                Constraint::ForeignKey {
                    references_table,
                    references_column,
                    ..
                } => {
                    (*references_table == name && desired.has_column(references_column))
                        || working
                            .table(references_table)
                            .is_some_and(|t| t.has_column(references_column))
                }
                _ => true,
            });
            self.emit(MigrationOperation::CreateTable { table })?;
        }
        Ok(())
    }

    fn evolve_columns(&mut self) -> Result<(), MigrationError> {
        let pairs: Vec<(&Table, &Table)> = self.surviving().collect();
        for (_, desired) in pairs {
            let name = desired.name.clone();

            for (old, new) in self.renames.get(&name).cloned().unwrap_or_default() {
                self.emit(MigrationOperation::Rename {
                    table: name.clone(),
                    column: Some(old),
                    to: new,
                })?;
            }

            let dropped: Vec<String> = self
                .working_table(&name)?
                .columns
                .iter()
                .filter(|c| !desired.has_column(&c.name))
                .map(|c| c.name.clone())
                .collect();
            for column in dropped {
                let table = self.working_table(&name)?;
                let position = table.column_position(&column);
                let Some(definition) = table.get_column(&column).cloned() else {
                    continue;
                };
                self.warn(format!("dropping column {name}.{column} discards its data"));
                self.emit(MigrationOperation::DropColumn {
                    table: name.clone(),
                    column: definition,
                    position,
                })?;
            }

            for (position, column) in desired.columns.iter().enumerate() {
                if self.working_table(&name)?.has_column(&column.name) {
                    continue;
                }
                if !column.nullable && column.default.is_none() {
                    self.warn(format!(
                        "column {name}.{} is NOT NULL without a default; existing rows will reject it",
                        column.name
                    ));
                }
                self.emit(MigrationOperation::AddColumn {
                    table: name.clone(),
                    column: column.clone(),
                    position: Some(position),
                })?;
            }

            for column in &desired.columns {
                let Some(existing) = self.working_table(&name)?.get_column(&column.name) else {
                    continue;
                };
                if existing != column {
                    let from = existing.clone();
                    self.emit(MigrationOperation::AlterColumn {
                        table: name.clone(),
                        column: column.name.clone(),
                        from,
                        to: column.clone(),
                    })?;
                }
            }
        }
        Ok(())
    }

    fn add_constraints(&mut self) -> Result<(), MigrationError> {
        let mut adds = Vec::new();
        for foreign_keys in [false, true] {
            for desired in self.desired.tables() {
                let working = self.working_table(&desired.name)?;
                for constraint in desired
                    .constraints
                    .iter()
                    .filter(|c| c.is_foreign_key() == foreign_keys)
                {
                    if !working.constraints.contains(constraint) {
                        adds.push(MigrationOperation::AddConstraint {
                            table: desired.name.clone(),
                            constraint: constraint.clone(),
                        });
                    }
                }
            }
        }
        for desired in self.desired.tables() {
            let working = self.working_table(&desired.name)?;
            for index in &desired.indexes {
                if !working.indexes.contains(index) {
                    adds.push(MigrationOperation::CreateIndex {
                        table: desired.name.clone(),
                        index: index.clone(),
                    });
                }
            }
        }
        adds.into_iter().try_for_each(|op| self.emit(op))
    }

    fn working_table(&self, name: &str) -> Result<&Table, MigrationError> {
        self.working.table(name).ok_or_else(|| {
            MigrationError::InvalidOperation(format!("table '{name}' missing while planning"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::OnDelete;

    fn author() -> Table {
        Table::new("author")
            .column(Column::integer("id"))
            .column(Column::text("name"))
            .primary_key(&["id"])
    }

    fn book() -> Table {
        Table::new("book")
            .column(Column::integer("id"))
            .column(Column::text("title"))
            .column(Column::reference("author_id", "author", "id"))
            .primary_key(&["id"])
            .foreign_key("author_id", "author", "id", OnDelete::Cascade)
    }

    fn schema(tables: Vec<Table>) -> Schema {
        let mut s = Schema::new();
        for t in tables {
            s.define_table(t).unwrap();
        }
        s
    }

    fn apply(schema: &Schema, plan: &MigrationPlan) -> Schema {
        let mut s = schema.clone();
        for op in &plan.operations {
            op.apply_to(&mut s).unwrap();
        }
        s
    }

    #[test]
    fn test_identical_schemas_plan_nothing() {
        let s = schema(vec![author(), book()]);
        let plan = MigrationPlanner::new().plan(&s, &s).unwrap();
        assert!(plan.is_empty());
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_referenced_table_created_first() {
        // Declared dependents-first on purpose
        let desired = schema(vec![book(), author()]);
        let plan = MigrationPlanner::new().plan(&Schema::new(), &desired).unwrap();
        let kinds: Vec<String> = plan.operations.iter().map(|o| o.to_string()).collect();
        assert_eq!(kinds, vec!["create table author", "create table book"]);
        match &plan.operations[1] {
            MigrationOperation::CreateTable { table } => {
                assert!(table.get_constraint("book_author_id_fkey").is_some());
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(apply(&Schema::new(), &plan), desired);
    }

    #[test]
    fn test_cycle_defers_foreign_key() {
        let a = Table::new("a")
            .column(Column::integer("id"))
            .column(Column::reference("b_id", "b", "id").nullable())
            .primary_key(&["id"])
            .foreign_key("b_id", "b", "id", OnDelete::SetNull);
        let b = Table::new("b")
            .column(Column::integer("id"))
            .column(Column::reference("a_id", "a", "id"))
            .primary_key(&["id"])
            .foreign_key("a_id", "a", "id", OnDelete::Cascade);
        let desired = schema(vec![a, b]);
        let plan = MigrationPlanner::new().plan(&Schema::new(), &desired).unwrap();
        let kinds: Vec<&str> = plan.operations.iter().map(|o| o.kind()).collect();
        assert_eq!(kinds, vec!["create_table", "create_table", "add_constraint"]);
        assert!(matches!(
            &plan.operations[2],
            MigrationOperation::AddConstraint { table, constraint } if table == "a" && constraint.name() == "a_b_id_fkey"
        ));
        assert_eq!(apply(&Schema::new(), &plan), desired);
    }

    #[test]
    fn test_drop_order_and_warnings() {
        let current = schema(vec![author(), book()]);
        let plan = MigrationPlanner::new().plan(&current, &Schema::new()).unwrap();
        let steps: Vec<String> = plan.operations.iter().map(|o| o.to_string()).collect();
        assert_eq!(
            steps,
            vec![
                "drop foreign_key book_author_id_fkey on book",
                "drop table book",
                "drop table author",
            ]
        );
        assert_eq!(plan.warnings.len(), 2);
        assert!(plan.has_data_loss());
    }

    #[test]
    fn test_strict_rename() {
        let current = schema(vec![author()]);
        let desired = schema(vec![Table::new("author")
            .column(Column::integer("id"))
            .column(Column::text("full_name"))
            .primary_key(&["id"])]);
        let plan = MigrationPlanner::new().plan(&current, &desired).unwrap();
        assert_eq!(
            plan.operations,
            vec![MigrationOperation::Rename {
                table: "author".into(),
                column: Some("name".into()),
                to: "full_name".into(),
            }]
        );
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_strict_declines_ambiguous_rename() {
        let current = schema(vec![Table::new("person")
            .column(Column::integer("id"))
            .column(Column::text("first"))
            .column(Column::text("last"))
            .primary_key(&["id"])]);
        let desired = schema(vec![Table::new("person")
            .column(Column::integer("id"))
            .column(Column::text("given"))
            .column(Column::text("family"))
            .primary_key(&["id"])]);

        let strict = MigrationPlanner::new().plan(&current, &desired).unwrap();
        assert_eq!(
            strict.operations.iter().filter(|o| o.kind() == "drop_column").count(),
            2
        );
        assert!(strict.warnings.iter().any(|w| w.contains("ambiguous rename")));
        assert_eq!(apply(&current, &strict), desired);

        let positional = MigrationPlanner::with_policy(RenamePolicy::Positional)
            .plan(&current, &desired)
            .unwrap();
        assert!(positional.operations.iter().all(|o| o.kind() == "rename"));
        assert_eq!(apply(&current, &positional), desired);

        let never = MigrationPlanner::with_policy(RenamePolicy::Never)
            .plan(&current, &desired)
            .unwrap();
        assert!(never.operations.iter().all(|o| o.kind() != "rename"));
        assert!(never.warnings.iter().all(|w| !w.contains("ambiguous")));
    }

    #[test]
    fn test_rename_keeps_foreign_keys() {
        let current = schema(vec![author(), book()]);
        let renamed_book = Table::new("book")
            .column(Column::integer("id"))
            .column(Column::text("title"))
            .column(Column::reference("writer_id", "author", "id"))
            .primary_key(&["id"])
            .foreign_key("writer_id", "author", "id", OnDelete::Cascade);
        let desired = schema(vec![author(), renamed_book]);
        let plan = MigrationPlanner::new().plan(&current, &desired).unwrap();
        // Constraint name differs, so the old one goes and the new one comes.
        let kinds: Vec<&str> = plan.operations.iter().map(|o| o.kind()).collect();
        assert_eq!(kinds, vec!["drop_constraint", "rename", "add_constraint"]);
        assert_eq!(apply(&current, &plan), desired);
    }

    #[test]
    fn test_column_changes_keep_positions() {
        let current = schema(vec![Table::new("person")
            .column(Column::integer("id"))
            .column(Column::boolean("active"))
            .column(Column::text("email"))
            .primary_key(&["id"])]);
        let desired = schema(vec![Table::new("person")
            .column(Column::integer("id"))
            .column(Column::integer("age").nullable())
            .column(Column::text("email").nullable())
            .primary_key(&["id"])
            .index("person_email_idx", &["email"], true)]);
        let plan = MigrationPlanner::new().plan(&current, &desired).unwrap();
        let kinds: Vec<&str> = plan.operations.iter().map(|o| o.kind()).collect();
        assert_eq!(kinds, vec!["drop_column", "add_column", "alter_column", "create_index"]);
        assert!(matches!(
            &plan.operations[1],
            MigrationOperation::AddColumn { position: Some(1), .. }
        ));
        assert_eq!(apply(&current, &plan), desired);

        let back = MigrationPlanner::new().plan(&desired, &current).unwrap();
        assert_eq!(apply(&desired, &back), current);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let current = schema(vec![author()]);
        let desired = schema(vec![
            Table::new("author")
                .column(Column::integer("id"))
                .column(Column::text("bio").nullable())
                .primary_key(&["id"]),
            book(),
        ]);
        let planner = MigrationPlanner::new();
        let first = planner.plan(&current, &desired).unwrap();
        for _ in 0..5 {
            assert_eq!(planner.plan(&current, &desired).unwrap(), first);
        }
    }

    #[test]
    fn test_invalid_desired_schema_rejected() {
        let desired = schema(vec![book()]);
        let err = MigrationPlanner::new().plan(&Schema::new(), &desired).unwrap_err();
        assert!(matches!(err, MigrationError::Schema(_)));
    }
}
