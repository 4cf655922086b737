//! INSERT, UPDATE and DELETE statements.
//!
//! Write statements resolve columns against the schema while they are
//! built and run every column validator before any I/O. They compile
//! through the same [`SqlWriter`] as queries, so values are always bound as
//! parameters.

use super::builder::{Outputs, Scope};
use super::compiler::{quote_ident, CompiledQuery, SqlWriter};
use super::expr::Predicate;
use super::record::Record;
use crate::error::{CompileError, Error, ExecutionError, QueryError, ValidationError};
use crate::executor::Executor;
use crate::schema::{Constraint, OnDelete, Schema, Table};
use crate::value::Value;
use std::sync::Arc;

fn base_table<'s>(schema: &'s Schema, table: &str) -> Result<&'s Table, QueryError> {
    schema
        .table(table)
        .ok_or_else(|| QueryError::UnknownTable(table.to_string()))
}

fn check_column(schema: &Schema, table: &str, column: &str) -> Result<(), QueryError> {
    if base_table(schema, table)?.has_column(column) {
        Ok(())
    } else {
        Err(QueryError::UnknownField {
            table: table.to_string(),
            field: column.to_string(),
        })
    }
}

/// Append or replace an assignment, keeping first-set order.
fn assign(assignments: &mut Vec<(String, Value)>, column: &str, value: Value) {
    match assignments.iter_mut().find(|(c, _)| c == column) {
        Some((_, slot)) => *slot = value,
        None => assignments.push((column.to_string(), value)),
    }
}

fn validate_assignments(
    schema: &Schema,
    table: &str,
    assignments: &[(String, Value)],
) -> Result<(), ValidationError> {
    let Some(definition) = schema.table(table) else {
        return Ok(());
    };
    for (column, value) in assignments {
        if let Some(column) = definition.get_column(column) {
            column.validate_value(table, value)?;
        }
    }
    Ok(())
}

/// `INSERT INTO table (...) VALUES (...)`
#[derive(Debug, Clone)]
pub struct Insert {
    schema: Arc<Schema>,
    table: String,
    values: Vec<(String, Value)>,
    returning: Vec<String>,
}

impl Insert {
    pub fn into_table(schema: Arc<Schema>, table: &str) -> Result<Self, QueryError> {
        base_table(&schema, table)?;
        Ok(Self {
            schema,
            table: table.to_string(),
            values: Vec::new(),
            returning: Vec::new(),
        })
    }

    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Result<Self, QueryError> {
        check_column(&self.schema, &self.table, column)?;
        assign(&mut self.values, column, value.into());
        Ok(self)
    }

    /// Columns to return from the inserted row, e.g. a generated key.
    pub fn returning(mut self, columns: &[&str]) -> Result<Self, QueryError> {
        for column in columns {
            check_column(&self.schema, &self.table, column)?;
        }
        self.returning = columns.iter().map(|c| c.to_string()).collect();
        Ok(self)
    }

    /// Run the column validators over every assigned value.
    ///
    /// Columns left out of the statement must be nullable or carry a
    /// default; the primary key is assumed to be generated.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_assignments(&self.schema, &self.table, &self.values)?;
        if let Some(definition) = self.schema.table(&self.table) {
            let generated = definition.primary_key_column();
            for column in &definition.columns {
                let provided = self.values.iter().any(|(c, _)| *c == column.name);
                if !provided
                    && !column.nullable
                    && column.default.is_none()
                    && generated != Some(column.name.as_str())
                {
                    return Err(ValidationError {
                        table: self.table.clone(),
                        column: column.name.clone(),
                        message: "is required".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn compile(&self) -> Result<CompiledQuery, CompileError> {
        let mut w = SqlWriter::new(&[]);
        w.push("INSERT INTO ");
        w.push_ident(&self.table);
        if self.values.is_empty() {
            w.push(" DEFAULT VALUES");
        } else {
            let columns: Vec<String> = self.values.iter().map(|(c, _)| quote_ident(c)).collect();
            w.push(" (");
            w.push(&columns.join(", "));
            w.push(") VALUES (");
            for (i, (_, value)) in self.values.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.bind(value.clone());
            }
            w.push(")");
        }
        if !self.returning.is_empty() {
            let columns: Vec<String> = self.returning.iter().map(|c| quote_ident(c)).collect();
            w.push(" RETURNING ");
            w.push(&columns.join(", "));
        }
        Ok(w.finish())
    }

    /// Validate, compile and execute; returns the number of rows inserted.
    pub fn execute(&self, executor: &dyn Executor) -> Result<u64, Error> {
        self.validate()?;
        let compiled = self.compile()?;
        Ok(executor.execute(&compiled.sql, &compiled.params)?)
    }

    /// Like [`Insert::execute`], returning the `RETURNING` columns.
    pub fn fetch(&self, executor: &dyn Executor) -> Result<Vec<Record>, Error> {
        self.validate()?;
        let compiled = self.compile()?;
        Ok(executor.query(&compiled.sql, &compiled.params)?)
    }
}

/// `UPDATE table SET ... WHERE ...`
#[derive(Debug, Clone)]
pub struct Update {
    schema: Arc<Schema>,
    table: String,
    assignments: Vec<(String, Value)>,
    filters: Vec<Predicate>,
}

impl Update {
    pub fn table(schema: Arc<Schema>, table: &str) -> Result<Self, QueryError> {
        base_table(&schema, table)?;
        Ok(Self {
            schema,
            table: table.to_string(),
            assignments: Vec::new(),
            filters: Vec::new(),
        })
    }

    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Result<Self, QueryError> {
        check_column(&self.schema, &self.table, column)?;
        assign(&mut self.assignments, column, value.into());
        Ok(self)
    }

    /// Restrict the rows updated; filters combine with AND.
    pub fn filter(mut self, predicate: Predicate) -> Result<Self, QueryError> {
        let predicate =
            Scope::single(&self.schema, &self.table).resolve_predicate(predicate, Outputs::None)?;
        self.filters.push(predicate);
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_assignments(&self.schema, &self.table, &self.assignments)
    }

    pub fn compile(&self) -> Result<CompiledQuery, CompileError> {
        if self.assignments.is_empty() {
            return Err(CompileError::Unsupported(format!(
                "update of '{}' assigns no columns",
                self.table
            )));
        }
        let mut w = SqlWriter::new(&[]);
        w.push("UPDATE ");
        w.push_ident(&self.table);
        for (i, (column, value)) in self.assignments.iter().enumerate() {
            w.push(if i == 0 { " SET " } else { ", " });
            w.push_ident(column);
            w.push(" = ");
            w.bind(value.clone());
        }
        w.filters(&self.filters)?;
        Ok(w.finish())
    }

    /// Validate, compile and execute; returns the number of rows updated.
    pub fn execute(&self, executor: &dyn Executor) -> Result<u64, Error> {
        self.validate()?;
        let compiled = self.compile()?;
        Ok(executor.execute(&compiled.sql, &compiled.params)?)
    }
}

/// `DELETE FROM table WHERE ...`
///
/// Foreign keys declared with [`OnDelete::Protect`] are checked before the
/// delete is issued: if any dependent row references a row about to be
/// deleted, execution fails with [`ExecutionError::Protected`] and nothing
/// is deleted. Every other policy is enforced by the database.
#[derive(Debug, Clone)]
pub struct Delete {
    schema: Arc<Schema>,
    table: String,
    filters: Vec<Predicate>,
}

impl Delete {
    pub fn from_table(schema: Arc<Schema>, table: &str) -> Result<Self, QueryError> {
        base_table(&schema, table)?;
        Ok(Self {
            schema,
            table: table.to_string(),
            filters: Vec::new(),
        })
    }

    pub fn filter(mut self, predicate: Predicate) -> Result<Self, QueryError> {
        let predicate =
            Scope::single(&self.schema, &self.table).resolve_predicate(predicate, Outputs::None)?;
        self.filters.push(predicate);
        Ok(self)
    }

    pub fn compile(&self) -> Result<CompiledQuery, CompileError> {
        let mut w = SqlWriter::new(&[]);
        w.push("DELETE FROM ");
        w.push_ident(&self.table);
        w.filters(&self.filters)?;
        Ok(w.finish())
    }

    /// Dependent-row counts for every protecting foreign key, as
    /// `(dependent table, statement)`.
    pub fn protect_checks(&self) -> Result<Vec<(String, CompiledQuery)>, CompileError> {
        let mut checks = Vec::new();
        for (dependent, constraint) in self.schema.referencing_foreign_keys(&self.table) {
            let Constraint::ForeignKey {
                column,
                references_column,
                on_delete: OnDelete::Protect,
                ..
            } = constraint
            else {
                continue;
            };
            let mut w = SqlWriter::new(&[]);
            w.push("SELECT COUNT(*) AS \"count\" FROM ");
            w.push_ident(&dependent.name);
            w.push(" WHERE ");
            w.push_ident(&dependent.name);
            w.push(".");
            w.push_ident(column);
            w.push(" IN (SELECT ");
            w.push_ident(&self.table);
            w.push(".");
            w.push_ident(references_column);
            w.push(" FROM ");
            w.push_ident(&self.table);
            w.filters(&self.filters)?;
            w.push(")");
            checks.push((dependent.name.clone(), w.finish()));
        }
        Ok(checks)
    }

    /// Check protecting foreign keys, then delete; returns the number of
    /// rows deleted.
    ///
    /// The check and the delete are separate statements; run them inside
    /// [`atomic`](crate::transaction::atomic) to keep them consistent.
    pub fn execute(&self, executor: &dyn Executor) -> Result<u64, Error> {
        for (dependent, check) in self.protect_checks()? {
            let row = executor.query_one(&check.sql, &check.params)?;
            let dependents = row.get("count").and_then(Value::as_i64).ok_or_else(|| {
                ExecutionError::Parse(format!(
                    "dependent count for '{dependent}' is missing or not an integer"
                ))
            })?;
            if dependents > 0 {
                log::debug!("delete from '{}' blocked by {dependents} row(s) in '{dependent}'", self.table);
                return Err(ExecutionError::Protected {
                    table: self.table.clone(),
                    dependent_table: dependent,
                    dependents,
                }
                .into());
            }
        }
        let compiled = self.compile()?;
        Ok(executor.execute(&compiled.sql, &compiled.params)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnection;
    use crate::query::expr::col;
    use crate::schema::{Column, Relationship, Validator};

    fn schema(policy: OnDelete) -> Arc<Schema> {
        let mut s = Schema::new();
        s.define_table(
            Table::new("author")
                .column(Column::integer("id"))
                .column(Column::text("name").validator(Validator::not_blank()))
                .primary_key(&["id"]),
        )
        .unwrap();
        s.define_table(
            Table::new("book")
                .column(Column::integer("id"))
                .column(Column::text("title"))
                .column(Column::integer("pages").nullable().validator(Validator::min_value(1.0)))
                .column(Column::reference("author_id", "author", "id"))
                .primary_key(&["id"]),
        )
        .unwrap();
        s.add_relationship(
            Relationship::one_to_many("book", "author_id")
                .references("author")
                .on_delete(policy),
        )
        .unwrap();
        Arc::new(s)
    }

    #[test]
    fn test_insert_compiles_with_placeholders() {
        let insert = Insert::into_table(schema(OnDelete::Cascade), "author")
            .unwrap()
            .set("name", "Ann")
            .unwrap()
            .returning(&["id"])
            .unwrap();
        let compiled = insert.compile().unwrap();
        assert_eq!(
            compiled.sql,
            r#"INSERT INTO "author" ("name") VALUES ($1) RETURNING "id""#
        );
        assert_eq!(compiled.params, vec![Value::Text("Ann".into())]);
    }

    #[test]
    fn test_insert_runs_validators_before_io() {
        let conn = MockConnection::new();
        let insert = Insert::into_table(schema(OnDelete::Cascade), "author")
            .unwrap()
            .set("name", "  ")
            .unwrap();
        let err = insert.execute(&conn).unwrap_err();
        assert!(matches!(err, Error::Validation(ref v) if v.column == "name"));
        assert!(conn.statements().is_empty());
    }

    #[test]
    fn test_insert_requires_non_nullable_columns() {
        let insert = Insert::into_table(schema(OnDelete::Cascade), "book")
            .unwrap()
            .set("title", "Dune")
            .unwrap();
        let err = insert.validate().unwrap_err();
        assert_eq!(err.column, "author_id");
    }

    #[test]
    fn test_unknown_column_fails_at_build_time() {
        let err = Insert::into_table(schema(OnDelete::Cascade), "author")
            .unwrap()
            .set("nmae", "Ann")
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownField { .. }));
    }

    #[test]
    fn test_update_compiles_set_then_where() {
        let update = Update::table(schema(OnDelete::Cascade), "book")
            .unwrap()
            .set("pages", 320)
            .unwrap()
            .filter(col("id").eq(7))
            .unwrap();
        let compiled = update.compile().unwrap();
        assert_eq!(
            compiled.sql,
            r#"UPDATE "book" SET "pages" = $1 WHERE "book"."id" = $2"#
        );
        assert_eq!(compiled.params, vec![Value::Int(320), Value::Int(7)]);
        assert!(Update::table(schema(OnDelete::Cascade), "book")
            .unwrap()
            .set("pages", 0)
            .unwrap()
            .validate()
            .is_err());
    }

    #[test]
    fn test_delete_without_protection_issues_one_statement() {
        let conn = MockConnection::new();
        conn.on_execute("DELETE FROM", 1);
        let deleted = Delete::from_table(schema(OnDelete::Cascade), "author")
            .unwrap()
            .filter(col("id").eq(1))
            .unwrap()
            .execute(&conn)
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(
            conn.statements(),
            vec![r#"DELETE FROM "author" WHERE "author"."id" = $1"#]
        );
    }

    #[test]
    fn test_protected_delete_counts_dependents_first() {
        let conn = MockConnection::new();
        conn.on_query("COUNT(*)", vec![Record::new().with("count", 2)]);
        let delete = Delete::from_table(schema(OnDelete::Protect), "author")
            .unwrap()
            .filter(col("id").eq(1))
            .unwrap();
        let err = delete.execute(&conn).unwrap_err();
        assert!(matches!(
            err,
            Error::Execution(ExecutionError::Protected { ref dependent_table, dependents: 2, .. })
                if dependent_table == "book"
        ));
        assert_eq!(
            conn.statements(),
            vec![
                r#"SELECT COUNT(*) AS "count" FROM "book" WHERE "book"."author_id" IN (SELECT "author"."id" FROM "author" WHERE "author"."id" = $1)"#
            ]
        );
    }

    #[test]
    fn test_protected_delete_proceeds_without_dependents() {
        let conn = MockConnection::new();
        conn.on_query("COUNT(*)", vec![Record::new().with("count", 0)]);
        Delete::from_table(schema(OnDelete::Protect), "author")
            .unwrap()
            .execute(&conn)
            .unwrap();
        assert_eq!(conn.statements().last().map(String::as_str), Some(r#"DELETE FROM "author""#));
    }

    #[test]
    fn test_protected_delete_requires_dependent_count() {
        let conn = MockConnection::new();
        conn.on_query("COUNT(*)", vec![Record::new().with("total", 0)]);
        let err = Delete::from_table(schema(OnDelete::Protect), "author")
            .unwrap()
            .execute(&conn)
            .unwrap_err();
        assert!(matches!(err, Error::Execution(ExecutionError::Parse(_))));
        assert!(!conn.statements().iter().any(|s| s.starts_with("DELETE")));
    }
}
