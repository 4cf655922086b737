//! Immutable query builder.
//!
//! Every method takes `&self` and returns a fresh [`Query`], so a partially
//! built query can serve as the base for several variations. Field names
//! are resolved against the schema as soon as they are supplied; a typo
//! fails here with [`QueryError`] instead of at execution time.

use super::compiler::{self, CompiledQuery};
use super::expr::{Expr, Predicate, Reduction};
use super::record::Record;
use crate::error::{Error, ExecutionError, QueryError};
use crate::executor::Executor;
use crate::schema::Schema;
use crate::value::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub fn sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub on: Predicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Name as requested, without the `-` prefix
    pub name: String,
    pub expr: Expr,
    pub descending: bool,
}

/// Which named outputs a field reference may resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outputs {
    None,
    Annotations,
    All,
}

/// Name resolution context: the tables taking part in a statement (base
/// table first) and the outputs defined so far.
pub(crate) struct Scope<'a> {
    pub schema: &'a Schema,
    pub tables: Vec<&'a str>,
    pub annotations: &'a [(String, Expr)],
    pub aggregations: &'a [(String, Reduction)],
}

impl<'a> Scope<'a> {
    pub fn single(schema: &'a Schema, table: &'a str) -> Self {
        Scope {
            schema,
            tables: vec![table],
            annotations: &[],
            aggregations: &[],
        }
    }

    fn has_output(&self, name: &str, outputs: Outputs) -> bool {
        let annotation = self.annotations.iter().any(|(n, _)| n == name);
        let aggregation = self.aggregations.iter().any(|(n, _)| n == name);
        match outputs {
            Outputs::None => false,
            Outputs::Annotations => annotation,
            Outputs::All => annotation || aggregation,
        }
    }

    fn field(&self, table: &str, column: &str) -> Result<Expr, QueryError> {
        if !self.tables.iter().any(|t| *t == table) {
            return Err(QueryError::UnknownTable(table.to_string()));
        }
        match self.schema.table(table) {
            Some(t) if t.has_column(column) => Ok(Expr::Field {
                table: table.to_string(),
                column: column.to_string(),
            }),
            _ => Err(QueryError::UnknownField {
                table: table.to_string(),
                field: column.to_string(),
            }),
        }
    }

    /// Resolve `name` or `table.name`.
    ///
    /// Order: base table column, named output, then a column of exactly one
    /// joined table.
    pub fn resolve_name(&self, name: &str, outputs: Outputs) -> Result<Expr, QueryError> {
        if let Some((table, column)) = name.split_once('.') {
            return self.field(table, column);
        }
        let base = self.tables[0];
        if self.schema.table(base).is_some_and(|t| t.has_column(name)) {
            return self.field(base, name);
        }
        if self.has_output(name, outputs) {
            return Ok(Expr::Output(name.to_string()));
        }
        let matches: Vec<&str> = self.tables[1..]
            .iter()
            .copied()
            .filter(|t| self.schema.table(t).is_some_and(|t| t.has_column(name)))
            .collect();
        match matches.as_slice() {
            [table] => self.field(table, name),
            [] => Err(QueryError::UnknownField {
                table: base.to_string(),
                field: name.to_string(),
            }),
            _ => Err(QueryError::AmbiguousField(name.to_string())),
        }
    }

    pub fn resolve_expr(&self, expr: Expr, outputs: Outputs) -> Result<Expr, QueryError> {
        Ok(match expr {
            Expr::Column(name) => self.resolve_name(&name, outputs)?,
            Expr::Field { table, column } => self.field(&table, &column)?,
            Expr::Output(name) => {
                if !self.has_output(&name, outputs) {
                    return Err(QueryError::UnknownField {
                        table: self.tables[0].to_string(),
                        field: name,
                    });
                }
                Expr::Output(name)
            }
            Expr::Value(v) => Expr::Value(v),
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(self.resolve_expr(*left, outputs)?),
                right: Box::new(self.resolve_expr(*right, outputs)?),
            },
            Expr::Neg(inner) => Expr::Neg(Box::new(self.resolve_expr(*inner, outputs)?)),
            Expr::Case {
                branches,
                otherwise,
            } => Expr::Case {
                branches: branches
                    .into_iter()
                    .map(|(p, e)| {
                        Ok((
                            self.resolve_predicate(p, outputs)?,
                            self.resolve_expr(e, outputs)?,
                        ))
                    })
                    .collect::<Result<_, QueryError>>()?,
                otherwise: match otherwise {
                    Some(e) => Some(Box::new(self.resolve_expr(*e, outputs)?)),
                    None => None,
                },
            },
        })
    }

    pub fn resolve_predicate(
        &self,
        predicate: Predicate,
        outputs: Outputs,
    ) -> Result<Predicate, QueryError> {
        Ok(match predicate {
            Predicate::Compare { left, op, right } => Predicate::Compare {
                left: self.resolve_expr(left, outputs)?,
                op,
                right: self.resolve_expr(right, outputs)?,
            },
            Predicate::In { expr, values } => Predicate::In {
                expr: self.resolve_expr(expr, outputs)?,
                values,
            },
            Predicate::Like { expr, pattern } => Predicate::Like {
                expr: self.resolve_expr(expr, outputs)?,
                pattern,
            },
            Predicate::IsNull(e) => Predicate::IsNull(self.resolve_expr(e, outputs)?),
            Predicate::IsNotNull(e) => Predicate::IsNotNull(self.resolve_expr(e, outputs)?),
            Predicate::And(parts) => Predicate::And(
                parts
                    .into_iter()
                    .map(|p| self.resolve_predicate(p, outputs))
                    .collect::<Result<_, _>>()?,
            ),
            Predicate::Or(parts) => Predicate::Or(
                parts
                    .into_iter()
                    .map(|p| self.resolve_predicate(p, outputs))
                    .collect::<Result<_, _>>()?,
            ),
            Predicate::Not(inner) => {
                Predicate::Not(Box::new(self.resolve_predicate(*inner, outputs)?))
            }
        })
    }
}

/// A query against one base table of a [`Schema`].
///
/// # Example
///
/// ```no_run
/// use quarry::query::{col, count_all, Query};
/// # fn run(schema: std::sync::Arc<quarry::Schema>, conn: &dyn quarry::Executor) -> quarry::Result<()> {
/// let adults = Query::new(schema, "person")?
///     .filter(col("age").gte(18))?
///     .aggregate("count", count_all())?;
/// let row = adults.fetch_one(conn)?;
/// assert_eq!(row.get("count").and_then(|v| v.as_i64()), Some(2));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    schema: Arc<Schema>,
    pub(crate) table: String,
    pub(crate) filters: Vec<Predicate>,
    pub(crate) joins: Vec<Join>,
    pub(crate) annotations: Vec<(String, Expr)>,
    pub(crate) aggregations: Vec<(String, Reduction)>,
    pub(crate) values: Option<Vec<(String, Expr)>>,
    pub(crate) group_by: Option<Vec<(String, Expr)>>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
}

impl Query {
    pub fn new(schema: Arc<Schema>, table: &str) -> Result<Self, QueryError> {
        if schema.table(table).is_none() {
            return Err(QueryError::UnknownTable(table.to_string()));
        }
        Ok(Self {
            schema,
            table: table.to_string(),
            filters: Vec::new(),
            joins: Vec::new(),
            annotations: Vec::new(),
            aggregations: Vec::new(),
            values: None,
            group_by: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Base table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn scope(&self) -> Scope<'_> {
        let mut tables = vec![self.table.as_str()];
        tables.extend(self.joins.iter().map(|j| j.table.as_str()));
        Scope {
            schema: &self.schema,
            tables,
            annotations: &self.annotations,
            aggregations: &self.aggregations,
        }
    }

    fn check_output_name(&self, name: &str) -> Result<(), QueryError> {
        let base_column = self
            .schema
            .table(&self.table)
            .is_some_and(|t| t.has_column(name));
        let taken = base_column
            || self.annotations.iter().any(|(n, _)| n == name)
            || self.aggregations.iter().any(|(n, _)| n == name)
            || self
                .values
                .as_ref()
                .is_some_and(|v| v.iter().any(|(n, _)| n == name));
        if taken || name.is_empty() {
            return Err(QueryError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Keep rows matching `predicate`; filters combine with AND.
    pub fn filter(&self, predicate: Predicate) -> Result<Query, QueryError> {
        let predicate = self.scope().resolve_predicate(predicate, Outputs::Annotations)?;
        let mut next = self.clone();
        next.filters.push(predicate);
        Ok(next)
    }

    /// Keep rows not matching `predicate`.
    pub fn exclude(&self, predicate: Predicate) -> Result<Query, QueryError> {
        self.filter(!predicate)
    }

    pub fn join(&self, table: &str, on: Predicate) -> Result<Query, QueryError> {
        self.add_join(JoinKind::Inner, table, on)
    }

    pub fn left_join(&self, table: &str, on: Predicate) -> Result<Query, QueryError> {
        self.add_join(JoinKind::Left, table, on)
    }

    fn add_join(&self, kind: JoinKind, table: &str, on: Predicate) -> Result<Query, QueryError> {
        if self.schema.table(table).is_none() {
            return Err(QueryError::UnknownTable(table.to_string()));
        }
        if table == self.table || self.joins.iter().any(|j| j.table == table) {
            return Err(QueryError::DuplicateJoin(table.to_string()));
        }
        let mut scope = self.scope();
        scope.tables.push(table);
        let on = scope.resolve_predicate(on, Outputs::None)?;
        let mut next = self.clone();
        next.joins.push(Join {
            kind,
            table: table.to_string(),
            on,
        });
        Ok(next)
    }

    /// Add a per-row computed value named `name` to the projection.
    pub fn annotate(&self, name: &str, expr: impl Into<Expr>) -> Result<Query, QueryError> {
        self.check_output_name(name)?;
        let expr = self.scope().resolve_expr(expr.into(), Outputs::Annotations)?;
        let mut next = self.clone();
        next.annotations.push((name.to_string(), expr));
        Ok(next)
    }

    /// Add a collection-level reduction named `name`.
    pub fn aggregate(&self, name: &str, reduction: Reduction) -> Result<Query, QueryError> {
        self.check_output_name(name)?;
        let mut reduction = reduction;
        if let Some(arg) = reduction.argument_mut() {
            let taken = std::mem::replace(arg, Expr::Value(Value::Null));
            *arg = self.scope().resolve_expr(taken, Outputs::Annotations)?;
        }
        let mut next = self.clone();
        next.aggregations.push((name.to_string(), reduction));
        Ok(next)
    }

    /// Explicit projection, replacing the default of every base column.
    ///
    /// Annotations are always projected after these items; aggregations
    /// after those.
    pub fn values(&self, fields: &[&str]) -> Result<Query, QueryError> {
        if fields.is_empty() {
            return Err(QueryError::Invalid("values() needs at least one field".into()));
        }
        let scope = self.scope();
        let mut items: Vec<(String, Expr)> = Vec::with_capacity(fields.len());
        for field in fields {
            if items.iter().any(|(n, _)| n == field) {
                return Err(QueryError::DuplicateName(field.to_string()));
            }
            items.push((field.to_string(), scope.resolve_name(field, Outputs::Annotations)?));
        }
        let mut next = self.clone();
        next.values = Some(items);
        Ok(next)
    }

    /// Explicit grouping key.
    pub fn group_by(&self, fields: &[&str]) -> Result<Query, QueryError> {
        let scope = self.scope();
        let keys = fields
            .iter()
            .map(|f| Ok((f.to_string(), scope.resolve_name(f, Outputs::Annotations)?)))
            .collect::<Result<Vec<_>, QueryError>>()?;
        let mut next = self.clone();
        next.group_by = Some(keys);
        Ok(next)
    }

    /// Replace the ordering. A leading `-` sorts descending.
    pub fn order_by(&self, fields: &[&str]) -> Result<Query, QueryError> {
        let scope = self.scope();
        let mut order = Vec::with_capacity(fields.len());
        for field in fields {
            let (name, descending) = match field.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (*field, false),
            };
            order.push(OrderBy {
                name: name.to_string(),
                expr: scope.resolve_name(name, Outputs::All)?,
                descending,
            });
        }
        let mut next = self.clone();
        next.order_by = order;
        Ok(next)
    }

    pub fn limit(&self, n: i64) -> Result<Query, QueryError> {
        let n = u64::try_from(n)
            .map_err(|_| QueryError::InvalidPagination(format!("limit must not be negative, got {n}")))?;
        let mut next = self.clone();
        next.limit = Some(n);
        Ok(next)
    }

    pub fn offset(&self, n: i64) -> Result<Query, QueryError> {
        let n = u64::try_from(n)
            .map_err(|_| QueryError::InvalidPagination(format!("offset must not be negative, got {n}")))?;
        let mut next = self.clone();
        next.offset = Some(n);
        Ok(next)
    }

    /// Render to SQL and parameters. No I/O.
    pub fn compile(&self) -> Result<CompiledQuery, crate::error::CompileError> {
        compiler::compile(self)
    }

    /// Compile and run, returning records in result order.
    pub fn fetch(&self, executor: &dyn Executor) -> Result<Vec<Record>, Error> {
        let compiled = self.compile()?;
        Ok(executor.query(&compiled.sql, &compiled.params)?)
    }

    /// Like [`Query::fetch`], failing unless exactly one record comes back.
    pub fn fetch_one(&self, executor: &dyn Executor) -> Result<Record, Error> {
        let mut records = self.fetch(executor)?;
        if records.len() != 1 {
            return Err(ExecutionError::RowCount(records.len()).into());
        }
        Ok(records.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::{col, count_all, sum};
    use crate::schema::{Column, Table};

    fn schema() -> Arc<Schema> {
        let mut s = Schema::new();
        s.define_table(
            Table::new("author")
                .column(Column::integer("id"))
                .column(Column::text("name"))
                .primary_key(&["id"]),
        )
        .unwrap();
        s.define_table(
            Table::new("book")
                .column(Column::integer("id"))
                .column(Column::text("title"))
                .column(Column::integer("pages"))
                .column(Column::reference("author_id", "author", "id"))
                .primary_key(&["id"]),
        )
        .unwrap();
        Arc::new(s)
    }

    #[test]
    fn test_unknown_field_fails_at_build_time() {
        let q = Query::new(schema(), "book").unwrap();
        assert_eq!(
            q.filter(col("titel").eq("x")).unwrap_err(),
            QueryError::UnknownField {
                table: "book".into(),
                field: "titel".into()
            }
        );
        assert_eq!(
            Query::new(schema(), "shelf").unwrap_err(),
            QueryError::UnknownTable("shelf".into())
        );
    }

    #[test]
    fn test_builder_is_immutable() {
        let base = Query::new(schema(), "book").unwrap();
        let long = base.filter(col("pages").gt(300)).unwrap();
        assert!(base.filters.is_empty());
        assert_eq!(long.filters.len(), 1);
    }

    #[test]
    fn test_join_resolution() {
        let q = Query::new(schema(), "book")
            .unwrap()
            .join("author", col("author.id").eq(col("book.author_id")))
            .unwrap();
        // `name` exists only on the joined table
        let q = q.filter(col("name").eq("Ann")).unwrap();
        assert!(matches!(
            &q.filters[0],
            Predicate::Compare { left: Expr::Field { table, .. }, .. } if table == "author"
        ));
        // `id` is on the base table and wins
        let q = q.filter(col("id").eq(1)).unwrap();
        assert!(matches!(
            &q.filters[1],
            Predicate::Compare { left: Expr::Field { table, .. }, .. } if table == "book"
        ));
        assert_eq!(
            q.join("author", col("author.id").eq(1)).unwrap_err(),
            QueryError::DuplicateJoin("author".into())
        );
        assert_eq!(
            q.filter(col("shelf.id").eq(1)).unwrap_err(),
            QueryError::UnknownTable("shelf".into())
        );
    }

    #[test]
    fn test_duplicate_output_names() {
        let q = Query::new(schema(), "book")
            .unwrap()
            .annotate("double_pages", col("pages") * 2)
            .unwrap();
        assert_eq!(
            q.aggregate("double_pages", sum(col("pages"))).unwrap_err(),
            QueryError::DuplicateName("double_pages".into())
        );
        assert_eq!(
            q.annotate("title", col("pages")).unwrap_err(),
            QueryError::DuplicateName("title".into())
        );
    }

    #[test]
    fn test_annotation_is_referencable_from_filter() {
        let q = Query::new(schema(), "book")
            .unwrap()
            .annotate("double_pages", col("pages") * 2)
            .unwrap()
            .filter(col("double_pages").gt(100))
            .unwrap();
        assert!(matches!(
            &q.filters[0],
            Predicate::Compare { left: Expr::Output(name), .. } if name == "double_pages"
        ));
    }

    #[test]
    fn test_aggregation_not_visible_to_filters() {
        let q = Query::new(schema(), "book")
            .unwrap()
            .aggregate("n", count_all())
            .unwrap();
        assert!(q.filter(col("n").gt(1)).is_err());
        assert!(q.order_by(&["-n"]).is_ok());
    }

    #[test]
    fn test_invalid_pagination() {
        let q = Query::new(schema(), "book").unwrap();
        assert!(matches!(q.limit(-1), Err(QueryError::InvalidPagination(_))));
        assert!(matches!(q.offset(-5), Err(QueryError::InvalidPagination(_))));
        assert_eq!(q.limit(10).unwrap().limit, Some(10));
    }
}
