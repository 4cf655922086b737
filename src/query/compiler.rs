//! Query compiler
//!
//! Renders a [`Query`] into PostgreSQL text plus an ordered parameter list.
//! Literal values never reach the SQL text: each one is bound as `$n` in the
//! order it appears. Identifiers are always double-quoted. Compilation is a
//! pure function of the query, so compiling twice yields identical output.

use super::builder::Query;
use super::expr::{CompareOp, Expr, Predicate, Reduction};
use crate::error::CompileError;
use crate::value::Value;
use std::fmt;

/// SQL text and its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
            write!(f, " -- [{}]", params.join(", "))?;
        }
        Ok(())
    }
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Incremental SQL writer shared by SELECT and write statements.
pub(crate) struct SqlWriter<'q> {
    sql: String,
    params: Vec<Value>,
    annotations: &'q [(String, Expr)],
}

impl<'q> SqlWriter<'q> {
    pub fn new(annotations: &'q [(String, Expr)]) -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
            annotations,
        }
    }

    pub fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    pub fn push_ident(&mut self, name: &str) {
        self.sql.push_str(&quote_ident(name));
    }

    pub fn bind(&mut self, value: Value) {
        self.params.push(value);
        let placeholder = format!("${}", self.params.len());
        self.sql.push_str(&placeholder);
    }

    pub fn expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Column(name) => {
                return Err(CompileError::Unsupported(format!(
                    "field '{name}' was never resolved against a schema"
                )))
            }
            Expr::Field { table, column } => {
                self.push_ident(table);
                self.push(".");
                self.push_ident(column);
            }
            Expr::Output(name) => {
                let annotation = self
                    .annotations
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, e)| e)
                    .ok_or_else(|| {
                        CompileError::Unsupported(format!(
                            "'{name}' is an aggregation and cannot be used inside an expression"
                        ))
                    })?;
                self.expr(annotation)?;
            }
            Expr::Value(value) => self.bind(value.clone()),
            Expr::Binary { op, left, right } => {
                self.push("(");
                self.expr(left)?;
                self.push(" ");
                self.push(op.sql());
                self.push(" ");
                self.expr(right)?;
                self.push(")");
            }
            Expr::Neg(inner) => {
                self.push("(-");
                self.expr(inner)?;
                self.push(")");
            }
            Expr::Case {
                branches,
                otherwise,
            } => {
                self.push("CASE");
                for (condition, then) in branches {
                    self.push(" WHEN ");
                    self.predicate(condition)?;
                    self.push(" THEN ");
                    self.expr(then)?;
                }
                if let Some(e) = otherwise {
                    self.push(" ELSE ");
                    self.expr(e)?;
                }
                self.push(" END");
            }
        }
        Ok(())
    }

    pub fn predicate(&mut self, predicate: &Predicate) -> Result<(), CompileError> {
        match predicate {
            Predicate::Compare { left, op, right } => {
                match (op, left, right) {
                    (CompareOp::Eq | CompareOp::Ne, e, Expr::Value(Value::Null))
                    | (CompareOp::Eq | CompareOp::Ne, Expr::Value(Value::Null), e) => {
                        self.expr(e)?;
                        self.push(if *op == CompareOp::Eq {
                            " IS NULL"
                        } else {
                            " IS NOT NULL"
                        });
                    }
                    _ => {
                        self.expr(left)?;
                        self.push(" ");
                        self.push(op.sql());
                        self.push(" ");
                        self.expr(right)?;
                    }
                }
            }
            Predicate::In { values, .. } if values.is_empty() => self.push("FALSE"),
            Predicate::In { expr, values } => {
                self.expr(expr)?;
                self.push(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.bind(value.clone());
                }
                self.push(")");
            }
            Predicate::Like { expr, pattern } => {
                self.expr(expr)?;
                self.push(" LIKE ");
                self.bind(pattern.clone());
            }
            Predicate::IsNull(e) => {
                self.expr(e)?;
                self.push(" IS NULL");
            }
            Predicate::IsNotNull(e) => {
                self.expr(e)?;
                self.push(" IS NOT NULL");
            }
            Predicate::And(parts) => self.junction(parts, " AND ", "TRUE")?,
            Predicate::Or(parts) => self.junction(parts, " OR ", "FALSE")?,
            Predicate::Not(inner) => match inner.as_ref() {
                Predicate::In { values, .. } if values.is_empty() => self.push("TRUE"),
                inner => {
                    self.push("NOT (");
                    self.predicate(inner)?;
                    self.push(")");
                }
            },
        }
        Ok(())
    }

    fn junction(&mut self, parts: &[Predicate], sep: &str, empty: &str) -> Result<(), CompileError> {
        if parts.is_empty() {
            self.push(empty);
            return Ok(());
        }
        self.push("(");
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                self.push(sep);
            }
            self.predicate(part)?;
        }
        self.push(")");
        Ok(())
    }

    /// ` WHERE a AND b` for a conjunctive filter list; nothing when empty.
    pub fn filters(&mut self, filters: &[Predicate]) -> Result<(), CompileError> {
        for (i, filter) in filters.iter().enumerate() {
            self.push(if i == 0 { " WHERE " } else { " AND " });
            self.predicate(filter)?;
        }
        Ok(())
    }

    fn reduction(&mut self, reduction: &Reduction) -> Result<(), CompileError> {
        self.push(reduction.function());
        self.push("(");
        if let Reduction::Count { distinct: true, .. } = reduction {
            self.push("DISTINCT ");
        }
        match reduction.argument() {
            Some(arg) => self.expr(arg)?,
            None => self.push("*"),
        }
        self.push(")");
        Ok(())
    }

    pub fn finish(self) -> CompiledQuery {
        CompiledQuery {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Grouping key in effect for a query, if any.
///
/// An explicit `group_by` wins. Otherwise aggregations next to annotations
/// group over every non-aggregated projected item.
fn grouping_key(query: &Query, items: &[(String, Expr)]) -> Option<Vec<Expr>> {
    if let Some(keys) = &query.group_by {
        return Some(keys.iter().map(|(_, e)| e.clone()).collect());
    }
    if !query.aggregations.is_empty() && !query.annotations.is_empty() {
        return Some(items.iter().map(|(_, e)| e.clone()).collect());
    }
    None
}

/// Non-aggregated projected items as `(output name, expression)`.
fn projection(query: &Query) -> Vec<(String, Expr)> {
    let mut items: Vec<(String, Expr)> = match &query.values {
        Some(values) => values.clone(),
        None if !query.aggregations.is_empty() => Vec::new(),
        None => query
            .schema()
            .table(&query.table)
            .map(|t| {
                t.columns
                    .iter()
                    .map(|c| {
                        let field = Expr::Field {
                            table: query.table.clone(),
                            column: c.name.clone(),
                        };
                        (c.name.clone(), field)
                    })
                    .collect()
            })
            .unwrap_or_default(),
    };
    for (name, _) in &query.annotations {
        if !items.iter().any(|(n, _)| n == name) {
            items.push((name.clone(), Expr::Output(name.clone())));
        }
    }
    items
}

fn check_grouping(query: &Query, items: &[(String, Expr)], key: Option<&[Expr]>) -> Result<(), CompileError> {
    match key {
        None if !query.aggregations.is_empty() => {
            if let (Some((column, _)), Some((aggregation, _))) =
                (items.first(), query.aggregations.first())
            {
                return Err(CompileError::AmbiguousGrouping {
                    column: column.clone(),
                    aggregation: aggregation.clone(),
                });
            }
            for order in &query.order_by {
                if matches!(order.expr, Expr::Field { .. }) {
                    return Err(CompileError::NotGrouped(order.name.clone()));
                }
            }
        }
        None => {}
        Some(keys) => {
            for (name, expr) in items {
                if !keys.contains(expr) {
                    return Err(CompileError::NotGrouped(name.clone()));
                }
            }
            for order in &query.order_by {
                if matches!(order.expr, Expr::Field { .. }) && !keys.contains(&order.expr) {
                    return Err(CompileError::NotGrouped(order.name.clone()));
                }
            }
        }
    }
    Ok(())
}

/// Compile a query into SQL text and parameters.
pub fn compile(query: &Query) -> Result<CompiledQuery, CompileError> {
    let items = projection(query);
    let key = grouping_key(query, &items);
    check_grouping(query, &items, key.as_deref())?;

    let mut w = SqlWriter::new(&query.annotations);
    w.push("SELECT ");
    let mut first = true;
    for (name, expr) in &items {
        if !first {
            w.push(", ");
        }
        first = false;
        w.expr(expr)?;
        w.push(" AS ");
        w.push_ident(name);
    }
    for (name, reduction) in &query.aggregations {
        if !first {
            w.push(", ");
        }
        first = false;
        w.reduction(reduction)?;
        w.push(" AS ");
        w.push_ident(name);
    }

    w.push(" FROM ");
    w.push_ident(&query.table);
    for join in &query.joins {
        w.push(" ");
        w.push(join.kind.sql());
        w.push(" ");
        w.push_ident(&join.table);
        w.push(" ON ");
        w.predicate(&join.on)?;
    }

    w.filters(&query.filters)?;

    if let Some(keys) = &key {
        for (i, expr) in keys.iter().enumerate() {
            w.push(if i == 0 { " GROUP BY " } else { ", " });
            match expr {
                // Annotations are grouped by ordinal so their bound
                // parameters are not repeated in the key.
                Expr::Output(name) => {
                    let ordinal = items
                        .iter()
                        .position(|(n, _)| n == name)
                        .map(|p| p + 1)
                        .ok_or_else(|| CompileError::NotGrouped(name.clone()))?;
                    w.push(&ordinal.to_string());
                }
                e => w.expr(e)?,
            }
        }
    }

    for (i, order) in query.order_by.iter().enumerate() {
        w.push(if i == 0 { " ORDER BY " } else { ", " });
        match &order.expr {
            Expr::Output(name) => w.push_ident(name),
            e => w.expr(e)?,
        }
        if order.descending {
            w.push(" DESC");
        }
    }

    if let Some(limit) = query.limit {
        w.push(" LIMIT ");
        w.bind(Value::Int(limit as i64));
    }
    if let Some(offset) = query.offset {
        w.push(" OFFSET ");
        w.bind(Value::Int(offset as i64));
    }

    Ok(w.finish())
}
