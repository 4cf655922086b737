//! Expression, predicate and reduction trees.
//!
//! These are plain data: building them never touches a schema or a
//! connection. Field names are resolved when the tree is handed to a
//! [`Query`](super::Query), which replaces every [`Expr::Column`] with an
//! [`Expr::Field`] or an [`Expr::Output`].
//!
//! ```
//! use quarry::query::{col, count_all, when};
//!
//! let adult = col("age").gte(18);
//! let bracket = when(col("age").lt(13), "child")
//!     .when(col("age").lt(20), "teen")
//!     .otherwise("adult");
//! let total = count_all();
//! # let _ = (adult, bracket, total);
//! ```

use crate::value::Value;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::ops;

/// A scalar expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Field reference as written by the caller: `name` or `table.name`
    Column(String),
    /// Resolved column of a table taking part in the query
    Field { table: String, column: String },
    /// Resolved reference to an annotation or aggregation by output name
    Output(String),
    /// Literal, always bound as a parameter
    Value(Value),
    Binary {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Neg(Box<Expr>),
    Case {
        branches: Vec<(Predicate, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn sql(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A boolean condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    In {
        expr: Expr,
        values: Vec<Value>,
    },
    Like {
        expr: Expr,
        pattern: Value,
    },
    IsNull(Expr),
    IsNotNull(Expr),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

/// A collection-level reduction.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    /// `COUNT(*)` when `expr` is `None`
    Count { expr: Option<Expr>, distinct: bool },
    Sum(Expr),
    Avg(Expr),
    Min(Expr),
    Max(Expr),
}

/// Reference a field by name (`"age"`) or qualified name (`"person.age"`).
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// A literal value.
pub fn val(value: impl Into<Value>) -> Expr {
    Expr::Value(value.into())
}

pub fn count_all() -> Reduction {
    Reduction::Count {
        expr: None,
        distinct: false,
    }
}

pub fn count(expr: impl Into<Expr>) -> Reduction {
    Reduction::Count {
        expr: Some(expr.into()),
        distinct: false,
    }
}

pub fn sum(expr: impl Into<Expr>) -> Reduction {
    Reduction::Sum(expr.into())
}

pub fn avg(expr: impl Into<Expr>) -> Reduction {
    Reduction::Avg(expr.into())
}

pub fn min(expr: impl Into<Expr>) -> Reduction {
    Reduction::Min(expr.into())
}

pub fn max(expr: impl Into<Expr>) -> Reduction {
    Reduction::Max(expr.into())
}

/// Start a `CASE WHEN` expression.
pub fn when(condition: Predicate, then: impl Into<Expr>) -> CaseBuilder {
    CaseBuilder {
        branches: vec![(condition, then.into())],
    }
}

pub struct CaseBuilder {
    branches: Vec<(Predicate, Expr)>,
}

impl CaseBuilder {
    #[must_use]
    pub fn when(mut self, condition: Predicate, then: impl Into<Expr>) -> Self {
        self.branches.push((condition, then.into()));
        self
    }

    pub fn otherwise(self, value: impl Into<Expr>) -> Expr {
        Expr::Case {
            branches: self.branches,
            otherwise: Some(Box::new(value.into())),
        }
    }

    /// Finish without an `ELSE` branch (unmatched rows yield NULL).
    pub fn end(self) -> Expr {
        Expr::Case {
            branches: self.branches,
            otherwise: None,
        }
    }
}

impl Expr {
    fn compare(self, op: CompareOp, right: impl Into<Expr>) -> Predicate {
        Predicate::Compare {
            left: self,
            op,
            right: right.into(),
        }
    }

    pub fn eq(self, right: impl Into<Expr>) -> Predicate {
        self.compare(CompareOp::Eq, right)
    }

    pub fn ne(self, right: impl Into<Expr>) -> Predicate {
        self.compare(CompareOp::Ne, right)
    }

    pub fn lt(self, right: impl Into<Expr>) -> Predicate {
        self.compare(CompareOp::Lt, right)
    }

    pub fn lte(self, right: impl Into<Expr>) -> Predicate {
        self.compare(CompareOp::Le, right)
    }

    pub fn gt(self, right: impl Into<Expr>) -> Predicate {
        self.compare(CompareOp::Gt, right)
    }

    pub fn gte(self, right: impl Into<Expr>) -> Predicate {
        self.compare(CompareOp::Ge, right)
    }

    pub fn is_in<I, V>(self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In {
            expr: self,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not_in<I, V>(self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        !self.is_in(values)
    }

    /// SQL `LIKE`; `%` and `_` in `pattern` are wildcards.
    pub fn like(self, pattern: impl Into<Value>) -> Predicate {
        Predicate::Like {
            expr: self,
            pattern: pattern.into(),
        }
    }

    pub fn is_null(self) -> Predicate {
        Predicate::IsNull(self)
    }

    pub fn is_not_null(self) -> Predicate {
        Predicate::IsNotNull(self)
    }

    fn binary(self, op: ArithOp, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    /// Visit every sub-expression, depth first (predicates inside `CASE`
    /// included).
    pub(crate) fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Neg(inner) => inner.walk(f),
            Expr::Case {
                branches,
                otherwise,
            } => {
                for (condition, then) in branches {
                    condition.walk(f);
                    then.walk(f);
                }
                if let Some(e) = otherwise {
                    e.walk(f);
                }
            }
            _ => {}
        }
    }
}

impl Predicate {
    #[must_use]
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    #[must_use]
    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub(crate) fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        match self {
            Predicate::Compare { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Predicate::In { expr, .. }
            | Predicate::Like { expr, .. }
            | Predicate::IsNull(expr)
            | Predicate::IsNotNull(expr) => expr.walk(f),
            Predicate::And(parts) | Predicate::Or(parts) => {
                for p in parts {
                    p.walk(f);
                }
            }
            Predicate::Not(inner) => inner.walk(f),
        }
    }
}

impl Reduction {
    /// Only meaningful for `COUNT`; other reductions are returned unchanged.
    #[must_use]
    pub fn distinct(self) -> Reduction {
        match self {
            Reduction::Count { expr, .. } => Reduction::Count {
                expr,
                distinct: true,
            },
            other => other,
        }
    }

    pub fn function(&self) -> &'static str {
        match self {
            Reduction::Count { .. } => "COUNT",
            Reduction::Sum(_) => "SUM",
            Reduction::Avg(_) => "AVG",
            Reduction::Min(_) => "MIN",
            Reduction::Max(_) => "MAX",
        }
    }

    pub fn argument(&self) -> Option<&Expr> {
        match self {
            Reduction::Count { expr, .. } => expr.as_ref(),
            Reduction::Sum(e) | Reduction::Avg(e) | Reduction::Min(e) | Reduction::Max(e) => {
                Some(e)
            }
        }
    }

    pub(crate) fn argument_mut(&mut self) -> Option<&mut Expr> {
        match self {
            Reduction::Count { expr, .. } => expr.as_mut(),
            Reduction::Sum(e) | Reduction::Avg(e) | Reduction::Min(e) | Reduction::Max(e) => {
                Some(e)
            }
        }
    }
}

impl ops::Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

macro_rules! impl_arith {
    ($($trait:ident $method:ident => $op:ident),*) => {
        $(
            impl<T: Into<Expr>> ops::$trait<T> for Expr {
                type Output = Expr;

                fn $method(self, rhs: T) -> Expr {
                    self.binary(ArithOp::$op, rhs.into())
                }
            }
        )*
    };
}

impl_arith!(Add add => Add, Sub sub => Sub, Mul mul => Mul, Div div => Div);

macro_rules! impl_expr_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Expr {
                fn from(v: $ty) -> Self {
                    Expr::Value(Value::from(v))
                }
            }
        )*
    };
}

impl_expr_from!(bool, i16, i32, i64, u8, u16, u32, f32, f64, Decimal, String, &str, NaiveDate, NaiveDateTime, Vec<u8>);

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Value(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_builders() {
        assert_eq!(
            col("age").gte(18),
            Predicate::Compare {
                left: Expr::Column("age".into()),
                op: CompareOp::Ge,
                right: Expr::Value(Value::Int(18)),
            }
        );
    }

    #[test]
    fn test_and_flattens() {
        let p = col("a").eq(1).and(col("b").eq(2)).and(col("c").eq(3));
        assert!(matches!(p, Predicate::And(parts) if parts.len() == 3));
    }

    #[test]
    fn test_arithmetic_operators() {
        let e = col("price") * 2 - col("discount");
        match e {
            Expr::Binary { op: ArithOp::Sub, left, .. } => {
                assert!(matches!(*left, Expr::Binary { op: ArithOp::Mul, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_walk_visits_case_branches() {
        let e = when(col("age").lt(13), col("name")).otherwise("adult");
        let mut seen = Vec::new();
        e.walk(&mut |node| {
            if let Expr::Column(name) = node {
                seen.push(name.clone());
            }
        });
        assert_eq!(seen, vec!["age".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_distinct_count() {
        assert_eq!(
            count(col("author_id")).distinct(),
            Reduction::Count {
                expr: Some(col("author_id")),
                distinct: true
            }
        );
    }
}
