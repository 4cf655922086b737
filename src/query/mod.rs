//! Query building, compilation and execution.
//!
//! - [`builder`]: the immutable [`Query`] builder and field resolution
//! - [`expr`]: expression, predicate and reduction trees
//! - [`compiler`]: rendering to parameterized PostgreSQL
//! - [`write`]: [`Insert`], [`Update`] and [`Delete`]
//! - [`record`]: ordered result rows
//!
//! # Examples
//!
//! ```
//! use quarry::query::{col, count_all, Query};
//! use quarry::schema::{Column, Schema, Table};
//! use quarry::Value;
//! use std::sync::Arc;
//!
//! let mut schema = Schema::new();
//! schema.define_table(
//!     Table::new("person")
//!         .column(Column::integer("id"))
//!         .column(Column::integer("age"))
//!         .primary_key(&["id"]),
//! )?;
//!
//! let compiled = Query::new(Arc::new(schema), "person")?
//!     .filter(col("age").gte(18))?
//!     .aggregate("count", count_all())?
//!     .compile()?;
//! assert_eq!(
//!     compiled.sql,
//!     r#"SELECT COUNT(*) AS "count" FROM "person" WHERE "person"."age" >= $1"#
//! );
//! assert_eq!(compiled.params, vec![Value::Int(18)]);
//! # Ok::<(), quarry::Error>(())
//! ```

pub mod builder;
pub mod compiler;
pub mod expr;
pub mod record;
pub mod write;

pub use builder::{Join, JoinKind, OrderBy, Query};
pub use compiler::{compile, quote_ident, CompiledQuery};
pub use expr::{
    avg, col, count, count_all, max, min, sum, val, when, ArithOp, CaseBuilder, CompareOp, Expr,
    Predicate, Reduction,
};
pub use record::Record;
pub use write::{Delete, Insert, Update};
