//! # Quarry
//!
//! Schema-aware query compiler, migration planner and transaction manager
//! for PostgreSQL on the `may` coroutine runtime.
//!
//! - [`schema`]: tables, columns, constraints and relationships, validated
//!   as a whole
//! - [`query`]: immutable query builder compiled to parameterized SQL, plus
//!   insert/update/delete statements with validators
//! - [`migration`]: snapshot diffing, chained batch artifacts and an
//!   atomic, advisory-locked executor
//! - [`transaction`]: nested atomic scopes on savepoints
//!
//! Everything runs through the [`Executor`] and [`Connection`] traits;
//! [`PostgresConnection`] implements them over `may_postgres` and
//! [`MockConnection`] in memory.
//!
//! ```rust
//! use quarry::query::{col, count_all, Query};
//! use quarry::schema::{Column, Schema, Table};
//! use quarry::{MockConnection, Record};
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
//! let conn = MockConnection::new();
//! conn.on_query("FROM \"person\"", vec![Record::new().with("count", 3)]);
//!
//! let rows = Query::new(Arc::new(schema), "person")?
//!     .filter(col("age").gte(18))?
//!     .aggregate("count", count_all())?
//!     .fetch(&conn)?;
//! assert_eq!(rows[0].get("count").and_then(|v| v.as_i64()), Some(3));
//! # Ok::<(), quarry::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod executor;
#[cfg(any(feature = "metrics", feature = "tracing"))]
pub mod metrics;
pub mod migration;
pub mod mock;
pub mod postgres;
pub mod query;
pub mod schema;
pub mod transaction;
pub mod value;

pub use config::QuarryConfig;
pub use error::{
    CompileError, Error, ExecutionError, MigrationError, QueryError, Result, SchemaError,
    SchemaViolation, TransactionError, ValidationError,
};
pub use executor::{Connection, Executor};
pub use migration::{
    MigrationBatch, MigrationOperation, MigrationPlan, MigrationPlanner, Migrator, RenamePolicy,
};
pub use mock::MockConnection;
pub use postgres::PostgresConnection;
pub use query::{Delete, Insert, Query, Record, Update};
pub use schema::Schema;
pub use transaction::{atomic, atomic_with, IsolationLevel, Transaction};
pub use value::Value;
