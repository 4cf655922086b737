//! Advisory-lock based mutual exclusion between migration runs

use crate::error::ExecutionError;
use crate::executor::Executor;
use crate::value::Value;
use std::time::Duration;

/// Transaction-scoped PostgreSQL advisory lock
///
/// The lock is taken with `pg_advisory_xact_lock`, so it is released by the
/// commit or rollback that ends the enclosing transaction; there is nothing
/// to release by hand. Acquiring outside a transaction holds the lock only
/// for that single statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationLock {
    key: i64,
    timeout: Duration,
}

impl MigrationLock {
    pub fn new(key: i64, timeout: Duration) -> Self {
        Self { key, timeout }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Block until the lock is held by the current transaction
    ///
    /// Waiting is bounded by `lock_timeout`, set for the current transaction
    /// only.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the timeout expires (SQLSTATE `55P03`)
    /// or the statement fails.
    pub fn acquire(&self, executor: &dyn Executor) -> Result<(), ExecutionError> {
        log::debug!("acquiring migration lock {}", self.key);
        executor.execute(
            &format!("SET LOCAL lock_timeout = '{}ms'", self.timeout.as_millis()),
            &[],
        )?;
        executor.execute("SELECT pg_advisory_xact_lock($1)", &[Value::Int(self.key)])?;
        Ok(())
    }
}

impl Default for MigrationLock {
    fn default() -> Self {
        Self::new(0x7175_6172_7279, Duration::from_secs(60))
    }
}
