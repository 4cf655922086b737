//! In-memory connection double.
//!
//! [`MockConnection`] implements [`Connection`] without a database. It keeps
//! a journal of every statement, tracks which writes would be durable by
//! replaying transaction and savepoint semantics over per-frame buffers, and
//! can be scripted to fail or to return canned rows.
//!
//! ```
//! use quarry::mock::MockConnection;
//! use quarry::query::Record;
//! use quarry::Executor;
//!
//! let conn = MockConnection::new();
//! conn.on_query("FROM person", vec![Record::new().with("count", 2)]);
//! conn.fail_on("INSERT INTO audit", "permission denied");
//!
//! let rows = conn.query(r#"SELECT COUNT(*) AS "count" FROM person"#, &[]).unwrap();
//! assert_eq!(rows[0].get("count").and_then(|v| v.as_i64()), Some(2));
//! assert!(conn.execute("INSERT INTO audit VALUES (1)", &[]).is_err());
//! ```

use crate::error::ExecutionError;
use crate::executor::{Connection, Executor};
use crate::query::compiler::quote_ident;
use crate::query::Record;
use crate::value::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// A statement as issued, with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Default)]
struct Frame {
    /// `None` for the outer transaction
    savepoint: Option<String>,
    writes: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    committed: Vec<String>,
    frames: Vec<Frame>,
    failures: Vec<(String, String)>,
    results: Vec<(String, VecDeque<Vec<Record>>)>,
    affected: Vec<(String, u64)>,
}

impl State {
    fn issue(&mut self, sql: &str, params: &[Value]) -> Result<(), ExecutionError> {
        self.calls.push(Call {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        match self.failures.iter().find(|(pattern, _)| sql.contains(pattern.as_str())) {
            Some((_, message)) => Err(ExecutionError::Other(message.clone())),
            None => Ok(()),
        }
    }

    fn frame_index(&self, savepoint: &str) -> Result<usize, ExecutionError> {
        self.frames
            .iter()
            .rposition(|f| f.savepoint.as_deref() == Some(savepoint))
            .ok_or_else(|| ExecutionError::Other(format!("savepoint \"{savepoint}\" does not exist")))
    }

    fn require_transaction(&self) -> Result<(), ExecutionError> {
        if self.frames.is_empty() {
            return Err(ExecutionError::Other("no transaction is in progress".to_string()));
        }
        Ok(())
    }
}

/// Scriptable in-memory [`Connection`].
///
/// Outside a transaction every `execute` is committed immediately. Inside
/// one, writes are buffered per savepoint frame: `rollback_to` discards the
/// frame's writes and everything above it, `release` folds the frame into
/// its parent, `commit` makes the whole stack durable.
#[derive(Debug, Default)]
pub struct MockConnection {
    state: Mutex<State>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test must not hide the journal from later assertions.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_on(&self, pattern: &str, message: &str) {
        self.lock()
            .failures
            .push((pattern.to_string(), message.to_string()));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Queue `rows` for the next query containing `pattern`.
    ///
    /// Results for one pattern are served in order; the last one keeps
    /// being returned once the queue is down to it. Queries with no
    /// matching script return no rows.
    pub fn on_query(&self, pattern: &str, rows: Vec<Record>) {
        let mut guard = self.lock();
        let state = &mut *guard;
        match state.results.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, queue)) => queue.push_back(rows),
            None => state
                .results
                .push((pattern.to_string(), VecDeque::from([rows]))),
        }
    }

    /// Report `affected` rows for statements containing `pattern`.
    pub fn on_execute(&self, pattern: &str, affected: u64) {
        self.lock().affected.push((pattern.to_string(), affected));
    }

    /// Every statement issued, in order, including transaction control.
    pub fn statements(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.sql.clone()).collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Writes that would be durable: autocommitted or part of a committed
    /// transaction, minus anything rolled back.
    pub fn committed_statements(&self) -> Vec<String> {
        self.lock().committed.clone()
    }

    pub fn in_transaction(&self) -> bool {
        !self.lock().frames.is_empty()
    }

    /// Forget the journal and durable writes; scripts stay in place.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.calls.clear();
        state.committed.clear();
        state.frames.clear();
    }
}

impl Executor for MockConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, ExecutionError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.issue(sql, params)?;
        match state.frames.last_mut() {
            Some(frame) => frame.writes.push(sql.to_string()),
            None => state.committed.push(sql.to_string()),
        }
        Ok(state
            .affected
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map_or(0, |(_, n)| *n))
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>, ExecutionError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.issue(sql, params)?;
        let scripted = state
            .results
            .iter_mut()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .and_then(|(_, queue)| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            });
        Ok(scripted.unwrap_or_default())
    }
}

impl Connection for MockConnection {
    fn begin(&self) -> Result<(), ExecutionError> {
        let mut state = self.lock();
        state.issue("BEGIN", &[])?;
        if !state.frames.is_empty() {
            return Err(ExecutionError::Other(
                "a transaction is already in progress".to_string(),
            ));
        }
        state.frames.push(Frame::default());
        Ok(())
    }

    fn savepoint(&self, name: &str) -> Result<(), ExecutionError> {
        let mut state = self.lock();
        state.issue(&format!("SAVEPOINT {}", quote_ident(name)), &[])?;
        state.require_transaction()?;
        state.frames.push(Frame {
            savepoint: Some(name.to_string()),
            writes: Vec::new(),
        });
        Ok(())
    }

    fn release(&self, name: &str) -> Result<(), ExecutionError> {
        let mut state = self.lock();
        state.issue(&format!("RELEASE SAVEPOINT {}", quote_ident(name)), &[])?;
        let index = state.frame_index(name)?;
        let released: Vec<String> = state
            .frames
            .drain(index..)
            .flat_map(|f| f.writes)
            .collect();
        if let Some(parent) = state.frames.last_mut() {
            parent.writes.extend(released);
        }
        Ok(())
    }

    fn rollback_to(&self, name: &str) -> Result<(), ExecutionError> {
        let mut state = self.lock();
        state.issue(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)), &[])?;
        let index = state.frame_index(name)?;
        state.frames.truncate(index + 1);
        if let Some(frame) = state.frames.last_mut() {
            frame.writes.clear();
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), ExecutionError> {
        let mut state = self.lock();
        state.issue("COMMIT", &[])?;
        state.require_transaction()?;
        let writes: Vec<String> = state.frames.drain(..).flat_map(|f| f.writes).collect();
        state.committed.extend(writes);
        Ok(())
    }

    fn rollback(&self) -> Result<(), ExecutionError> {
        let mut state = self.lock();
        state.issue("ROLLBACK", &[])?;
        state.frames.clear();
        Ok(())
    }
}
