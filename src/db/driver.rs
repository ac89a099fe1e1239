//! Driver abstraction consumed by the engine.
//!
//! The engine never speaks a wire protocol itself. A [`Driver`] opens
//! [`PhysicalConnection`]s, which create [`Statement`]s, which expose
//! [`Cursor`]s over result rows. All of them are object-safe so that pools
//! and sessions can hold `Box<dyn ...>` handles regardless of the backend.

use crate::error::DbResult;
use crate::models::{ColumnMetadata, ConnectionTarget, Credential, ParamKind, Value};
use std::collections::VecDeque;
use std::sync::Arc;

/// How a statement is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementMode {
    /// Executed as-is, without binding
    Plain,
    /// Prepared with positional placeholders and output registration
    Callable,
}

/// A warning reported by the server alongside a statement or cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlWarning {
    pub message: String,
    pub sql_state: Option<String>,
    pub code: i32,
}

impl SqlWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
            code: 0,
        }
    }

    pub fn with_state(mut self, sql_state: impl Into<String>, code: i32) -> Self {
        self.sql_state = Some(sql_state.into());
        self.code = code;
        self
    }
}

/// Factory for physical connections.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Short driver name used in logs.
    fn name(&self) -> &str;

    /// Establish a new physical connection for the credential.
    ///
    /// Fails with `ConnectFailure` when the server rejects the attempt.
    async fn connect(
        &self,
        credential: &Credential,
        target: &ConnectionTarget,
    ) -> DbResult<Box<dyn PhysicalConnection>>;
}

/// One physical database handle.
#[async_trait::async_trait]
pub trait PhysicalConnection: Send + Sync {
    /// Human-readable description, e.g. the server version.
    fn description(&self) -> Option<String> {
        None
    }

    /// Check that the handle can still talk to the server.
    async fn is_valid(&mut self) -> bool;

    async fn set_auto_commit(&mut self, enabled: bool) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    async fn catalog(&mut self) -> DbResult<Option<String>>;

    async fn set_catalog(&mut self, catalog: &str) -> DbResult<()>;

    /// Create a statement for the given text. The statement must not borrow
    /// the connection; it is executed after the connection lock is released.
    async fn create_statement(
        &mut self,
        sql: &str,
        mode: StatementMode,
    ) -> DbResult<Box<dyn Statement>>;

    async fn close(&mut self) -> DbResult<()>;
}

/// Cancels an executing statement from another task.
#[async_trait::async_trait]
pub trait CancelHandle: Send + Sync {
    async fn cancel(&self) -> DbResult<()>;
}

/// A statement and the sequence of results it produced.
///
/// After `execute`, the statement is positioned on its first result. When
/// that result is a cursor, `result_cursor` hands it over; otherwise
/// `update_count` reports it. `more_results` advances to the next result
/// and returns whether it is a cursor. `update_count` is negative once the
/// current result is a cursor or there are no results left.
#[async_trait::async_trait]
pub trait Statement: Send {
    fn cancel_handle(&self) -> Arc<dyn CancelHandle>;

    fn set_max_rows(&mut self, max_rows: usize) -> DbResult<()>;

    /// Bind a value at a 1-based ordinal.
    fn bind(&mut self, ordinal: usize, value: Value) -> DbResult<()>;

    /// Register an output parameter at a 1-based ordinal.
    fn register_output(&mut self, ordinal: usize, kind: ParamKind) -> DbResult<()>;

    /// Execute; returns true when the first result is a cursor.
    async fn execute(&mut self) -> DbResult<bool>;

    /// Take the cursor for the current result, if it is one.
    fn result_cursor(&mut self) -> Option<Box<dyn Cursor>>;

    fn update_count(&self) -> i64;

    async fn more_results(&mut self) -> DbResult<bool>;

    fn output_value(&mut self, ordinal: usize) -> DbResult<Value>;

    async fn output_cursor(&mut self, ordinal: usize) -> DbResult<Option<Box<dyn Cursor>>>;

    /// Drain pending warnings.
    fn take_warnings(&mut self) -> Vec<SqlWarning>;

    async fn close(&mut self) -> DbResult<()>;
}

/// Forward-only iterator over result rows.
#[async_trait::async_trait]
pub trait Cursor: Send {
    fn columns(&self) -> Vec<ColumnMetadata>;

    async fn next_row(&mut self) -> DbResult<Option<Vec<Value>>>;

    fn take_warnings(&mut self) -> Vec<SqlWarning> {
        Vec::new()
    }

    async fn close(&mut self) -> DbResult<()>;
}

/// A cursor over rows already held in memory.
#[derive(Debug, Default)]
pub struct BufferedCursor {
    columns: Vec<ColumnMetadata>,
    rows: VecDeque<Vec<Value>>,
    warnings: Vec<SqlWarning>,
    closed: bool,
}

impl BufferedCursor {
    pub fn new(columns: Vec<ColumnMetadata>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
            warnings: Vec::new(),
            closed: false,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<SqlWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait::async_trait]
impl Cursor for BufferedCursor {
    fn columns(&self) -> Vec<ColumnMetadata> {
        self.columns.clone()
    }

    async fn next_row(&mut self) -> DbResult<Option<Vec<Value>>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.rows.pop_front())
    }

    fn take_warnings(&mut self) -> Vec<SqlWarning> {
        std::mem::take(&mut self.warnings)
    }

    async fn close(&mut self) -> DbResult<()> {
        self.closed = true;
        self.rows.clear();
        Ok(())
    }
}
