//! Scripted driver shared by the integration tests.
//!
//! Connections record every operation into a [`Recorder`]; statements
//! replay [`Script`]s queued on the driver, one per created statement.

#![allow(dead_code)]

use dbsession::config::PoolOptions;
use dbsession::db::{
    BufferedCursor, CancelHandle, ConnectionManager, Cursor, DatabaseProduct, Driver, EventSink,
    PhysicalConnection, ProductRegistry, SqlWarning, Statement, StatementMode,
};
use dbsession::error::{DbError, DbResult};
use dbsession::models::{ColumnMetadata, ConnectionTarget, Credential, NamedParameter, ParamKind, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// One result a scripted statement produces.
#[derive(Debug, Clone)]
pub enum Outcome {
    Rows(Vec<i64>),
    Count(i64),
}

/// What the next created statement does.
#[derive(Debug, Default)]
pub struct Script {
    pub outcomes: Vec<Outcome>,
    /// Output values by ordinal
    pub outputs: BTreeMap<usize, Value>,
    /// Cursor parameter rows by ordinal
    pub cursors: BTreeMap<usize, Vec<i64>>,
    /// Block in execute until cancelled
    pub hang: bool,
    pub error: Option<DbError>,
}

impl Script {
    pub fn outcomes(outcomes: Vec<Outcome>) -> Self {
        Self {
            outcomes,
            ..Self::default()
        }
    }
}

/// An executed statement as seen by the driver.
#[derive(Debug, Clone)]
pub struct Executed {
    pub sql: String,
    pub mode: StatementMode,
    pub binds: BTreeMap<usize, Value>,
    pub outputs: BTreeMap<usize, ParamKind>,
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub ops: Mutex<Vec<String>>,
    pub executed: Mutex<Vec<Executed>>,
}

impl Recorder {
    fn op(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.executed.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct ScriptedDriver {
    pub recorder: Arc<Recorder>,
    scripts: Arc<Mutex<VecDeque<Script>>>,
    /// Password every logon must present; `None` accepts anything
    required_password: Option<String>,
    /// Cleared to make every handle report itself invalid
    pub healthy: Arc<AtomicBool>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self {
            recorder: Arc::new(Recorder::default()),
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            required_password: None,
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.required_password = Some(password.to_string());
        self
    }

    pub fn push_script(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }
}

#[async_trait::async_trait]
impl Driver for ScriptedDriver {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(
        &self,
        credential: &Credential,
        _target: &ConnectionTarget,
    ) -> DbResult<Box<dyn PhysicalConnection>> {
        if let Some(required) = &self.required_password {
            if &credential.password != required {
                return Err(DbError::connect_failure(
                    "password authentication failed",
                    "Verify the username and password",
                ));
            }
        }
        let number = self.recorder.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(ScriptedConnection {
            number,
            catalog: "main".to_string(),
            recorder: Arc::clone(&self.recorder),
            scripts: Arc::clone(&self.scripts),
            healthy: Arc::clone(&self.healthy),
            closed: false,
        }))
    }
}

struct ScriptedConnection {
    number: usize,
    catalog: String,
    recorder: Arc<Recorder>,
    scripts: Arc<Mutex<VecDeque<Script>>>,
    healthy: Arc<AtomicBool>,
    closed: bool,
}

#[async_trait::async_trait]
impl PhysicalConnection for ScriptedConnection {
    fn description(&self) -> Option<String> {
        Some(format!("scripted #{}", self.number))
    }

    async fn is_valid(&mut self) -> bool {
        !self.closed && self.healthy.load(Ordering::SeqCst)
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> DbResult<()> {
        self.recorder.op(format!("#{} auto_commit={}", self.number, enabled));
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.recorder.op(format!("#{} commit", self.number));
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.recorder.op(format!("#{} rollback", self.number));
        Ok(())
    }

    async fn catalog(&mut self) -> DbResult<Option<String>> {
        Ok(Some(self.catalog.clone()))
    }

    async fn set_catalog(&mut self, catalog: &str) -> DbResult<()> {
        self.recorder.op(format!("#{} catalog={}", self.number, catalog));
        self.catalog = catalog.to_string();
        Ok(())
    }

    async fn create_statement(
        &mut self,
        sql: &str,
        mode: StatementMode,
    ) -> DbResult<Box<dyn Statement>> {
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::new(ScriptedStatement {
            sql: sql.to_string(),
            mode,
            script,
            binds: BTreeMap::new(),
            outputs: BTreeMap::new(),
            current: None,
            pending: VecDeque::new(),
            recorder: Arc::clone(&self.recorder),
            cancel: Arc::new(NotifyCancel::default()),
        }))
    }

    async fn close(&mut self) -> DbResult<()> {
        if !self.closed {
            self.closed = true;
            self.recorder.closes.fetch_add(1, Ordering::SeqCst);
            self.recorder.op(format!("#{} close", self.number));
        }
        Ok(())
    }
}

#[derive(Default)]
struct NotifyCancel {
    notify: Notify,
    cancelled: AtomicBool,
}

#[async_trait::async_trait]
impl CancelHandle for NotifyCancel {
    async fn cancel(&self) -> DbResult<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_one();
        Ok(())
    }
}

struct ScriptedStatement {
    sql: String,
    mode: StatementMode,
    script: Script,
    binds: BTreeMap<usize, Value>,
    outputs: BTreeMap<usize, ParamKind>,
    current: Option<Outcome>,
    pending: VecDeque<Outcome>,
    recorder: Arc<Recorder>,
    cancel: Arc<NotifyCancel>,
}

fn int_cursor(values: Vec<i64>) -> Box<dyn Cursor> {
    Box::new(BufferedCursor::new(
        vec![ColumnMetadata::new("n", "int8", false)],
        values.into_iter().map(|v| vec![Value::Int(v)]).collect(),
    ))
}

#[async_trait::async_trait]
impl Statement for ScriptedStatement {
    fn cancel_handle(&self) -> Arc<dyn CancelHandle> {
        self.cancel.clone()
    }

    fn set_max_rows(&mut self, _max_rows: usize) -> DbResult<()> {
        Ok(())
    }

    fn bind(&mut self, ordinal: usize, value: Value) -> DbResult<()> {
        self.binds.insert(ordinal, value);
        Ok(())
    }

    fn register_output(&mut self, ordinal: usize, kind: ParamKind) -> DbResult<()> {
        self.outputs.insert(ordinal, kind);
        Ok(())
    }

    async fn execute(&mut self) -> DbResult<bool> {
        self.recorder.executed.lock().unwrap().push(Executed {
            sql: self.sql.clone(),
            mode: self.mode,
            binds: self.binds.clone(),
            outputs: self.outputs.clone(),
        });
        if self.script.hang {
            self.cancel.notify.notified().await;
            return Err(DbError::cancelled("statement execution"));
        }
        if let Some(error) = self.script.error.take() {
            return Err(error);
        }
        self.pending = std::mem::take(&mut self.script.outcomes).into();
        self.current = self.pending.pop_front();
        Ok(matches!(self.current, Some(Outcome::Rows(_))))
    }

    fn result_cursor(&mut self) -> Option<Box<dyn Cursor>> {
        match self.current.take() {
            Some(Outcome::Rows(values)) => Some(int_cursor(values)),
            other => {
                self.current = other;
                None
            }
        }
    }

    fn update_count(&self) -> i64 {
        match self.current {
            Some(Outcome::Count(n)) => n,
            _ => -1,
        }
    }

    async fn more_results(&mut self) -> DbResult<bool> {
        self.current = self.pending.pop_front();
        Ok(matches!(self.current, Some(Outcome::Rows(_))))
    }

    fn output_value(&mut self, ordinal: usize) -> DbResult<Value> {
        Ok(self.script.outputs.get(&ordinal).cloned().unwrap_or(Value::Null))
    }

    async fn output_cursor(&mut self, ordinal: usize) -> DbResult<Option<Box<dyn Cursor>>> {
        Ok(self.script.cursors.remove(&ordinal).map(int_cursor))
    }

    fn take_warnings(&mut self) -> Vec<SqlWarning> {
        Vec::new()
    }

    async fn close(&mut self) -> DbResult<()> {
        self.recorder.op("statement close");
        Ok(())
    }
}

/// Product that returns cursors through output parameters.
pub struct CursorProduct;

#[async_trait::async_trait]
impl DatabaseProduct for CursorProduct {
    fn name(&self) -> &str {
        "cursor-test"
    }

    fn bind_parameter(
        &self,
        statement: &mut dyn Statement,
        parameter: &NamedParameter,
        ordinal: usize,
    ) -> DbResult<()> {
        if parameter.is_cursor() {
            return statement.register_output(ordinal, ParamKind::Cursor);
        }
        if parameter.is_output() {
            statement.register_output(ordinal, parameter.kind)?;
        }
        statement.bind(ordinal, dbsession::db::product::convert_parameter(parameter)?)
    }

    async fn cursor_for(
        &self,
        statement: &mut dyn Statement,
        _parameter: &NamedParameter,
        ordinal: usize,
    ) -> DbResult<Option<Box<dyn Cursor>>> {
        statement.output_cursor(ordinal).await
    }
}

pub fn target(name: &str, options: PoolOptions) -> ConnectionTarget {
    ConnectionTarget::new(name, format!("sqlite:{name}.db"), options).unwrap()
}

pub fn manager(driver: &Arc<ScriptedDriver>) -> Arc<ConnectionManager> {
    ConnectionManager::new(
        driver.clone(),
        ProductRegistry::with_builtins(),
        EventSink::new(),
    )
}
