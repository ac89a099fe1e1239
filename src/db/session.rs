//! Sessions: exclusive, single-owner handles over a credential pool.
//!
//! A session holds at most one connection at a time. Callers `grab` it,
//! run their statements, then `release` it. Work that needs the connection
//! while someone else has grabbed it (commit, rollback, catalog changes) is
//! queued and runs, in order, when the holder releases.

use crate::db::connection::Connection;
use crate::db::events::SessionEvent;
use crate::db::pool::CredentialPool;
use crate::db::product::DatabaseProduct;
use crate::error::{DbError, DbResult};
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

type TaskFn = Box<dyn for<'c> FnOnce(&'c Connection) -> BoxFuture<'c, DbResult<()>> + Send>;

/// Work that needs the session's connection.
pub struct SessionTask {
    name: String,
    run: TaskFn,
}

impl std::fmt::Debug for SessionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTask")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SessionTask {
    /// Wrap a closure. The closure boxes its future, e.g.
    /// `SessionTask::new("vacuum", |c| Box::pin(async move { ... }))`.
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: for<'c> FnOnce(&'c Connection) -> BoxFuture<'c, DbResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    pub fn commit() -> Self {
        Self::new("commit", |c| Box::pin(c.commit()))
    }

    pub fn rollback() -> Self {
        Self::new("rollback", |c| Box::pin(c.rollback()))
    }

    pub fn set_catalog(product: Arc<dyn DatabaseProduct>, catalog: String) -> Self {
        Self::new("set catalog", move |c| {
            Box::pin(async move { product.set_catalog(c, &catalog).await })
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn run(self, connection: &Connection) -> DbResult<()> {
        (self.run)(connection).await
    }
}

struct SessionState {
    connection: Option<Arc<Connection>>,
    in_use: bool,
    /// Retain the connection even in auto-commit mode
    keep_connection: bool,
    auto_commit: bool,
    commit_on_close: bool,
    last_catalog: Option<String>,
    default_catalog: Option<String>,
    queued: VecDeque<SessionTask>,
    closed: bool,
}

/// A logical client handle bound to one credential pool.
pub struct Session {
    id: Uuid,
    pool: Arc<CredentialPool>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pool", &self.pool.description())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(pool: Arc<CredentialPool>) -> Self {
        let state = SessionState {
            connection: None,
            in_use: false,
            keep_connection: false,
            auto_commit: pool.auto_commit(),
            commit_on_close: pool.commit_on_close(),
            last_catalog: None,
            default_catalog: None,
            queued: VecDeque::new(),
            closed: false,
        };
        Self {
            id: Uuid::new_v4(),
            pool,
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn product(&self) -> Arc<dyn DatabaseProduct> {
        self.pool.product()
    }

    // ========================================================================
    // Grab / release
    // ========================================================================

    /// Take exclusive use of the session's connection, acquiring one from
    /// the pool if the session does not hold one.
    pub async fn grab(&self) -> DbResult<Arc<Connection>> {
        let mut state = self.state.lock().await;
        self.grab_locked(&mut state).await
    }

    /// Give the connection back. Queued tasks run first, in order.
    pub async fn release(&self, connection: &Arc<Connection>) -> DbResult<()> {
        let mut state = self.state.lock().await;
        self.release_locked(&mut state, connection).await
    }

    async fn grab_locked(&self, state: &mut SessionState) -> DbResult<Arc<Connection>> {
        if state.closed {
            error!(session_id = %self.id, "Grab on a closed session");
            return Err(DbError::invalid_state("Session invalid (closed)"));
        }
        if state.in_use {
            error!(session_id = %self.id, "Grab while the connection is already in use");
            return Err(DbError::invalid_state(
                "Cannot grab a new connection - already in use",
            ));
        }

        if let Some(held) = state.connection.clone() {
            if !held.is_alive().await {
                warn!(session_id = %self.id, connection_id = %held.id(), "Held connection is stale");
                state.connection = None;
                self.pool.dispose(&held).await;
            }
        }

        let connection = match state.connection.clone() {
            Some(held) => {
                // Modes may have changed while the connection sat idle.
                held.set_auto_commit(state.auto_commit).await?;
                held.set_commit_on_close(state.commit_on_close);
                held
            }
            None => {
                let fresh = self.pool.acquire().await?;
                if let Err(e) = self.attach(state, &fresh).await {
                    self.pool.dispose(&fresh).await;
                    return Err(e);
                }
                state.connection = Some(Arc::clone(&fresh));
                fresh
            }
        };

        state.in_use = true;
        debug!(session_id = %self.id, connection_id = %connection.id(), "Connection grabbed");
        Ok(connection)
    }

    /// Bind a freshly acquired connection: restore the session's catalog
    /// and transaction modes on it.
    async fn attach(&self, state: &mut SessionState, connection: &Connection) -> DbResult<()> {
        connection.set_session(Some(self.id));
        let product = self.pool.product();

        if state.default_catalog.is_none() || state.last_catalog.is_none() {
            match product.current_catalog(connection).await {
                Ok(current) => {
                    if state.default_catalog.is_none() {
                        state.default_catalog = current.clone();
                    }
                    if state.last_catalog.is_none() {
                        state.last_catalog = current;
                    }
                }
                Err(e) => warn!(session_id = %self.id, error = %e, "Cannot read current catalog"),
            }
        }
        if let Some(catalog) = &state.last_catalog {
            if state.last_catalog != state.default_catalog {
                if let Err(e) = product.set_catalog(connection, catalog).await {
                    warn!(session_id = %self.id, catalog = %catalog, error = %e, "Cannot restore catalog");
                }
            }
        }

        connection.set_auto_commit(state.auto_commit).await?;
        connection.set_commit_on_close(state.commit_on_close);
        Ok(())
    }

    async fn release_locked(
        &self,
        state: &mut SessionState,
        connection: &Arc<Connection>,
    ) -> DbResult<()> {
        if state.closed {
            // The session was closed while the caller held the connection;
            // it has already been disposed.
            debug!(session_id = %self.id, "Release after close ignored");
            return Ok(());
        }
        if !state.in_use {
            error!(session_id = %self.id, "Release while not in use");
            return Err(DbError::invalid_state(
                "Cannot release connection - not in use",
            ));
        }
        let held = match &state.connection {
            Some(held) if held.id() == connection.id() => Arc::clone(held),
            _ => {
                error!(session_id = %self.id, connection_id = %connection.id(), "Release of a connection not held");
                return Err(DbError::invalid_state(
                    "Attempt to release the wrong connection",
                ));
            }
        };

        while let Some(task) = state.queued.pop_front() {
            let name = task.name().to_string();
            if let Err(e) = task.run(&held).await {
                warn!(session_id = %self.id, task = %name, error = %e, "Failed running queued task");
            }
        }
        state.in_use = false;

        if let Some(previous) = state.last_catalog.clone() {
            match self.pool.product().current_catalog(&held).await {
                Ok(current) if current.as_deref() != Some(previous.as_str()) => {
                    state.last_catalog = current.clone();
                    self.pool.events().emit(SessionEvent::CatalogChanged {
                        session_id: self.id,
                        previous: Some(previous),
                        current,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!(session_id = %self.id, error = %e, "Cannot read current catalog"),
            }
        }

        match held.set_auto_commit(state.auto_commit).await {
            Ok(()) => {
                held.set_commit_on_close(state.commit_on_close);
                if !state.auto_commit || state.keep_connection {
                    debug!(session_id = %self.id, connection_id = %held.id(), "Connection retained by session");
                    return Ok(());
                }
            }
            Err(e) => warn!(session_id = %self.id, error = %e, "Cannot apply auto-commit mode"),
        }

        self.return_to_pool(state).await;
        Ok(())
    }

    /// Give the held connection back to the pool, restoring its default
    /// catalog first. Failures are logged.
    async fn return_to_pool(&self, state: &mut SessionState) {
        let Some(connection) = state.connection.take() else {
            return;
        };

        if let Some(default) = &state.default_catalog {
            if state.last_catalog.as_ref() != Some(default) && !connection.is_broken() {
                if let Err(e) = self.pool.product().set_catalog(&connection, default).await {
                    warn!(session_id = %self.id, error = %e, "Cannot reset catalog before release");
                }
            }
        }

        connection.set_session(None);
        if let Err(e) = self.pool.release(&connection).await {
            warn!(session_id = %self.id, connection_id = %connection.id(), error = %e, "Cannot release connection");
        }
        debug!(session_id = %self.id, connection_id = %connection.id(), "Connection returned to pool");
    }

    // ========================================================================
    // Deferred tasks
    // ========================================================================

    /// Run a task against the connection now if it is idle, or when the
    /// current holder releases it.
    pub async fn queue_task(&self, task: SessionTask) -> DbResult<()> {
        let mut state = self.state.lock().await;
        self.queue_task_locked(&mut state, task).await
    }

    async fn queue_task_locked(&self, state: &mut SessionState, task: SessionTask) -> DbResult<()> {
        if state.closed {
            return Err(DbError::invalid_state("Session invalid (closed)"));
        }

        if state.in_use {
            debug!(session_id = %self.id, task = %task.name(), "Connection in use, task deferred");
            state.queued.push_back(task);
            return Ok(());
        }

        if let Some(connection) = state.connection.clone() {
            return task.run(&connection).await;
        }

        // No connection: grab one just for this task.
        let connection = self.grab_locked(state).await?;
        let result = task.run(&connection).await;
        let released = self.release_locked(state, &connection).await;
        result.and(released)
    }

    pub async fn commit(&self) -> DbResult<()> {
        self.queue_task(SessionTask::commit()).await
    }

    pub async fn rollback(&self) -> DbResult<()> {
        self.queue_task(SessionTask::rollback()).await
    }

    /// Switch catalog. Remembered for later connections even when no
    /// connection is currently held.
    pub async fn set_catalog(&self, catalog: &str) -> DbResult<()> {
        let mut state = self.state.lock().await;
        state.last_catalog = Some(catalog.to_string());
        if state.connection.is_none() {
            return Ok(());
        }
        let task = SessionTask::set_catalog(self.pool.product(), catalog.to_string());
        self.queue_task_locked(&mut state, task).await
    }

    /// Last known catalog.
    pub async fn catalog(&self) -> Option<String> {
        self.state.lock().await.last_catalog.clone()
    }

    // ========================================================================
    // Modes
    // ========================================================================

    pub async fn auto_commit(&self) -> bool {
        self.state.lock().await.auto_commit
    }

    /// Change auto-commit. Turning it on while holding an idle connection
    /// ends the open transaction (per commit-on-close) and returns the
    /// connection to the pool.
    pub async fn set_auto_commit(&self, enabled: bool) -> DbResult<()> {
        let mut state = self.state.lock().await;
        let enabling = !state.auto_commit && enabled;
        state.auto_commit = enabled;

        if enabling && !state.in_use {
            if let Some(connection) = state.connection.clone() {
                let ended = if state.commit_on_close {
                    connection.commit().await
                } else {
                    connection.rollback().await
                };
                if let Err(e) = ended {
                    warn!(session_id = %self.id, error = %e, "Cannot end transaction");
                    connection.mark_broken();
                } else if let Err(e) = connection.set_auto_commit(true).await {
                    warn!(session_id = %self.id, error = %e, "Cannot enable auto-commit");
                    connection.mark_broken();
                }
                self.return_to_pool(&mut state).await;
            }
        }
        Ok(())
    }

    pub async fn commit_on_close(&self) -> bool {
        self.state.lock().await.commit_on_close
    }

    pub async fn set_commit_on_close(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        state.commit_on_close = enabled;
        if let Some(connection) = &state.connection {
            connection.set_commit_on_close(enabled);
        }
    }

    pub async fn keep_connection(&self) -> bool {
        self.state.lock().await.keep_connection
    }

    /// Retain the connection between grabs even in auto-commit mode.
    pub async fn set_keep_connection(&self, keep: bool) {
        let mut state = self.state.lock().await;
        state.keep_connection = keep;
        if !keep && state.auto_commit && !state.in_use {
            self.return_to_pool(&mut state).await;
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub async fn is_valid(&self) -> bool {
        !self.state.lock().await.closed
    }

    pub async fn is_connection_in_use(&self) -> bool {
        self.state.lock().await.in_use
    }

    /// Whether the session currently holds a connection, grabbed or not.
    pub async fn has_connection(&self) -> bool {
        self.state.lock().await.connection.is_some()
    }

    /// Drop the held connection without pooling it. Pending work is
    /// rolled back.
    pub async fn dispose_connection(&self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        if state.in_use {
            error!(session_id = %self.id, "Dispose while the connection is in use");
            return Err(DbError::invalid_state(
                "Cannot dispose the connection while it is still in use",
            ));
        }
        if let Some(connection) = state.connection.take() {
            if !connection.auto_commit() {
                if let Err(e) = connection.rollback().await {
                    warn!(session_id = %self.id, error = %e, "Rollback before dispose failed");
                }
            }
            self.pool.dispose(&connection).await;
        }
        Ok(())
    }

    /// Close the session. A connection still in use is disposed, since its
    /// state is unknown; an idle one goes back through the normal release
    /// path. Closing twice is a no-op.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            if state.in_use {
                if let Some(connection) = state.connection.take() {
                    warn!(session_id = %self.id, connection_id = %connection.id(), "Closing session while connection in use, disposing");
                    self.pool.dispose(&connection).await;
                }
                state.in_use = false;
            } else {
                self.return_to_pool(&mut state).await;
            }
            if !state.queued.is_empty() {
                warn!(session_id = %self.id, dropped = state.queued.len(), "Dropping queued tasks on close");
                state.queued.clear();
            }
            state.closed = true;
        }
        self.pool.unlink_session(self.id).await;
    }
}
