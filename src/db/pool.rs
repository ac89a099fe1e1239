//! Credential pools.
//!
//! A [`CredentialPool`] owns the physical connections opened with one
//! username/password against one target: a bounded queue of idle
//! connections plus the list of connections currently handed out. It also
//! tracks the sessions created for that credential.

use crate::db::connection::Connection;
use crate::db::driver::Driver;
use crate::db::events::{EventSink, SessionEvent};
use crate::db::product::DatabaseProduct;
use crate::db::session::Session;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionTarget, Credential};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct PoolState {
    idle: VecDeque<Arc<Connection>>,
    allocated: Vec<Arc<Connection>>,
    sessions: HashMap<Uuid, Weak<Session>>,
    closed: bool,
}

impl PoolState {
    fn take_allocated(&mut self, connection: &Connection) -> bool {
        match self
            .allocated
            .iter()
            .position(|c| c.id() == connection.id())
        {
            Some(idx) => {
                self.allocated.remove(idx);
                true
            }
            None => false,
        }
    }
}

/// Pool of physical connections for one credential.
pub struct CredentialPool {
    target: ConnectionTarget,
    credential: Credential,
    driver: Arc<dyn Driver>,
    product: Arc<dyn DatabaseProduct>,
    events: EventSink,
    max_idle: usize,
    auto_commit: AtomicBool,
    commit_on_close: AtomicBool,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("target", &self.target.name)
            .field("credential", &self.credential)
            .field("driver", &self.driver.name())
            .field("product", &self.product.name())
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}

impl CredentialPool {
    /// Create a pool. Idle bound and default transaction modes come from
    /// the target's pool options.
    pub fn new(
        target: ConnectionTarget,
        credential: Credential,
        driver: Arc<dyn Driver>,
        product: Arc<dyn DatabaseProduct>,
        events: EventSink,
    ) -> Arc<Self> {
        let options = &target.pool_options;
        let max_idle = options.max_idle_or_default().max(1);
        let auto_commit = options.auto_commit_or_default();
        let commit_on_close = options.commit_on_close_or_default();
        Arc::new(Self {
            target,
            credential,
            driver,
            product,
            events,
            max_idle,
            auto_commit: AtomicBool::new(auto_commit),
            commit_on_close: AtomicBool::new(commit_on_close),
            state: Mutex::new(PoolState::default()),
        })
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn username(&self) -> &str {
        &self.credential.username
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// "target/username", for display.
    pub fn description(&self) -> String {
        format!("{}/{}", self.target.name, self.credential.username)
    }

    pub fn product(&self) -> Arc<dyn DatabaseProduct> {
        Arc::clone(&self.product)
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn max_idle(&self) -> usize {
        self.max_idle
    }

    /// Default auto-commit mode for new sessions.
    pub fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::SeqCst)
    }

    pub fn set_auto_commit(&self, enabled: bool) {
        self.auto_commit.store(enabled, Ordering::SeqCst);
    }

    /// Default commit-on-close mode for new sessions.
    pub fn commit_on_close(&self) -> bool {
        self.commit_on_close.load(Ordering::SeqCst)
    }

    pub fn set_commit_on_close(&self, enabled: bool) {
        self.commit_on_close.store(enabled, Ordering::SeqCst);
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Hand out a connection, reusing an idle one when available.
    ///
    /// Fails with `ConnectFailure` when a new physical connection cannot be
    /// established.
    pub async fn acquire(&self) -> DbResult<Arc<Connection>> {
        let pooled = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(DbError::invalid_state(format!(
                    "Credential pool {} is closed",
                    self.description()
                )));
            }
            state.idle.pop_front()
        }; // Lock released before connecting

        let connection = match pooled {
            Some(connection) => {
                debug!(connection_id = %connection.id(), pool = %self.description(), "Reusing pooled connection");
                connection
            }
            None => {
                let handle = self.driver.connect(&self.credential, &self.target).await?;
                let connection = Arc::new(Connection::new(handle, &self.credential.username));
                info!(
                    connection_id = %connection.id(),
                    pool = %self.description(),
                    driver = %self.driver.name(),
                    "Opened physical connection"
                );
                connection
            }
        };
        connection.touch();

        let sizes = {
            let mut state = self.state.lock().await;
            if state.closed {
                None
            } else {
                state.allocated.push(Arc::clone(&connection));
                Some((state.idle.len(), state.allocated.len()))
            }
        };
        let Some((idle, allocated)) = sizes else {
            self.close_quietly(&connection).await;
            return Err(DbError::invalid_state(format!(
                "Credential pool {} was closed while connecting",
                self.description()
            )));
        };

        self.emit_size(idle, allocated);
        Ok(connection)
    }

    /// Take a connection back.
    ///
    /// Dead handles are disposed. Connections with auto-commit disabled have
    /// their pending work committed or rolled back (per commit-on-close) and
    /// are then closed. Others are pooled while the idle queue has room;
    /// otherwise the returned connection itself is closed.
    pub async fn release(&self, connection: &Arc<Connection>) -> DbResult<()> {
        if !connection.is_alive().await {
            warn!(connection_id = %connection.id(), "Released connection is stale, disposing");
            self.dispose(connection).await;
            return Ok(());
        }

        let was_allocated = {
            let mut state = self.state.lock().await;
            state.take_allocated(connection)
        };
        connection.set_session(None);

        if !connection.auto_commit() {
            let result = if connection.commit_on_close() {
                connection.commit().await
            } else {
                connection.rollback().await
            };
            if let Err(e) = &result {
                warn!(connection_id = %connection.id(), error = %e, "Failed to end transaction on release");
            }
            self.close_quietly(connection).await;
            self.emit_current_size().await;
            return result;
        }

        connection.touch();
        let pooled = {
            let mut state = self.state.lock().await;
            if was_allocated && !state.closed && state.idle.len() < self.max_idle {
                state.idle.push_back(Arc::clone(connection));
                Some((state.idle.len(), state.allocated.len()))
            } else {
                None
            }
        };

        match pooled {
            Some((idle, allocated)) => {
                debug!(connection_id = %connection.id(), idle, "Connection returned to pool");
                self.emit_size(idle, allocated);
            }
            None => {
                debug!(connection_id = %connection.id(), "Pool full, closing returned connection");
                self.close_quietly(connection).await;
                self.emit_current_size().await;
            }
        }
        Ok(())
    }

    /// Forget a connection and close it unconditionally.
    pub async fn dispose(&self, connection: &Arc<Connection>) {
        {
            let mut state = self.state.lock().await;
            state.take_allocated(connection);
            state.idle.retain(|c| c.id() != connection.id());
        }
        connection.set_session(None);
        self.close_quietly(connection).await;
        self.emit_current_size().await;
    }

    /// Close idle connections that have not been used for longer than
    /// `max_idle`. Returns how many were evicted.
    pub async fn evict_stale(&self, max_idle: Duration) -> usize {
        let stale: Vec<Arc<Connection>> = {
            let mut state = self.state.lock().await;
            let (stale, keep): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|c| c.idle_for() > max_idle);
            state.idle = keep;
            stale.into_iter().collect()
        }; // Lock released before closing

        if stale.is_empty() {
            return 0;
        }

        for connection in &stale {
            self.close_quietly(connection).await;
        }
        info!(pool = %self.description(), evicted = stale.len(), "Evicted stale connections");
        self.emit_current_size().await;
        stale.len()
    }

    pub async fn idle_count(&self) -> usize {
        self.state.lock().await.idle.len()
    }

    pub async fn allocated_count(&self) -> usize {
        self.state.lock().await.allocated.len()
    }

    /// Allocated connections followed by idle ones.
    pub async fn connections(&self) -> Vec<Arc<Connection>> {
        let state = self.state.lock().await;
        state
            .allocated
            .iter()
            .chain(state.idle.iter())
            .cloned()
            .collect()
    }

    pub async fn is_pooled(&self, connection: &Connection) -> bool {
        let state = self.state.lock().await;
        state.idle.iter().any(|c| c.id() == connection.id())
    }

    /// Whether a physical connection was ever established and is still tracked.
    pub async fn has_authenticated(&self) -> bool {
        let state = self.state.lock().await;
        !state.idle.is_empty() || !state.allocated.is_empty()
    }

    pub async fn is_in_use(&self) -> bool {
        let state = self.state.lock().await;
        !state.allocated.is_empty() || state.sessions.values().any(|s| s.strong_count() > 0)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Open a new session bound to this pool.
    pub async fn create_session(self: &Arc<Self>) -> DbResult<Arc<Session>> {
        let session = Arc::new(Session::new(Arc::clone(self)));
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(DbError::invalid_state(format!(
                    "Credential pool {} is closed",
                    self.description()
                )));
            }
            state.sessions.retain(|_, s| s.strong_count() > 0);
            state.sessions.insert(session.id(), Arc::downgrade(&session));
        }
        self.events.emit(SessionEvent::SessionOpened {
            session_id: session.id(),
            target: self.target.name.clone(),
            username: self.credential.username.clone(),
        });
        Ok(session)
    }

    /// Live sessions created by this pool.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let state = self.state.lock().await;
        state.sessions.values().filter_map(Weak::upgrade).collect()
    }

    pub(crate) async fn unlink_session(&self, session_id: Uuid) {
        let removed = self.state.lock().await.sessions.remove(&session_id);
        if removed.is_some() {
            self.events.emit(SessionEvent::SessionClosed { session_id });
        }
    }

    pub async fn close_all_sessions(&self) {
        for session in self.sessions().await {
            session.close().await;
        }
    }

    /// Close every session and connection; the pool is unusable afterwards.
    pub async fn close(&self) {
        self.close_all_sessions().await;
        let connections: Vec<Arc<Connection>> = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            state.closed = true;
            state
                .idle
                .drain(..)
                .chain(state.allocated.drain(..))
                .collect()
        };
        for connection in &connections {
            self.close_quietly(connection).await;
        }
        info!(pool = %self.description(), closed = connections.len(), "Credential pool closed");
        self.emit_size(0, 0);
    }

    async fn close_quietly(&self, connection: &Connection) {
        if let Err(e) = connection.close().await {
            warn!(connection_id = %connection.id(), error = %e, "Cannot close connection");
        }
    }

    async fn emit_current_size(&self) {
        let (idle, allocated) = {
            let state = self.state.lock().await;
            (state.idle.len(), state.allocated.len())
        };
        self.emit_size(idle, allocated);
    }

    fn emit_size(&self, idle: usize, allocated: usize) {
        self.events.emit(SessionEvent::PoolSizeChanged {
            target: self.target.name.clone(),
            username: self.credential.username.clone(),
            idle,
            allocated,
        });
    }
}
