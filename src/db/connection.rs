//! Physical connection bookkeeping.

use crate::db::driver::{PhysicalConnection, Statement, StatementMode};
use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// One physical database handle plus the engine's bookkeeping about it.
///
/// A connection belongs to the credential pool that created it and is used
/// by at most one session at a time. Only the holder mutates it.
pub struct Connection {
    id: Uuid,
    username: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    created: Instant,
    last_used: StdMutex<Instant>,
    session: StdMutex<Option<Uuid>>,
    auto_commit: AtomicBool,
    commit_on_close: AtomicBool,
    broken: AtomicBool,
    handle: Mutex<Box<dyn PhysicalConnection>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("description", &self.description)
            .field("created_at", &self.created_at)
            .field("auto_commit", &self.auto_commit())
            .field("broken", &self.is_broken())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap a freshly established handle. New connections start in
    /// auto-commit mode, matching what drivers hand out.
    pub fn new(handle: Box<dyn PhysicalConnection>, username: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            description: handle.description(),
            created_at: Utc::now(),
            created: now,
            last_used: StdMutex::new(now),
            session: StdMutex::new(None),
            auto_commit: AtomicBool::new(true),
            commit_on_close: AtomicBool::new(true),
            broken: AtomicBool::new(false),
            handle: Mutex::new(handle),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Time since the connection was last handed out.
    pub fn idle_for(&self) -> Duration {
        let last_used = *self
            .last_used
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        last_used.elapsed()
    }

    pub(crate) fn touch(&self) {
        *self
            .last_used
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
    }

    /// Session currently using this connection.
    pub fn session_id(&self) -> Option<Uuid> {
        *self
            .session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn set_session(&self, session: Option<Uuid>) {
        *self
            .session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = session;
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::SeqCst)
    }

    /// Change the transaction mode, touching the handle only when it differs.
    pub async fn set_auto_commit(&self, enabled: bool) -> DbResult<()> {
        if self.auto_commit() == enabled {
            return Ok(());
        }
        self.handle.lock().await.set_auto_commit(enabled).await?;
        self.auto_commit.store(enabled, Ordering::SeqCst);
        debug!(connection_id = %self.id, auto_commit = enabled, "Auto-commit changed");
        Ok(())
    }

    pub fn commit_on_close(&self) -> bool {
        self.commit_on_close.load(Ordering::SeqCst)
    }

    pub fn set_commit_on_close(&self, enabled: bool) {
        self.commit_on_close.store(enabled, Ordering::SeqCst);
    }

    pub async fn commit(&self) -> DbResult<()> {
        self.handle.lock().await.commit().await
    }

    pub async fn rollback(&self) -> DbResult<()> {
        self.handle.lock().await.rollback().await
    }

    pub async fn catalog(&self) -> DbResult<Option<String>> {
        self.handle.lock().await.catalog().await
    }

    pub async fn set_catalog(&self, catalog: &str) -> DbResult<()> {
        self.handle.lock().await.set_catalog(catalog).await
    }

    pub async fn create_statement(
        &self,
        sql: &str,
        mode: StatementMode,
    ) -> DbResult<Box<dyn Statement>> {
        if self.is_broken() {
            return Err(DbError::stale_connection(format!(
                "connection {} is no longer usable",
                self.id
            )));
        }
        self.handle.lock().await.create_statement(sql, mode).await
    }

    /// Mark the handle as dead so that it is disposed rather than pooled.
    pub fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::SeqCst) {
            warn!(connection_id = %self.id, "Connection marked as broken");
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Health check used before pooling a returned connection.
    pub async fn is_alive(&self) -> bool {
        if self.is_broken() {
            return false;
        }
        let alive = self.handle.lock().await.is_valid().await;
        if !alive {
            self.mark_broken();
        }
        alive
    }

    pub(crate) async fn close(&self) -> DbResult<()> {
        debug!(connection_id = %self.id, "Closing physical connection");
        self.handle.lock().await.close().await
    }
}
