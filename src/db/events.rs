//! Session change notifications.
//!
//! Observers (a connections view, a status line) subscribe to an
//! [`EventSink`]. Delivery is fire-and-forget: a listener that fails or
//! panics is logged and skipped, and the engine carries on.

use crate::error::DbResult;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SessionOpened {
        session_id: Uuid,
        target: String,
        username: String,
    },
    SessionClosed {
        session_id: Uuid,
    },
    /// The catalog of a session's connection changed while it was grabbed
    CatalogChanged {
        session_id: Uuid,
        previous: Option<String>,
        current: Option<String>,
    },
    PoolSizeChanged {
        target: String,
        username: String,
        idle: usize,
        allocated: usize,
    },
}

/// Receives session events.
pub trait SessionListener: Send + Sync {
    fn on_event(&self, event: &SessionEvent) -> DbResult<()>;
}

/// Fan-out of session events to registered listeners.
#[derive(Clone, Default)]
pub struct EventSink {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionListener>>>>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn SessionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Deliver an event to every listener, never propagating their failures.
    pub fn emit(&self, event: SessionEvent) {
        // Snapshot so listeners may subscribe from inside a callback.
        let listeners: Vec<Arc<dyn SessionListener>> = self
            .listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, event = ?event, "Session listener failed"),
                Err(_) => warn!(event = ?event, "Session listener panicked"),
            }
        }
    }
}

/// Listener that writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl SessionListener for LoggingListener {
    fn on_event(&self, event: &SessionEvent) -> DbResult<()> {
        match event {
            SessionEvent::SessionOpened {
                session_id,
                target,
                username,
            } => info!(session_id = %session_id, target = %target, username = %username, "Session opened"),
            SessionEvent::SessionClosed { session_id } => {
                info!(session_id = %session_id, "Session closed")
            }
            SessionEvent::CatalogChanged {
                session_id,
                previous,
                current,
            } => info!(
                session_id = %session_id,
                previous = ?previous,
                current = ?current,
                "Catalog changed"
            ),
            SessionEvent::PoolSizeChanged {
                target,
                username,
                idle,
                allocated,
            } => debug!(
                target = %target,
                username = %username,
                idle,
                allocated,
                "Pool size changed"
            ),
        }
        Ok(())
    }
}
