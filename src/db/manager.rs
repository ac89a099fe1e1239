//! Registry of credential pools.
//!
//! The [`ConnectionManager`] owns one [`CredentialPool`] per
//! (target, username) pair and runs the periodic stale-connection sweep.
//! Collaborators (driver, product registry, event sink) are passed in at
//! construction time.

use crate::db::driver::Driver;
use crate::db::events::EventSink;
use crate::db::pool::CredentialPool;
use crate::db::product::ProductRegistry;
use crate::db::session::Session;
use crate::error::DbResult;
use crate::models::{ConnectionTarget, Credential};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock as TokioRwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Lookup key of a credential pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub target: String,
    pub username: String,
}

impl PoolKey {
    pub fn new(target: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            username: username.into(),
        }
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.target, self.username)
    }
}

/// Owns every credential pool of the process.
pub struct ConnectionManager {
    driver: Arc<dyn Driver>,
    products: ProductRegistry,
    events: EventSink,
    pools: TokioRwLock<HashMap<PoolKey, Arc<CredentialPool>>>,
    /// Eviction task handle. Uses std::sync::Mutex for synchronous storage.
    eviction_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn Driver>, products: ProductRegistry, events: EventSink) -> Arc<Self> {
        Arc::new(Self {
            driver,
            products,
            events,
            pools: TokioRwLock::new(HashMap::new()),
            eviction_handle: std::sync::Mutex::new(None),
        })
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn products(&self) -> &ProductRegistry {
        &self.products
    }

    /// Get the pool for a credential, creating it on first use.
    ///
    /// A pool that never authenticated is replaced when asked for with a
    /// different password, so a corrected credential takes effect.
    pub async fn pool_for(
        &self,
        target: &ConnectionTarget,
        credential: &Credential,
    ) -> Arc<CredentialPool> {
        let key = PoolKey::new(&target.name, &credential.username);

        let existing = {
            let pools = self.pools.read().await;
            pools.get(&key).cloned()
        };
        if let Some(pool) = existing {
            if pool.credential() == credential || pool.has_authenticated().await {
                return pool;
            }
        }

        let (pool, replaced) = {
            let mut pools = self.pools.write().await;
            // Double-check after acquiring write lock
            if let Some(pool) = pools.get(&key) {
                if pool.credential() == credential {
                    return Arc::clone(pool);
                }
            }
            let product = self.products.resolve(&target.url);
            let pool = CredentialPool::new(
                target.clone(),
                credential.clone(),
                Arc::clone(&self.driver),
                product,
                self.events.clone(),
            );
            let replaced = pools.insert(key.clone(), Arc::clone(&pool));
            (pool, replaced)
        }; // Write lock released here

        if let Some(old) = replaced {
            debug!(pool = %key, "Replacing unauthenticated credential pool");
            old.close().await;
        }
        info!(pool = %key, product = %pool.product().name(), "Created credential pool");
        pool
    }

    /// Convenience: open a session on the pool for a credential.
    pub async fn create_session(
        &self,
        target: &ConnectionTarget,
        credential: &Credential,
    ) -> DbResult<Arc<Session>> {
        self.pool_for(target, credential).await.create_session().await
    }

    pub async fn pools(&self) -> Vec<Arc<CredentialPool>> {
        self.pools.read().await.values().cloned().collect()
    }

    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    /// Remove a pool, closing its sessions and connections. Returns whether
    /// a pool was registered under the key.
    pub async fn remove(&self, target: &str, username: &str) -> bool {
        let key = PoolKey::new(target, username);
        let removed = self.pools.write().await.remove(&key); // Lock released here
        match removed {
            Some(pool) => {
                info!(pool = %key, "Removing credential pool");
                pool.close().await;
                true
            }
            None => false,
        }
    }

    /// Close all pools and stop the eviction task.
    pub async fn close_all(&self) {
        self.stop_eviction_task();

        // Drain pools under lock, close outside lock
        let pools: Vec<_> = {
            let mut pools = self.pools.write().await;
            pools.drain().collect()
        }; // Lock released here

        for (key, pool) in pools {
            info!(pool = %key, "Closing credential pool");
            pool.close().await;
        }
    }

    // ========================================================================
    // Stale connection eviction
    // ========================================================================

    /// Start sweeping idle connections every `every`. Each pool evicts with
    /// its own idle timeout; pools whose timeout is zero are skipped.
    /// Replaces a previously started sweep.
    pub fn start_eviction_task(self: &Arc<Self>, every: Duration) {
        // Weak reference so the task does not keep the manager alive
        let weak_manager = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            Self::eviction_task(weak_manager, every).await;
        });

        let previous = self
            .eviction_handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn stop_eviction_task(&self) {
        let handle = self
            .eviction_handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Run one sweep over every pool now. Returns the number of evicted
    /// connections.
    pub async fn evict_stale(&self) -> usize {
        let pools = self.pools().await; // Lock released here
        let mut evicted = 0;
        for pool in pools {
            if let Some(timeout) = pool.target().pool_options.idle_timeout_duration() {
                evicted += pool.evict_stale(timeout).await;
            }
        }
        evicted
    }

    /// Exits when the manager is dropped.
    async fn eviction_task(weak_manager: Weak<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            let Some(manager) = weak_manager.upgrade() else {
                info!("Connection manager dropped, eviction task exiting");
                return;
            };

            let evicted = manager.evict_stale().await;
            if evicted > 0 {
                debug!(evicted, "Eviction sweep finished");
            }

            // Drop strong reference before sleeping to allow manager deallocation
            drop(manager);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop_eviction_task();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("driver", &self.driver.name())
            .field("products", &self.products)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
