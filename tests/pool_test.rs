//! Credential pool and connection manager tests.

mod common;

use common::{ScriptedDriver, manager, target};
use dbsession::config::PoolOptions;
use dbsession::db::CredentialPool;
use dbsession::error::DbError;
use dbsession::models::Credential;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn pool(driver: &Arc<ScriptedDriver>, options: PoolOptions) -> Arc<CredentialPool> {
    CredentialPool::new(
        target("sales", options),
        Credential::new("app", "secret"),
        driver.clone(),
        Arc::new(dbsession::db::DefaultProduct),
        dbsession::db::EventSink::new(),
    )
}

#[tokio::test]
async fn test_idle_connections_are_reused() {
    let driver = Arc::new(ScriptedDriver::new());
    let pool = pool(&driver, PoolOptions::default());

    let first = pool.acquire().await.unwrap();
    let first_id = first.id();
    pool.release(&first).await.unwrap();
    assert_eq!(pool.idle_count().await, 1);

    let second = pool.acquire().await.unwrap();
    assert_eq!(second.id(), first_id);
    assert_eq!(driver.recorder.connects(), 1);
    assert_eq!(pool.allocated_count().await, 1);
    assert_eq!(pool.idle_count().await, 0);
}

#[tokio::test]
async fn test_idle_queue_is_bounded() {
    let driver = Arc::new(ScriptedDriver::new());
    let pool = pool(&driver, PoolOptions::default());

    let mut held = Vec::new();
    for _ in 0..5 {
        held.push(pool.acquire().await.unwrap());
    }
    assert_eq!(driver.recorder.connects(), 5);

    for connection in &held {
        pool.release(connection).await.unwrap();
    }

    assert_eq!(pool.idle_count().await, 3);
    assert_eq!(pool.allocated_count().await, 0);
    // The two connections returned last did not fit
    assert_eq!(driver.recorder.closes(), 2);
    assert!(pool.is_pooled(&held[0]).await);
    assert!(!pool.is_pooled(&held[4]).await);
}

#[tokio::test]
async fn test_custom_idle_bound() {
    let driver = Arc::new(ScriptedDriver::new());
    let pool = pool(
        &driver,
        PoolOptions {
            max_idle: Some(1),
            ..Default::default()
        },
    );

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    pool.release(&a).await.unwrap();
    pool.release(&b).await.unwrap();
    assert_eq!(pool.idle_count().await, 1);
    assert_eq!(driver.recorder.closes(), 1);
}

#[tokio::test]
async fn test_stale_connection_is_disposed_on_release() {
    let driver = Arc::new(ScriptedDriver::new());
    let pool = pool(&driver, PoolOptions::default());

    let connection = pool.acquire().await.unwrap();
    driver.healthy.store(false, Ordering::SeqCst);
    pool.release(&connection).await.unwrap();

    assert!(connection.is_broken());
    assert_eq!(pool.idle_count().await, 0);
    assert_eq!(pool.allocated_count().await, 0);
    assert_eq!(driver.recorder.closes(), 1);
}

#[tokio::test]
async fn test_non_auto_commit_connection_is_closed_on_release() {
    let driver = Arc::new(ScriptedDriver::new());
    let pool = pool(&driver, PoolOptions::default());

    let connection = pool.acquire().await.unwrap();
    connection.set_auto_commit(false).await.unwrap();
    connection.set_commit_on_close(false);
    pool.release(&connection).await.unwrap();

    assert_eq!(pool.idle_count().await, 0);
    assert_eq!(
        driver.recorder.ops(),
        vec!["#1 auto_commit=false", "#1 rollback", "#1 close"]
    );
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let driver = Arc::new(ScriptedDriver::new().with_password("right"));
    let pool = pool(&driver, PoolOptions::default());

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, DbError::ConnectFailure { .. }));
    assert!(err.is_retryable());
    assert!(!pool.has_authenticated().await);
}

#[tokio::test]
async fn test_closed_pool_rejects_acquire() {
    let driver = Arc::new(ScriptedDriver::new());
    let pool = pool(&driver, PoolOptions::default());

    let connection = pool.acquire().await.unwrap();
    pool.release(&connection).await.unwrap();
    pool.close().await;

    assert_eq!(driver.recorder.closes(), 1);
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, DbError::InvalidState { .. }));
    assert!(pool.create_session().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_evict_stale_respects_idle_time() {
    let driver = Arc::new(ScriptedDriver::new());
    let pool = pool(&driver, PoolOptions::default());

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    assert!(pool.is_in_use().await);
    pool.release(&a).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    pool.release(&b).await.unwrap();
    assert!(!pool.is_in_use().await);
    assert_eq!(a.age(), Duration::from_secs(30));
    assert_eq!(a.idle_for(), Duration::from_secs(30));
    assert_eq!(b.idle_for(), Duration::ZERO);

    // Only the connection idle for longer than the limit goes
    assert_eq!(pool.evict_stale(Duration::from_secs(20)).await, 1);
    assert_eq!(pool.idle_count().await, 1);
    assert!(pool.is_pooled(&b).await);
    assert_eq!(driver.recorder.closes(), 1);
}

// =============================================================================
// Connection manager
// =============================================================================

#[tokio::test]
async fn test_manager_keys_pools_by_target_and_username() {
    let driver = Arc::new(ScriptedDriver::new());
    let manager = manager(&driver);
    let sales = target("sales", PoolOptions::default());
    let hr = target("hr", PoolOptions::default());

    let app = Credential::new("app", "secret");
    let a = manager.pool_for(&sales, &app).await;
    let b = manager.pool_for(&sales, &app).await;
    assert!(Arc::ptr_eq(&a, &b));

    let other_user = manager
        .pool_for(&sales, &Credential::new("report", "x"))
        .await;
    assert!(!Arc::ptr_eq(&a, &other_user));

    let other_target = manager.pool_for(&hr, &app).await;
    assert!(!Arc::ptr_eq(&a, &other_target));
    assert_eq!(manager.pool_count().await, 3);

    assert!(manager.remove("sales", "report").await);
    assert!(!manager.remove("sales", "report").await);
    assert_eq!(manager.pool_count().await, 2);

    manager.close_all().await;
    assert_eq!(manager.pool_count().await, 0);
}

#[tokio::test]
async fn test_manager_replaces_unauthenticated_pool_on_new_password() {
    let driver = Arc::new(ScriptedDriver::new());
    let manager = manager(&driver);
    let sales = target("sales", PoolOptions::default());

    let wrong = manager
        .pool_for(&sales, &Credential::new("app", "wrong"))
        .await;
    let right = manager
        .pool_for(&sales, &Credential::new("app", "right"))
        .await;
    assert!(!Arc::ptr_eq(&wrong, &right));
    assert_eq!(right.credential().password, "right");
    assert_eq!(manager.pool_count().await, 1);

    // Once authenticated the pool is kept whatever password is asked for
    let connection = right.acquire().await.unwrap();
    right.release(&connection).await.unwrap();
    let again = manager
        .pool_for(&sales, &Credential::new("app", "other"))
        .await;
    assert!(Arc::ptr_eq(&right, &again));
}

#[tokio::test(start_paused = true)]
async fn test_eviction_task_sweeps_idle_connections() {
    let driver = Arc::new(ScriptedDriver::new());
    let manager = manager(&driver);
    let sales = target(
        "sales",
        PoolOptions {
            idle_timeout_secs: Some(10),
            ..Default::default()
        },
    );
    let pool = manager
        .pool_for(&sales, &Credential::new("app", "secret"))
        .await;
    let connection = pool.acquire().await.unwrap();
    pool.release(&connection).await.unwrap();
    drop(connection);

    manager.start_eviction_task(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_secs(21)).await;

    assert_eq!(pool.idle_count().await, 0);
    assert_eq!(driver.recorder.closes(), 1);
    manager.stop_eviction_task();
}

#[tokio::test(start_paused = true)]
async fn test_manager_evict_skips_pools_without_timeout() {
    let driver = Arc::new(ScriptedDriver::new());
    let manager = manager(&driver);
    let pool = manager
        .pool_for(
            &target("sales", PoolOptions::default()),
            &Credential::new("app", "secret"),
        )
        .await;
    let connection = pool.acquire().await.unwrap();
    pool.release(&connection).await.unwrap();

    tokio::time::advance(Duration::from_secs(3600)).await;
    assert_eq!(manager.evict_stale().await, 0);
    assert_eq!(pool.idle_count().await, 1);
}
