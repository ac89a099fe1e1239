//! Credential retry loop tests.

mod common;

use common::{ScriptedDriver, manager, target};
use dbsession::config::PoolOptions;
use dbsession::db::{CredentialPrompt, NoPrompt, RetryDecision, establish_session};
use dbsession::error::DbError;
use dbsession::models::{ConnectionTarget, Credential};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Prompt answering from a fixed list and recording what it was shown.
#[derive(Default)]
struct ScriptedPrompt {
    answers: Mutex<VecDeque<RetryDecision>>,
    seen: Mutex<Vec<Option<String>>>,
}

impl ScriptedPrompt {
    fn answering(answers: Vec<RetryDecision>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CredentialPrompt for ScriptedPrompt {
    async fn prompt(
        &self,
        _target: &ConnectionTarget,
        _previous: &Credential,
        error: Option<&DbError>,
    ) -> RetryDecision {
        self.seen
            .lock()
            .unwrap()
            .push(error.map(|e| e.to_string()));
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RetryDecision::GiveUp)
    }
}

#[tokio::test]
async fn test_first_attempt_success_does_not_prompt() {
    let driver = Arc::new(ScriptedDriver::new().with_password("right"));
    let manager = manager(&driver);
    let prompt = ScriptedPrompt::default();

    let session = establish_session(
        &manager,
        &target("sales", PoolOptions::default()),
        Credential::new("app", "right"),
        &prompt,
    )
    .await
    .unwrap();

    assert!(prompt.seen().is_empty());
    assert!(session.pool().has_authenticated().await);
    // The verifying connection went back to the pool
    assert_eq!(session.pool().idle_count().await, 1);
    assert_eq!(driver.recorder.connects(), 1);
}

#[tokio::test]
async fn test_retry_with_corrected_password() {
    let driver = Arc::new(ScriptedDriver::new().with_password("right"));
    let manager = manager(&driver);
    let prompt = ScriptedPrompt::answering(vec![
        RetryDecision::Retry(Credential::new("app", "still-wrong")),
        RetryDecision::Retry(Credential::new("app", "right")),
    ]);

    let session = establish_session(
        &manager,
        &target("sales", PoolOptions::default()),
        Credential::new("app", "wrong"),
        &prompt,
    )
    .await
    .unwrap();

    let seen = prompt.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|e| e
        .as_deref()
        .is_some_and(|e| e.contains("password authentication failed"))));
    assert_eq!(session.pool().credential().password, "right");
    assert_eq!(manager.pool_count().await, 1);
}

#[tokio::test]
async fn test_giving_up_is_cancelled() {
    let driver = Arc::new(ScriptedDriver::new().with_password("right"));
    let manager = manager(&driver);

    let err = establish_session(
        &manager,
        &target("sales", PoolOptions::default()),
        Credential::new("app", "wrong"),
        &NoPrompt,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DbError::Cancelled { .. }));
    let message = err.to_string();
    assert!(message.contains("logon to sales"));
    assert!(message.contains("password authentication failed"));
    // Failed verification sessions are closed
    for pool in manager.pools().await {
        assert!(pool.sessions().await.is_empty());
    }
}

#[tokio::test]
async fn test_target_without_auto_logon_prompts_first() {
    let driver = Arc::new(ScriptedDriver::new().with_password("right"));
    let manager = manager(&driver);
    let prompt =
        ScriptedPrompt::answering(vec![RetryDecision::Retry(Credential::new("app", "right"))]);
    let sales = target("sales", PoolOptions::default()).with_auto_logon(false);

    establish_session(&manager, &sales, Credential::new("app", ""), &prompt)
        .await
        .unwrap();

    // Asked before any attempt, so without an error
    assert_eq!(prompt.seen(), vec![None]);
    assert_eq!(driver.recorder.connects(), 1);
}

#[tokio::test]
async fn test_authenticated_pool_skips_the_prompt() {
    let driver = Arc::new(ScriptedDriver::new().with_password("right"));
    let manager = manager(&driver);
    let sales = target("sales", PoolOptions::default()).with_auto_logon(false);
    let first_prompt =
        ScriptedPrompt::answering(vec![RetryDecision::Retry(Credential::new("app", "right"))]);
    let first = establish_session(&manager, &sales, Credential::new("app", ""), &first_prompt)
        .await
        .unwrap();

    let second_prompt = ScriptedPrompt::default();
    let second = establish_session(&manager, &sales, Credential::new("app", ""), &second_prompt)
        .await
        .unwrap();

    assert!(second_prompt.seen().is_empty());
    assert!(Arc::ptr_eq(first.pool(), second.pool()));
    assert_eq!(driver.recorder.connects(), 1);
}
