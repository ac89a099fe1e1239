//! Session establishment with credential retry.
//!
//! Opening a session against a pool that never authenticated verifies the
//! credential with one grab/release cycle. When that fails, a
//! [`CredentialPrompt`] decides whether to try again with new credentials
//! or give up. The loop has no UI of its own.

use crate::db::manager::ConnectionManager;
use crate::db::session::Session;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionTarget, Credential};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Answer of a [`CredentialPrompt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Credential),
    GiveUp,
}

/// Asked for new credentials after a failed attempt, or before the first
/// attempt when the target does not log on automatically.
#[async_trait::async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// `error` is `None` when no attempt was made yet.
    async fn prompt(
        &self,
        target: &ConnectionTarget,
        previous: &Credential,
        error: Option<&DbError>,
    ) -> RetryDecision;
}

/// Prompt that never retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

#[async_trait::async_trait]
impl CredentialPrompt for NoPrompt {
    async fn prompt(
        &self,
        _target: &ConnectionTarget,
        _previous: &Credential,
        _error: Option<&DbError>,
    ) -> RetryDecision {
        RetryDecision::GiveUp
    }
}

/// Open a session for `credential`, asking `prompt` for replacements until
/// one works or the prompt gives up.
///
/// Only connection failures are retried; any other error is returned as is.
/// Giving up yields `Cancelled` carrying the last failure.
pub async fn establish_session(
    manager: &ConnectionManager,
    target: &ConnectionTarget,
    credential: Credential,
    prompt: &dyn CredentialPrompt,
) -> DbResult<Arc<Session>> {
    let mut credential = credential;
    let mut last_error: Option<DbError> = None;

    let mut skip_attempt = !target.auto_logon
        && !manager
            .pool_for(target, &credential)
            .await
            .has_authenticated()
            .await;
    let mut attempts = 0usize;

    loop {
        if !skip_attempt {
            attempts += 1;
            match open_session(manager, target, &credential).await {
                Ok(session) => {
                    info!(
                        target = %target.name,
                        username = %credential.username,
                        attempts,
                        "Session established"
                    );
                    return Ok(session);
                }
                Err(e) if matches!(e, DbError::ConnectFailure { .. }) => {
                    warn!(
                        target = %target.name,
                        username = %credential.username,
                        error = %e,
                        "Logon failed"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        skip_attempt = false;

        match prompt.prompt(target, &credential, last_error.as_ref()).await {
            RetryDecision::Retry(next) => {
                debug!(target = %target.name, username = %next.username, "Retrying with new credentials");
                credential = next;
            }
            RetryDecision::GiveUp => {
                let reason = match &last_error {
                    Some(e) => e.to_string(),
                    None => "no logon attempted".to_string(),
                };
                return Err(DbError::cancelled(format!(
                    "logon to {}: {}",
                    target.name, reason
                )));
            }
        }
    }
}

async fn open_session(
    manager: &ConnectionManager,
    target: &ConnectionTarget,
    credential: &Credential,
) -> DbResult<Arc<Session>> {
    let pool = manager.pool_for(target, credential).await;
    let session = pool.create_session().await?;
    if pool.has_authenticated().await {
        return Ok(session);
    }

    // Verify the credential once before handing the session out
    let verified = match session.grab().await {
        Ok(connection) => session.release(&connection).await,
        Err(e) => Err(e),
    };
    match verified {
        Ok(()) => Ok(session),
        Err(e) => {
            session.close().await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_prompt_gives_up() {
        let target = ConnectionTarget::new("t", "sqlite::memory:", Default::default()).unwrap();
        let decision = NoPrompt
            .prompt(&target, &Credential::anonymous(), None)
            .await;
        assert_eq!(decision, RetryDecision::GiveUp);
    }
}
