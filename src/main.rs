//! dbsession - Main entry point.
//!
//! Opens a pooled session against one target, runs a single query and
//! prints every DataSet the execution produces.

use dbsession::config::Config;
use dbsession::db::classify::detect_kind;
use dbsession::db::{
    ConnectionManager, CredentialPrompt, EventSink, Execution, LoggingListener, NoPrompt,
    ProductRegistry, RetryDecision, Session, SqlxDriver, establish_session,
};
use dbsession::error::{DbError, DbResult};
use dbsession::format::format_data_set;
use dbsession::models::{ConnectionTarget, Credential, Query};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries the DataSets
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Asks for a password on the terminal. An empty answer gives up.
struct TerminalPrompt;

#[async_trait::async_trait]
impl CredentialPrompt for TerminalPrompt {
    async fn prompt(
        &self,
        target: &ConnectionTarget,
        previous: &Credential,
        error: Option<&DbError>,
    ) -> RetryDecision {
        if let Some(e) = error {
            eprintln!("Logon failed: {}", e);
            if let Some(suggestion) = e.suggestion() {
                eprintln!("  {}", suggestion);
            }
        }

        let mut stderr = tokio::io::stderr();
        let label = if previous.username.is_empty() {
            format!("Password for {}: ", target.name)
        } else {
            format!("Password for {}@{}: ", previous.username, target.name)
        };
        if stderr.write_all(label.as_bytes()).await.is_err() || stderr.flush().await.is_err() {
            return RetryDecision::GiveUp;
        }

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(0) | Err(_) => RetryDecision::GiveUp,
            Ok(_) => {
                let password = line.trim_end_matches(['\r', '\n']);
                if password.is_empty() {
                    RetryDecision::GiveUp
                } else {
                    RetryDecision::Retry(Credential::new(&previous.username, password))
                }
            }
        }
    }
}

/// Execute the query on a grabbed connection and print each DataSet.
async fn run_query(
    config: &Config,
    session: &Arc<Session>,
    execution: &Execution,
    query: &Query,
) -> DbResult<()> {
    let connection = session.grab().await?;

    let outcome = async {
        let mut results = execution
            .execute_query(&connection, query, config.max_rows)
            .await?;
        let mut printed = 0usize;
        let walked = async {
            while let Some(data_set) = results.next_data_set().await? {
                println!("{}", format_data_set(&data_set, config.format));
                printed += 1;
            }
            Ok::<_, DbError>(())
        }
        .await;
        for warning in results.warnings() {
            eprintln!("{}", warning);
        }
        results.close().await;
        walked?;
        if printed == 0 {
            println!("No results");
        }
        Ok::<_, DbError>(())
    }
    .await;

    // Release even when execution failed
    let released = session.release(&connection).await;
    outcome?;
    released
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();
    config.validate()?;

    // Initialize logging
    init_tracing(&config);

    let target_config = config.parse_target()?;
    let target = target_config.to_target()?;
    let credential = config.credential(&target_config);
    let sql = config.load_sql()?;
    let kind = match config.query_kind()? {
        Some(kind) => kind,
        None => detect_kind(&sql, target.db_type),
    };
    let query = config
        .parse_params()?
        .into_iter()
        .fold(Query::new(sql, kind), Query::with_parameter);

    info!(
        target = %target.name,
        url = %target.masked_url(),
        kind = %query.kind,
        "Starting dbsession v{}",
        env!("CARGO_PKG_VERSION")
    );

    let events = EventSink::new();
    events.subscribe(Arc::new(LoggingListener));
    let manager = ConnectionManager::new(
        Arc::new(SqlxDriver::new()),
        ProductRegistry::with_builtins(),
        events,
    );
    if target.pool_options.idle_timeout_duration().is_some() {
        manager.start_eviction_task(Duration::from_secs(
            target.pool_options.eviction_interval_or_default(),
        ));
    }

    let session = if config.no_prompt {
        establish_session(&manager, &target, credential, &NoPrompt).await
    } else {
        establish_session(&manager, &target, credential, &TerminalPrompt).await
    };
    let session = match session {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Could not open a session");
            manager.close_all().await;
            return Err(e.into());
        }
    };

    let mut result = match &config.catalog {
        Some(catalog) => session.set_catalog(catalog).await,
        None => Ok(()),
    };

    if result.is_ok() {
        let execution = Arc::new(Execution::new(session.product()));

        // Ctrl-C cancels the running statement
        let cancel = {
            let execution = Arc::clone(&execution);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling statement");
                    execution.cancel().await;
                }
            })
        };

        result = run_query(&config, &session, &execution, &query).await;
        cancel.abort();
    }

    if let Err(e) = &result {
        for message in session
            .product()
            .describe_errors(e, query.line_no.saturating_sub(1))
        {
            match message.line {
                Some(line) => eprintln!("{:?} at line {}: {}", message.severity, line, message.text),
                None => eprintln!("{:?}: {}", message.severity, message.text),
            }
        }
    }

    session.close().await;
    manager.close_all().await;
    info!("Shutdown complete");

    result.map_err(Into::into)
}
