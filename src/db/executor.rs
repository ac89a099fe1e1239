//! Query execution.
//!
//! An [`Execution`] runs one [`Query`] at a time against a grabbed
//! [`Connection`]:
//! - named parameters are rewritten to driver placeholders (except for DDL)
//! - statements with parameters are prepared as callable and bound through
//!   the [`DatabaseProduct`]
//! - everything else runs as a plain statement, with the row limit applied
//!   to SELECTs only
//!
//! The returned [`ExecutionResults`] walks the produced data sets.

use crate::db::connection::Connection;
use crate::db::driver::{CancelHandle, Statement, StatementMode};
use crate::db::params::{RewrittenQuery, rewrite_named_parameters};
use crate::db::product::DatabaseProduct;
use crate::db::results::ExecutionResults;
use crate::error::{DbError, DbResult};
use crate::models::{Query, QueryKind};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn};

/// Executes queries using one product's binding rules.
pub struct Execution {
    product: Arc<dyn DatabaseProduct>,
    /// Handle of the statement currently inside `execute_query`
    in_flight: Mutex<Option<Arc<dyn CancelHandle>>>,
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("product", &self.product.name())
            .field("executing", &self.is_executing())
            .finish()
    }
}

impl Execution {
    pub fn new(product: Arc<dyn DatabaseProduct>) -> Self {
        Self {
            product,
            in_flight: Mutex::new(None),
        }
    }

    pub fn product(&self) -> &Arc<dyn DatabaseProduct> {
        &self.product
    }

    /// Whether a statement is currently being executed.
    pub fn is_executing(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    /// Execute a query and return its results.
    ///
    /// `max_rows` caps the rows read from each result cursor (0 means no
    /// limit). On failure the statement is closed before the error is
    /// returned.
    pub async fn execute_query(
        &self,
        connection: &Connection,
        query: &Query,
        max_rows: usize,
    ) -> DbResult<ExecutionResults> {
        let start = Instant::now();

        let rewritten = if query.kind != QueryKind::Ddl && query.has_parameters() {
            rewrite_named_parameters(
                &query.sql,
                &query.parameters,
                self.product.placeholder_style(),
            )?
        } else {
            RewrittenQuery {
                sql: query.sql.clone(),
                parameters: Vec::new(),
            }
        };

        let mode = if rewritten.has_parameters() {
            StatementMode::Callable
        } else {
            StatementMode::Plain
        };

        debug!(
            sql = %rewritten.sql,
            kind = %query.kind,
            line = query.line_no,
            params = rewritten.parameters.len(),
            mode = ?mode,
            max_rows,
            "Executing query"
        );

        let mut statement = connection.create_statement(&rewritten.sql, mode).await?;
        let cancel_handle = statement.cancel_handle();
        self.set_in_flight(Some(Arc::clone(&cancel_handle)));

        let outcome = self
            .bind_and_execute(statement.as_mut(), query, &rewritten, mode, max_rows)
            .await;
        self.set_in_flight(None);

        match outcome {
            Ok(has_results) => {
                debug!(
                    has_results,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Query executed"
                );
                Ok(ExecutionResults::new(
                    Arc::clone(&self.product),
                    statement,
                    cancel_handle,
                    has_results,
                    rewritten.parameters,
                    max_rows,
                ))
            }
            Err(e) => {
                if let Err(close_err) = statement.close().await {
                    warn!(error = %close_err, "Cannot close failed statement");
                }
                if matches!(e, DbError::StaleConnection { .. }) {
                    connection.mark_broken();
                }
                debug!(
                    error = %e,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Query failed"
                );
                Err(e)
            }
        }
    }

    async fn bind_and_execute(
        &self,
        statement: &mut dyn Statement,
        query: &Query,
        rewritten: &RewrittenQuery,
        mode: StatementMode,
        max_rows: usize,
    ) -> DbResult<bool> {
        match mode {
            StatementMode::Callable => {
                for (idx, parameter) in rewritten.parameters.iter().enumerate() {
                    self.product.bind_parameter(statement, parameter, idx + 1)?;
                }
            }
            StatementMode::Plain => {
                // Some back-ends reject a row limit on DDL and DML.
                if query.kind == QueryKind::Select {
                    if let Err(e) = statement.set_max_rows(max_rows) {
                        debug!(error = %e, "Row limit not applied");
                    }
                }
            }
        }
        statement.execute().await
    }

    /// Cancel the statement currently executing, if any. Failures are
    /// logged and never returned.
    pub async fn cancel(&self) {
        let handle = self
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        let Some(handle) = handle else {
            debug!("Nothing to cancel");
            return;
        };
        match handle.cancel().await {
            Ok(()) => debug!("Cancel requested"),
            Err(e) => warn!(error = %e, "Cannot cancel statement"),
        }
    }

    fn set_in_flight(&self, handle: Option<Arc<dyn CancelHandle>>) {
        *self
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = handle;
    }
}
