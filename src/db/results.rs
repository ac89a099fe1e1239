//! Iteration over the data sets produced by one execution.
//!
//! Results are walked in a fixed order: the primary result, any further
//! results the statement reports, cursors returned through output
//! parameters, and finally one synthetic table of scalar output parameter
//! values. Each phase is left exactly once.

use crate::db::driver::{CancelHandle, Cursor, SqlWarning, Statement};
use crate::db::product::DatabaseProduct;
use crate::error::DbResult;
use crate::models::{DataSet, NamedParameter, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where [`ExecutionResults::next_data_set`] looks next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The result of the initial execute
    Primary,
    /// Results reported by the statement after the first one
    Secondary,
    /// Cursors returned through cursor parameters
    ParameterResults,
    /// The synthetic table of output parameter values
    OutputParameters,
    Closed,
}

/// Data sets produced by an executed statement.
///
/// Owns the statement; closing (or dropping) the results closes it.
pub struct ExecutionResults {
    product: Arc<dyn DatabaseProduct>,
    statement: Option<Box<dyn Statement>>,
    cursor: Option<Box<dyn Cursor>>,
    cancel_handle: Arc<dyn CancelHandle>,
    has_results: bool,
    /// Bound parameters in placeholder order
    parameters: Vec<NamedParameter>,
    max_rows: usize,
    phase: Phase,
    /// Next parameter to inspect for a cursor
    param_position: usize,
    update_count: i64,
}

impl std::fmt::Debug for ExecutionResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionResults")
            .field("product", &self.product.name())
            .field("phase", &self.phase)
            .field("parameters", &self.parameters.len())
            .field("update_count", &self.update_count)
            .finish_non_exhaustive()
    }
}

impl ExecutionResults {
    pub(crate) fn new(
        product: Arc<dyn DatabaseProduct>,
        statement: Box<dyn Statement>,
        cancel_handle: Arc<dyn CancelHandle>,
        has_results: bool,
        parameters: Vec<NamedParameter>,
        max_rows: usize,
    ) -> Self {
        Self {
            product,
            statement: Some(statement),
            cursor: None,
            cancel_handle,
            has_results,
            parameters,
            max_rows,
            phase: Phase::Primary,
            param_position: 0,
            update_count: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Total of all update counts seen so far.
    pub fn update_count(&self) -> i64 {
        self.update_count
    }

    /// Handle that cancels the statement, usable from another task while a
    /// data set is being read.
    pub fn cancel_handle(&self) -> Arc<dyn CancelHandle> {
        Arc::clone(&self.cancel_handle)
    }

    /// Produce the next data set, or `None` once everything was returned.
    ///
    /// Closes the cursor behind the previously returned data set.
    pub async fn next_data_set(&mut self) -> DbResult<Option<DataSet>> {
        self.close_cursor().await;

        loop {
            let Some(statement) = self.statement.as_mut() else {
                self.phase = Phase::Closed;
                return Ok(None);
            };

            match self.phase {
                Phase::Primary => {
                    self.phase = Phase::Secondary;
                    if self.has_results {
                        if let Some(cursor) = statement.result_cursor() {
                            return self.read_cursor(cursor, None).await.map(Some);
                        }
                        continue;
                    }
                    let affected = statement.update_count();
                    if affected < 0 {
                        self.phase = Phase::ParameterResults;
                    } else {
                        return Ok(Some(self.count(affected)));
                    }
                }
                Phase::Secondary => {
                    if statement.more_results().await? {
                        if let Some(cursor) = statement.result_cursor() {
                            return self.read_cursor(cursor, None).await.map(Some);
                        }
                        continue;
                    }
                    let affected = statement.update_count();
                    if affected < 0 {
                        self.phase = Phase::ParameterResults;
                    } else {
                        return Ok(Some(self.count(affected)));
                    }
                }
                Phase::ParameterResults => {
                    while self.param_position < self.parameters.len() {
                        let position = self.param_position;
                        self.param_position += 1;

                        let parameter = &self.parameters[position];
                        if !parameter.is_cursor() {
                            continue;
                        }
                        let cursor = self
                            .product
                            .cursor_for(statement.as_mut(), parameter, position + 1)
                            .await?;
                        if let Some(cursor) = cursor {
                            let caption = format!("Cursor {}", parameter.name);
                            return self.read_cursor(cursor, Some(caption)).await.map(Some);
                        }
                    }
                    self.phase = Phase::OutputParameters;
                }
                Phase::OutputParameters => {
                    self.phase = Phase::Closed;
                    return self.output_parameters();
                }
                Phase::Closed => return Ok(None),
            }
        }
    }

    fn count(&mut self, affected: i64) -> DataSet {
        self.update_count += affected;
        debug!(affected, total = self.update_count, "Update count");
        DataSet::update_count(affected, self.update_count)
    }

    async fn read_cursor(
        &mut self,
        cursor: Box<dyn Cursor>,
        caption: Option<String>,
    ) -> DbResult<DataSet> {
        // Kept open so its warnings stay readable until the next call.
        let cursor = self.cursor.insert(cursor);
        let mut data_set = materialize(cursor.as_mut(), self.max_rows).await?;
        if let Some(caption) = caption {
            data_set = data_set.with_caption(caption);
        }
        Ok(data_set)
    }

    /// Name/value table of scalar output parameters. Names bound more than
    /// once get a `[n]` suffix per occurrence.
    fn output_parameters(&mut self) -> DbResult<Option<DataSet>> {
        let Some(statement) = self.statement.as_mut() else {
            return Ok(None);
        };

        let mut ordinals: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, parameter) in self.parameters.iter().enumerate() {
            if parameter.is_output() && !parameter.is_cursor() {
                ordinals
                    .entry(parameter.name.as_str())
                    .or_default()
                    .push(idx + 1);
            }
        }
        if ordinals.is_empty() {
            return Ok(None);
        }

        let mut rows: Vec<(String, Value)> = Vec::new();
        for (name, positions) in &ordinals {
            for (occurrence, ordinal) in positions.iter().enumerate() {
                let label = if positions.len() > 1 {
                    format!("{}[{}]", name, occurrence + 1)
                } else {
                    (*name).to_string()
                };
                rows.push((label, statement.output_value(*ordinal)?));
            }
        }
        Ok(Some(DataSet::parameters(rows)))
    }

    /// Drain the warnings of the open cursor, or of the statement when no
    /// cursor is open.
    pub fn warnings(&mut self) -> Vec<String> {
        let warnings = match (self.cursor.as_mut(), self.statement.as_mut()) {
            (Some(cursor), _) => cursor.take_warnings(),
            (None, Some(statement)) => statement.take_warnings(),
            (None, None) => Vec::new(),
        };
        warnings
            .into_iter()
            .filter(|w| !w.message.trim().is_empty())
            .map(|w| format_warning(&w))
            .collect()
    }

    /// Close the open cursor and the statement. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.close_cursor().await;
        if let Some(mut statement) = self.statement.take() {
            if let Err(e) = statement.close().await {
                warn!(error = %e, "Cannot close statement");
            }
        }
        self.phase = Phase::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.statement.is_none()
    }

    async fn close_cursor(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.close().await {
                warn!(error = %e, "Cannot close cursor");
            }
        }
    }
}

impl Drop for ExecutionResults {
    fn drop(&mut self) {
        if self.statement.is_none() && self.cursor.is_none() {
            return;
        }
        let cursor = self.cursor.take();
        let statement = self.statement.take();
        // Outside a runtime the driver resources are simply dropped.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Some(mut cursor) = cursor {
                    if let Err(e) = cursor.close().await {
                        warn!(error = %e, "Cannot close cursor of dropped results");
                    }
                }
                if let Some(mut statement) = statement {
                    if let Err(e) = statement.close().await {
                        warn!(error = %e, "Cannot close statement of dropped results");
                    }
                }
            });
        }
    }
}

/// Read up to `max_rows` rows (0 means all). One extra row is read to tell
/// whether the cursor was truncated.
async fn materialize(cursor: &mut dyn Cursor, max_rows: usize) -> DbResult<DataSet> {
    let columns = cursor.columns();
    let mut rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = cursor.next_row().await? {
        if max_rows > 0 && rows.len() >= max_rows {
            truncated = true;
            break;
        }
        rows.push(row);
    }
    Ok(DataSet::rows(columns, rows, truncated))
}

/// Warnings with a SQL state or vendor code are prefixed with both.
fn format_warning(warning: &SqlWarning) -> String {
    if warning.sql_state.is_none() && warning.code == 0 {
        warning.message.clone()
    } else {
        format!(
            "Warning({}/{}): {}",
            warning.sql_state.as_deref().unwrap_or(""),
            warning.code,
            warning.message
        )
    }
}
