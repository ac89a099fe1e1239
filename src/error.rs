//! Error types for the session engine.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! The variants follow the engine's failure taxonomy: connection establishment,
//! programming errors around session ownership, parameter rewriting, dead
//! physical handles and statement execution.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    ConnectFailure { message: String, suggestion: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Unknown named parameter called {name}")]
    UnknownParameter { name: String },

    #[error("Stale connection: {message}")]
    StaleConnection { message: String },

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        vendor_code: Option<i32>,
    },

    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection failure with a helpful suggestion.
    pub fn connect_failure(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConnectFailure {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an invalid state error (programming error around ownership).
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an unknown parameter error.
    pub fn unknown_parameter(name: impl Into<String>) -> Self {
        Self::UnknownParameter { name: name.into() }
    }

    /// Create a stale connection error.
    pub fn stale_connection(message: impl Into<String>) -> Self {
        Self::StaleConnection {
            message: message.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
            vendor_code: None,
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectFailure { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// A stale connection is retried by grabbing again, which allocates a
    /// fresh physical handle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailure { .. } | Self::StaleConnection { .. }
        )
    }

    /// SQL state reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Execution { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connect_failure(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::execution("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::stale_connection("connection pool timed out"),
            sqlx::Error::PoolClosed => DbError::stale_connection("connection pool is closed"),
            sqlx::Error::Io(io_err) => {
                DbError::stale_connection(format!("I/O error: {}", io_err))
            }
            sqlx::Error::Tls(tls_err) => DbError::connect_failure(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => {
                DbError::stale_connection(format!("Protocol error: {}", msg))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::AnyDriverError(err) => DbError::connect_failure(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => DbError::stale_connection("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for engine operations.
pub type DbResult<T> = Result<T, DbError>;
