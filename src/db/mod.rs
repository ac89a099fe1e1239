//! Database session engine.
//!
//! This module provides:
//! - Credential pools of physical connections, one per (target, username)
//! - Sessions with exclusive grab/release of a connection
//! - Query execution with named-parameter rewriting
//! - Iteration over multi-result executions
//! - Product-specific behaviour behind a strategy trait
//! - A reference driver over sqlx

pub mod classify;
pub mod connect;
pub mod connection;
pub mod driver;
pub mod events;
pub mod executor;
#[macro_use]
pub(crate) mod macros;
pub mod manager;
pub mod params;
pub mod pool;
pub mod product;
pub mod results;
pub mod session;
pub mod sqlx_driver;
pub mod types;

pub use connect::{CredentialPrompt, NoPrompt, RetryDecision, establish_session};
pub use connection::Connection;
pub use driver::{
    BufferedCursor, CancelHandle, Cursor, Driver, PhysicalConnection, SqlWarning, Statement,
    StatementMode,
};
pub use events::{EventSink, LoggingListener, SessionEvent, SessionListener};
pub use executor::Execution;
pub use manager::{ConnectionManager, PoolKey};
pub use params::{PlaceholderStyle, RewrittenQuery, rewrite_named_parameters};
pub use pool::CredentialPool;
pub use product::{
    DatabaseProduct, DefaultProduct, Message, PostgresProduct, ProductRegistry, Severity,
};
pub use results::{ExecutionResults, Phase};
pub use session::{Session, SessionTask};
pub use sqlx_driver::SqlxDriver;
