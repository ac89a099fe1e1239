//! Data models for the session engine.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod dataset;
pub mod query;

// Re-export commonly used types
pub use connection::{ConnectionTarget, Credential, DatabaseType, TargetError};
pub use dataset::{ColumnMetadata, DataSet, DataSetKind};
pub use query::{
    DEFAULT_MAX_ROWS, Direction, MAX_ROW_LIMIT, NamedParameter, ParamKind, Query, QueryKind,
    Value,
};
