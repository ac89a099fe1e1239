//! Client-side database session engine.
//!
//! Pools physical connections per credential, hands them to sessions for
//! exclusive use, executes queries with named parameters and walks every
//! result an execution produces (row sets, update counts, cursor and output
//! parameters). Vendor behaviour plugs in through
//! [`db::DatabaseProduct`]; the wire protocol through [`db::Driver`].

pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod models;

pub use config::Config;
pub use error::{DbError, DbResult};
