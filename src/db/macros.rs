//! Backend dispatch macro for the sqlx driver.
//!
//! The sqlx driver keeps one concrete connection type per backend. This
//! macro expands the same body once per backend so generic sqlx calls can
//! be written a single time.

/// Run `$body` with `$conn` bound to the backend connection inside a
/// `SqlxHandle` (owned or borrowed, following `$handle`).
///
/// # Example
///
/// ```ignore
/// handle_dispatch!(handle, conn => conn.ping().await)
/// ```
macro_rules! handle_dispatch {
    ($handle:expr, $conn:ident => $body:expr) => {
        match $handle {
            $crate::db::sqlx_driver::SqlxHandle::MySql($conn) => $body,
            $crate::db::sqlx_driver::SqlxHandle::Postgres($conn) => $body,
            $crate::db::sqlx_driver::SqlxHandle::SQLite($conn) => $body,
        }
    };
}
