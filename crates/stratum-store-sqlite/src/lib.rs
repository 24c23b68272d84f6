//! SQLite backend for the Stratum tenant store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. One physical database holds the
//! platform tables (vault, registry, functions) and every tenant table.

mod encode;
mod functions;
mod registry;
mod schema;
mod store;
mod tenant;
mod vault;

pub mod error;

pub use error::{Error, Result};
pub use schema::SYSTEM_TABLES;
pub use store::{DEFAULT_STATEMENT_TIMEOUT, SqliteStore};
