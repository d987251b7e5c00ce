//! DuckDB-backed relational store for the dataload pipeline.
//!
//! - [`DbConnection`]: statement execution, queries, transactions and bulk
//!   inserts, with one handle per thread via [`DbConnection::try_clone`]
//! - [`lock`]: exclusive process lock on the database file
//! - catalog lookups (`table_exists`, `table_columns`) used for visibility polling
//! - [`AdminLog`]: the LoadProfile and error-log tables

pub mod admin;
pub mod backend;
mod catalog;
pub mod lock;

pub use admin::{AdminLog, ErrorLogEntry, LoadProfile};
pub use backend::{AccessMode, BackendError, DbConnection, DbRow, DbTransaction, DbValue, FromDbValue};
pub use catalog::CatalogColumn;
pub use lock::{lock_path_for, try_lock_exclusive, DbLockGuard, LockError};
