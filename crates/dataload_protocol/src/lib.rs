//! Shared vocabulary for the dataload pipeline.
//!
//! Every crate in the workspace speaks in these types:
//!
//! - [`TableSchema`]: ordered column names plus inferred types, produced by the
//!   source adapter and consumed by the create-table serializer.
//! - [`RowSet`]: a parsed file, schema plus typed rows.
//! - [`TableRef`]: a `schema.table` pair in the store.
//!
//! Naming rules (table normalization, staging-name derivation, identifier
//! quoting) live in [`naming`] so the engine and the store agree on them.

pub mod defaults;
pub mod idempotency;
pub mod naming;
pub mod types;

pub use idempotency::profile_key;
pub use types::{ColumnDef, DataType, RowSet, TableRef, TableSchema, Value};
