//! Canonical default values shared across the engine and the store.

/// Namespace holding the load-profile and error-log tables.
pub const DEFAULT_ADMIN_SCHEMA: &str = "_admin";

/// Load-profile table (one row per processed file).
pub const LOAD_PROFILE_TABLE: &str = "datafilestagelog";

/// Error-log table (append-only, keyed by profile key).
pub const ERROR_LOG_TABLE: &str = "datafilestageerrorlog";

/// Metadata columns prepended to every row-set, in order.
pub const META_PROFILE_KEY: &str = "datafilestagehk";
pub const META_FILE_NAME: &str = "filename";
pub const META_LOAD_DATETIME: &str = "load_datetime";

/// Sub-folder of a table folder that receives new files.
pub const DROP_DIR: &str = "drop";
/// Top-level folder (under the watched root) receiving loaded files.
pub const ARCHIVE_DIR: &str = "archive";
/// Top-level folder (under the watched root) receiving rejected files.
pub const ERROR_DIR: &str = "error";

/// Delimiter used when sniffing finds no consistent candidate.
pub const FALLBACK_DELIMITER: char = '\t';

/// Supported delimiters, tried in order.
pub const DEFAULT_DELIMITERS: &[&str] = &[",", "%09", "|", ";"];

/// Default per-chunk byte budget for oversized files (about 150 MiB).
pub const DEFAULT_CHUNK_BUDGET_BYTES: u64 = 160_000_000;

/// Files above this size are routed through the chunking pipeline.
pub const DEFAULT_CHUNK_THRESHOLD_BYTES: u64 = 500 * 1024 * 1024;

/// Rows per bulk-insert batch.
pub const DEFAULT_INSERT_BATCH_ROWS: usize = 10_000;
