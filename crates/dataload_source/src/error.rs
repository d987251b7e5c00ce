use std::path::PathBuf;
use thiserror::Error;

/// Reasons a file cannot be turned into a row-set.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed delimited data in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Malformed JSON in {path} at line {line}: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("No header or data in {0}")]
    Empty(PathBuf),

    #[error("{path}: expected {expected} columns from the registered layout, found {found}")]
    HintMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
}
