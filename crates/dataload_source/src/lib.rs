//! Tabular source adapter: turns one dropped file into a typed row-set.
//!
//! - Delimited text: the delimiter is sniffed from a configured candidate
//!   set (tab when nothing fits), UTF-8 with a Latin-1 fallback, cells
//!   trimmed, rows with the wrong field count counted as error rows.
//! - `.json`: JSON Lines.
//! - A [`SchemaHint`] registered for a table forces header-less parsing with
//!   fixed column names and a fixed delimiter.

mod delimited;
mod error;
mod infer;
mod jsonl;
mod sniff;

use std::path::Path;

use dataload_protocol::RowSet;

pub use delimited::decode_text;
pub use error::ParseError;
pub use infer::{ColumnSolver, ColumnType};
pub use sniff::{decode_delimiter, detect_delimiter};

/// Extensions never read as delimited text.
const UNSUPPORTED_EXTENSIONS: &[&str] = &["xlsx", "xls", "xml", "parquet", "zip", "gz"];

/// Fixed column layout pre-registered for a target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaHint {
    pub columns: Vec<String>,
    pub delimiter: u8,
}

impl SchemaHint {
    pub fn new(columns: Vec<String>, delimiter: u8) -> Self {
        Self { columns, delimiter }
    }
}

/// Result of parsing one file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub rows: RowSet,
    /// `None` for formats without a delimiter.
    pub delimiter: Option<char>,
    /// Rows dropped because they could not be read.
    pub error_rows: usize,
}

/// Anything that can turn a file into a row-set.
pub trait TabularSource: Send + Sync {
    fn parse(&self, path: &Path, hint: Option<&SchemaHint>) -> Result<ParsedFile, ParseError>;
}

/// The file-format dispatcher used by the pipeline.
#[derive(Debug, Clone)]
pub struct FileSource {
    delimiters: Vec<u8>,
}

impl FileSource {
    pub fn new(delimiters: Vec<u8>) -> Self {
        Self { delimiters }
    }
}

impl TabularSource for FileSource {
    fn parse(&self, path: &Path, hint: Option<&SchemaHint>) -> Result<ParsedFile, ParseError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if UNSUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(ParseError::UnsupportedFormat(path.to_path_buf()));
        }

        let bytes = std::fs::read(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = decode_text(bytes);

        if ext == "json" && hint.is_none() {
            jsonl::read_json_lines(path, &text)
        } else {
            delimited::read_delimited(path, &text, &self.delimiters, hint)
        }
    }
}
