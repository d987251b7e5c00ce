//! JSON Lines reader: one object per line, columns in first-seen order.

use std::path::Path;

use dataload_protocol::RowSet;
use serde_json::{Map, Value as JsonValue};

use crate::error::ParseError;
use crate::infer::type_rows;
use crate::ParsedFile;

fn cell_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

pub fn read_json_lines(path: &Path, text: &str) -> Result<ParsedFile, ParseError> {
    let mut headers: Vec<String> = Vec::new();
    let mut objects: Vec<Map<String, JsonValue>> = Vec::new();
    let mut error_rows = 0usize;

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: JsonValue = serde_json::from_str(line).map_err(|source| ParseError::Json {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        let JsonValue::Object(object) = parsed else {
            error_rows += 1;
            continue;
        };
        for key in object.keys() {
            if !headers.iter().any(|h| h == key) {
                headers.push(key.clone());
            }
        }
        objects.push(object);
    }

    if headers.is_empty() {
        return Err(ParseError::Empty(path.to_path_buf()));
    }

    let raw_rows: Vec<Vec<String>> = objects
        .iter()
        .map(|object| {
            headers
                .iter()
                .map(|h| object.get(h).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();

    let (schema, rows) = type_rows(&headers, &raw_rows);
    Ok(ParsedFile {
        rows: RowSet::new(schema, rows),
        delimiter: None,
        error_rows,
    })
}
