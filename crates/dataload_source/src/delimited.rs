//! Delimited text reader.

use std::path::Path;

use dataload_protocol::RowSet;
use tracing::debug;

use crate::error::ParseError;
use crate::infer::type_rows;
use crate::sniff::detect_delimiter;
use crate::{ParsedFile, SchemaHint};

/// Decode file bytes as UTF-8, falling back to Latin-1 byte-for-char.
pub fn decode_text(bytes: Vec<u8>) -> String {
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().iter().map(|&b| b as char).collect(),
    };
    match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}

/// Header names trimmed, blanks named by position, repeats suffixed.
/// Repeats compare case-insensitively, as the store does.
fn normalize_headers(raw: &csv::StringRecord) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for (i, name) in raw.iter().enumerate() {
        let name = name.trim();
        let base = if name.is_empty() {
            format!("column_{}", i + 1)
        } else {
            name.to_string()
        };
        let mut candidate = base.clone();
        let mut n = 2;
        while out.iter().any(|name| name.eq_ignore_ascii_case(&candidate)) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        out.push(candidate);
    }
    out
}

pub fn read_delimited(
    path: &Path,
    text: &str,
    candidates: &[u8],
    hint: Option<&SchemaHint>,
) -> Result<ParsedFile, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty(path.to_path_buf()));
    }

    let delimiter = match hint {
        Some(hint) => hint.delimiter,
        None => detect_delimiter(text, candidates),
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut records = reader.records();

    let headers = match hint {
        Some(hint) => hint.columns.clone(),
        None => match records.next() {
            Some(first) => normalize_headers(&first.map_err(|source| ParseError::Csv {
                path: path.to_path_buf(),
                source,
            })?),
            None => return Err(ParseError::Empty(path.to_path_buf())),
        },
    };

    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    let mut error_rows = 0usize;
    for (index, record) in records.enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                debug!(file = %path.display(), record = index, "unreadable record: {}", err);
                error_rows += 1;
                continue;
            }
        };
        if record.len() == 1 && record.get(0).map_or(false, str::is_empty) {
            continue;
        }
        if record.len() != headers.len() {
            if index == 0 && raw_rows.is_empty() {
                if let Some(hint) = hint {
                    return Err(ParseError::HintMismatch {
                        path: path.to_path_buf(),
                        expected: hint.columns.len(),
                        found: record.len(),
                    });
                }
            }
            error_rows += 1;
            continue;
        }
        raw_rows.push(record.iter().map(str::to_string).collect());
    }

    let (schema, rows) = type_rows(&headers, &raw_rows);
    Ok(ParsedFile {
        rows: RowSet::new(schema, rows),
        delimiter: Some(delimiter as char),
        error_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataload_protocol::{DataType, Value};

    const CANDIDATES: &[u8] = &[b',', b'\t', b'|', b';'];

    fn parse(text: &str) -> ParsedFile {
        read_delimited(Path::new("t.csv"), text, CANDIDATES, None).unwrap()
    }

    #[test]
    fn reads_header_and_typed_rows() {
        let parsed = parse("id,name\n1,Alice\n2,Bob\n");
        assert_eq!(parsed.delimiter, Some(','));
        assert_eq!(parsed.rows.schema.column_names(), vec!["id", "name"]);
        assert_eq!(parsed.rows.schema.columns()[0].data_type, DataType::Int64);
        assert_eq!(parsed.rows.rows[1], vec![Value::Int(2), Value::Text("Bob".into())]);
        assert_eq!(parsed.error_rows, 0);
    }

    #[test]
    fn trims_whitespace_and_counts_ragged_rows() {
        let parsed = parse("id ; name\n 1 ; Alice \n2;Bob\n3;Cy\n4;Di\n5;Ed;extra\n");
        assert_eq!(parsed.delimiter, Some(';'));
        assert_eq!(parsed.rows.schema.column_names(), vec!["id", "name"]);
        assert_eq!(parsed.rows.row_count(), 4);
        assert_eq!(parsed.error_rows, 1);
        assert_eq!(parsed.rows.rows[0][1], Value::Text("Alice".into()));
    }

    #[test]
    fn blank_and_repeated_headers_are_named() {
        let parsed = parse("a,,a\n1,2,3\n");
        assert_eq!(parsed.rows.schema.column_names(), vec!["a", "column_2", "a_2"]);
    }

    #[test]
    fn headers_differing_only_in_case_are_suffixed() {
        let parsed = parse("Id,id,ID\n1,2,3\n");
        assert_eq!(parsed.rows.schema.column_names(), vec!["Id", "id_2", "ID_3"]);
        assert_eq!(parsed.rows.schema.clashing_column(), None);
    }

    #[test]
    fn header_only_file_has_no_rows() {
        let parsed = parse("id,name\n");
        assert_eq!(parsed.rows.row_count(), 0);
        assert_eq!(parsed.rows.schema.len(), 2);
    }

    #[test]
    fn empty_file_is_rejected() {
        let err = read_delimited(Path::new("e.csv"), " \n", CANDIDATES, None).unwrap_err();
        assert!(matches!(err, ParseError::Empty(_)));
    }

    #[test]
    fn hint_forces_headerless_layout() {
        let hint = SchemaHint::new(vec!["code".into(), "label".into()], b'|');
        let parsed =
            read_delimited(Path::new("h.txt"), "A|first\nB|second\n", CANDIDATES, Some(&hint))
                .unwrap();
        assert_eq!(parsed.rows.row_count(), 2);
        assert_eq!(parsed.rows.schema.column_names(), vec!["code", "label"]);
        assert_eq!(parsed.delimiter, Some('|'));

        let err = read_delimited(Path::new("h.txt"), "A|b|c\n", CANDIDATES, Some(&hint))
            .unwrap_err();
        assert!(matches!(err, ParseError::HintMismatch { expected: 2, found: 3, .. }));
    }

    #[test]
    fn latin1_bytes_are_decoded() {
        let text = decode_text(b"name\nJos\xe9\n".to_vec());
        assert!(text.ends_with("José\n"));
        assert_eq!(decode_text("\u{feff}a,b".as_bytes().to_vec()), "a,b");
    }
}
