use std::fs;

use dataload_protocol::{DataType, Value};
use dataload_source::{FileSource, ParseError, SchemaHint, TabularSource};
use tempfile::TempDir;

fn source() -> FileSource {
    FileSource::new(vec![b',', b'\t', b'|', b';'])
}

#[test]
fn parses_csv_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("orders.csv");
    fs::write(&path, "id,name\n1,Alice\n2,Bob").unwrap();

    let parsed = source().parse(&path, None).unwrap();
    assert_eq!(parsed.rows.row_count(), 2);
    assert_eq!(parsed.rows.schema.columns()[0].data_type, DataType::Int64);
    assert_eq!(parsed.delimiter, Some(','));
}

#[test]
fn parses_tab_separated_text_by_fallback_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("people.txt");
    fs::write(&path, "id\tcity\n1\tOslo\n").unwrap();

    let parsed = source().parse(&path, None).unwrap();
    assert_eq!(parsed.delimiter, Some('\t'));
    assert_eq!(parsed.rows.rows[0][1], Value::Text("Oslo".into()));
}

#[test]
fn parses_json_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.JSON");
    fs::write(&path, "{\"kind\":\"a\",\"n\":1.5}\n{\"kind\":\"b\",\"n\":2}\n").unwrap();

    let parsed = source().parse(&path, None).unwrap();
    assert_eq!(parsed.rows.schema.column_names(), vec!["kind", "n"]);
    assert_eq!(parsed.rows.schema.columns()[1].data_type, DataType::Float64);
}

#[test]
fn rejects_unsupported_extensions() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.xlsx");
    fs::write(&path, b"PK\x03\x04").unwrap();

    let err = source().parse(&path, None).unwrap_err();
    assert!(matches!(err, ParseError::UnsupportedFormat(_)));
}

#[test]
fn missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = source().parse(&dir.path().join("gone.csv"), None).unwrap_err();
    assert!(matches!(err, ParseError::Io { .. }));
}

#[test]
fn hint_overrides_sniffing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fixed.dat");
    fs::write(&path, "1;x\n2;y\n").unwrap();

    let hint = SchemaHint::new(vec!["num".into(), "tag".into()], b';');
    let parsed = source().parse(&path, Some(&hint)).unwrap();
    assert_eq!(parsed.rows.schema.column_names(), vec!["num", "tag"]);
    assert_eq!(parsed.rows.row_count(), 2);
}
