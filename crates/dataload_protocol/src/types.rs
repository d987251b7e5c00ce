use crate::defaults::{META_FILE_NAME, META_LOAD_DATETIME, META_PROFILE_KEY};
use crate::naming::quote_qualified;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Column type as inferred from file content and declared in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    Date,
    Timestamp,
    #[default]
    String,
}

impl DataType {
    /// Declared SQL type, as the store's catalog reports it back.
    pub fn sql_type(&self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Int64 => "BIGINT",
            DataType::Float64 => "DOUBLE",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
            DataType::String => "VARCHAR",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered column layout of a row-set or table. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// First column the store would reject as a duplicate once the metadata
    /// columns are prepended. Identifiers compare case-insensitively.
    pub fn clashing_column(&self) -> Option<&str> {
        let mut seen: HashSet<String> = [META_PROFILE_KEY, META_FILE_NAME, META_LOAD_DATETIME]
            .iter()
            .map(|name| name.to_string())
            .collect();
        self.columns
            .iter()
            .find(|c| !seen.insert(c.name.to_lowercase()))
            .map(|c| c.name.as_str())
    }

    /// Column definitions for `CREATE TABLE`.
    pub fn column_ddl(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{} {}", crate::naming::quote_ident(&c.name), c.data_type))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// One typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

/// Parsed content of one file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    pub schema: TableSchema,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(schema: TableSchema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows whose full tuple repeats an earlier row.
    pub fn duplicate_rows(&self) -> usize {
        const SEP: char = '\u{1f}';
        let mut seen = HashSet::with_capacity(self.rows.len());
        let mut duplicates = 0;
        for row in &self.rows {
            let mut key = String::new();
            for value in row {
                key.push_str(&format!("{:?}", value));
                key.push(SEP);
            }
            if !seen.insert(key) {
                duplicates += 1;
            }
        }
        duplicates
    }

    /// Prepend `datafilestagehk`, `filename` and `load_datetime` to every row.
    pub fn with_metadata(
        self,
        profile_key: &str,
        file_name: &str,
        load_datetime: NaiveDateTime,
    ) -> RowSet {
        let mut columns = vec![
            ColumnDef::new(META_PROFILE_KEY, DataType::String),
            ColumnDef::new(META_FILE_NAME, DataType::String),
            ColumnDef::new(META_LOAD_DATETIME, DataType::Timestamp),
        ];
        columns.extend(self.schema.columns);

        let rows = self
            .rows
            .into_iter()
            .map(|row| {
                let mut out = Vec::with_capacity(row.len() + 3);
                out.push(Value::Text(profile_key.to_string()));
                out.push(Value::Text(file_name.to_string()));
                out.push(Value::Timestamp(load_datetime));
                out.extend(row);
                out
            })
            .collect();

        RowSet::new(TableSchema::new(columns), rows)
    }
}

/// A table in the store, addressed by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Same namespace, different table.
    pub fn sibling(&self, table: impl Into<String>) -> Self {
        Self::new(self.schema.clone(), table)
    }

    /// Quoted `"schema"."table"` for SQL.
    pub fn qualified(&self) -> String {
        quote_qualified(&self.schema, &self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RowSet {
        RowSet::new(
            TableSchema::new(vec![
                ColumnDef::new("id", DataType::Int64),
                ColumnDef::new("name", DataType::String),
            ]),
            vec![
                vec![Value::Int(1), Value::Text("Alice".into())],
                vec![Value::Int(2), Value::Text("Bob".into())],
                vec![Value::Int(1), Value::Text("Alice".into())],
            ],
        )
    }

    #[test]
    fn duplicate_rows_counts_repeats_only() {
        assert_eq!(sample().duplicate_rows(), 1);
        assert_eq!(RowSet::default().duplicate_rows(), 0);
    }

    #[test]
    fn clashing_column_catches_metadata_names_and_case_repeats() {
        assert_eq!(sample().schema.clashing_column(), None);

        let schema = |names: &[&str]| {
            TableSchema::new(names.iter().map(|n| ColumnDef::new(*n, DataType::String)).collect())
        };
        assert_eq!(schema(&["id", "filename"]).clashing_column(), Some("filename"));
        assert_eq!(schema(&["Load_DateTime"]).clashing_column(), Some("Load_DateTime"));
        assert_eq!(schema(&["Id", "name", "id"]).clashing_column(), Some("id"));
    }

    #[test]
    fn with_metadata_prepends_columns_in_order() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let rows = sample().with_metadata("abc", "orders.csv", ts);

        assert_eq!(
            rows.schema.column_names(),
            vec!["datafilestagehk", "filename", "load_datetime", "id", "name"]
        );
        assert_eq!(rows.rows[0][0], Value::Text("abc".into()));
        assert_eq!(rows.rows[0][2], Value::Timestamp(ts));
        assert_eq!(rows.rows[0][3], Value::Int(1));
    }

    #[test]
    fn column_ddl_quotes_names() {
        let ddl = sample().schema.column_ddl();
        assert_eq!(ddl, "\"id\" BIGINT, \"name\" VARCHAR");
    }

    #[test]
    fn table_ref_display_and_quoting() {
        let t = TableRef::new("sales", "orders");
        assert_eq!(t.to_string(), "sales.orders");
        assert_eq!(t.qualified(), "\"sales\".\"orders\"");
        assert_eq!(t.sibling("orders_x").table, "orders_x");
    }
}
