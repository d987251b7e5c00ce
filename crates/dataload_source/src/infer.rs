//! Elimination-based column type inference.
//!
//! Every value in a column is seen. Each candidate type stays possible until a
//! value proves it impossible; the column resolves to the most specific type
//! still standing, with `String` as the floor.

use chrono::{NaiveDate, NaiveDateTime};
use dataload_protocol::{ColumnDef, DataType, TableSchema, Value};

/// Date layouts accepted for `DATE` columns, in preference order.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];

/// Timestamp layouts accepted for `TIMESTAMP` columns, in preference order.
pub const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

/// Resolution order, most specific first.
const PRIORITY: [DataType; 5] = [
    DataType::Boolean,
    DataType::Int64,
    DataType::Float64,
    DataType::Date,
    DataType::Timestamp,
];

pub fn is_null_token(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("null") || value == "NA"
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("no") {
        Some(false)
    } else {
        None
    }
}

/// Zero-padded integers ("007") are identifiers, not numbers.
fn has_leading_zero(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.")
}

/// Tracks the types (and date layouts) a column can still be.
#[derive(Debug)]
pub struct ColumnSolver {
    possible: Vec<DataType>,
    date_formats: Vec<&'static str>,
    timestamp_formats: Vec<&'static str>,
    non_null: usize,
}

impl Default for ColumnSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnSolver {
    pub fn new() -> Self {
        Self {
            possible: PRIORITY.to_vec(),
            date_formats: DATE_FORMATS.to_vec(),
            timestamp_formats: TIMESTAMP_FORMATS.to_vec(),
            non_null: 0,
        }
    }

    pub fn add_value(&mut self, raw: &str) {
        let value = raw.trim();
        if is_null_token(value) {
            return;
        }
        self.non_null += 1;

        let leading_zero = has_leading_zero(value);
        self.possible.retain(|ty| match ty {
            DataType::Boolean => parse_bool(value).is_some(),
            DataType::Int64 => !leading_zero && value.parse::<i64>().is_ok(),
            DataType::Float64 => {
                !leading_zero && value.parse::<f64>().map_or(false, |f| f.is_finite())
            }
            _ => true,
        });

        self.date_formats
            .retain(|fmt| NaiveDate::parse_from_str(value, fmt).is_ok());
        if self.date_formats.is_empty() {
            self.possible.retain(|ty| *ty != DataType::Date);
        }

        self.timestamp_formats
            .retain(|fmt| NaiveDateTime::parse_from_str(value, fmt).is_ok());
        if self.timestamp_formats.is_empty() {
            self.possible.retain(|ty| *ty != DataType::Timestamp);
        }
    }

    /// Resolved type. Columns with no non-null values are strings.
    pub fn resolve(&self) -> ColumnType {
        if self.non_null == 0 {
            return ColumnType::plain(DataType::String);
        }
        match PRIORITY.iter().find(|ty| self.possible.contains(ty)) {
            Some(DataType::Date) => ColumnType {
                data_type: DataType::Date,
                format: self.date_formats.first().copied(),
            },
            Some(DataType::Timestamp) => ColumnType {
                data_type: DataType::Timestamp,
                format: self.timestamp_formats.first().copied(),
            },
            Some(ty) => ColumnType::plain(*ty),
            None => ColumnType::plain(DataType::String),
        }
    }
}

/// A resolved column type plus the layout used to read temporal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnType {
    pub data_type: DataType,
    pub format: Option<&'static str>,
}

impl ColumnType {
    fn plain(data_type: DataType) -> Self {
        Self {
            data_type,
            format: None,
        }
    }

    /// Convert one raw cell. Values that no longer fit become text, which
    /// cannot happen for a column resolved from the same values.
    pub fn convert(&self, raw: &str) -> Value {
        let value = raw.trim();
        if is_null_token(value) {
            return Value::Null;
        }
        let parsed = match self.data_type {
            DataType::Boolean => parse_bool(value).map(Value::Bool),
            DataType::Int64 => value.parse().ok().map(Value::Int),
            DataType::Float64 => value.parse().ok().map(Value::Float),
            DataType::Date => self
                .format
                .and_then(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
                .map(Value::Date),
            DataType::Timestamp => self
                .format
                .and_then(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(Value::Timestamp),
            DataType::String => None,
        };
        parsed.unwrap_or_else(|| Value::Text(value.to_string()))
    }
}

/// Infer a schema for `headers` from string cells and convert every row.
pub fn type_rows(headers: &[String], raw_rows: &[Vec<String>]) -> (TableSchema, Vec<Vec<Value>>) {
    let mut solvers: Vec<ColumnSolver> = headers.iter().map(|_| ColumnSolver::new()).collect();
    for row in raw_rows {
        for (solver, cell) in solvers.iter_mut().zip(row) {
            solver.add_value(cell);
        }
    }

    let types: Vec<ColumnType> = solvers.iter().map(ColumnSolver::resolve).collect();
    let schema = TableSchema::new(
        headers
            .iter()
            .zip(&types)
            .map(|(name, ty)| ColumnDef::new(name.clone(), ty.data_type))
            .collect(),
    );

    let rows = raw_rows
        .iter()
        .map(|row| {
            types
                .iter()
                .enumerate()
                .map(|(i, ty)| row.get(i).map_or(Value::Null, |cell| ty.convert(cell)))
                .collect()
        })
        .collect();

    (schema, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(values: &[&str]) -> DataType {
        let mut solver = ColumnSolver::new();
        for v in values {
            solver.add_value(v);
        }
        solver.resolve().data_type
    }

    #[test]
    fn integers_stay_integers() {
        assert_eq!(resolve(&["1", "2", "-30"]), DataType::Int64);
    }

    #[test]
    fn one_decimal_widens_to_float() {
        assert_eq!(resolve(&["1", "2.5"]), DataType::Float64);
    }

    #[test]
    fn leading_zeros_are_text() {
        assert_eq!(resolve(&["007", "012"]), DataType::String);
        assert_eq!(resolve(&["0", "0.5"]), DataType::Float64);
    }

    #[test]
    fn nulls_are_ignored() {
        assert_eq!(resolve(&["", "NULL", "4"]), DataType::Int64);
        assert_eq!(resolve(&["", "NA"]), DataType::String);
    }

    #[test]
    fn booleans_and_dates() {
        assert_eq!(resolve(&["true", "No"]), DataType::Boolean);
        assert_eq!(resolve(&["2024-01-31", "2024-02-01"]), DataType::Date);
        assert_eq!(
            resolve(&["2024-01-31 10:00:00", "2024-02-01T11:30:00.5"]),
            DataType::String
        );
        assert_eq!(
            resolve(&["2024-01-31 10:00:00", "2024-02-01 11:30:00.5"]),
            DataType::Timestamp
        );
    }

    #[test]
    fn day_over_twelve_proves_day_first() {
        let mut solver = ColumnSolver::new();
        for v in ["05/06/2024", "31/05/2024"] {
            solver.add_value(v);
        }
        let ty = solver.resolve();
        assert_eq!(ty.data_type, DataType::Date);
        assert_eq!(ty.format, Some("%d/%m/%Y"));
        assert_eq!(
            ty.convert("05/06/2024"),
            Value::Date(NaiveDate::from_ymd_opt(2024, 6, 5).unwrap())
        );
    }

    #[test]
    fn type_rows_pads_short_rows_with_null() {
        let headers = vec!["id".to_string(), "name".to_string()];
        let rows = vec![
            vec!["1".to_string(), " Alice ".to_string()],
            vec!["2".to_string()],
        ];
        let (schema, typed) = type_rows(&headers, &rows);
        assert_eq!(schema.columns()[0].data_type, DataType::Int64);
        assert_eq!(typed[0][1], Value::Text("Alice".into()));
        assert_eq!(typed[1][1], Value::Null);
    }
}
