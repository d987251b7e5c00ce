//! Database backend abstraction layer.
//!
//! DuckDB-only synchronous backend.
//! - One exclusive process lock per database file
//! - One `DbConnection` per thread, cloned from the first via [`DbConnection::try_clone`]

use chrono::{NaiveDate, NaiveDateTime};
use dataload_protocol::naming::quote_ident;
use dataload_protocol::{TableRef, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug_span, info};

use crate::lock::{try_lock_exclusive, DbLockGuard, LockError};

/// Errors from database backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database is locked by another process: {0}")]
    Locked(String),

    #[error("Operation requires write access but database is read-only")]
    ReadOnly,

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

impl From<LockError> for BackendError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Locked(p) => BackendError::Locked(p.display().to_string()),
            LockError::CreateFailed(io) => BackendError::Database(format!("Lock file error: {}", io)),
            LockError::AcquireFailed(io) => {
                BackendError::Database(format!("Lock acquire error: {}", io))
            }
        }
    }
}

/// Database access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-write access (requires exclusive lock)
    ReadWrite,
    /// Read-only access (can coexist with other readers)
    ReadOnly,
}

/// Value type for query parameters and results.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl From<i32> for DbValue {
    fn from(v: i32) -> Self {
        DbValue::Integer(v as i64)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<u64> for DbValue {
    fn from(v: u64) -> Self {
        DbValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Real(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Boolean(v)
    }
}

impl From<NaiveDateTime> for DbValue {
    fn from(v: NaiveDateTime) -> Self {
        DbValue::Timestamp(v)
    }
}

impl From<NaiveDate> for DbValue {
    fn from(v: NaiveDate) -> Self {
        DbValue::Date(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DbValue::Null,
        }
    }
}

impl From<&Value> for DbValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => DbValue::Null,
            Value::Bool(b) => DbValue::Boolean(*b),
            Value::Int(i) => DbValue::Integer(*i),
            Value::Float(f) => DbValue::Real(*f),
            Value::Text(s) => DbValue::Text(s.clone()),
            Value::Date(d) => DbValue::Date(*d),
            Value::Timestamp(ts) => DbValue::Timestamp(*ts),
        }
    }
}

/// Row data from a query result.
#[derive(Debug, Clone)]
pub struct DbRow {
    columns: Vec<String>,
    values: Vec<DbValue>,
}

impl DbRow {
    pub fn new(columns: Vec<String>, values: Vec<DbValue>) -> Self {
        Self { columns, values }
    }

    /// Get a value by column index.
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T, BackendError> {
        self.values
            .get(index)
            .ok_or_else(|| {
                BackendError::TypeConversion(format!("Column index {} out of bounds", index))
            })
            .and_then(|v| T::from_db_value(v))
    }

    /// Get a value by column name.
    pub fn get_by_name<T: FromDbValue>(&self, name: &str) -> Result<T, BackendError> {
        let index =
            self.columns.iter().position(|c| c == name).ok_or_else(|| {
                BackendError::TypeConversion(format!("Column '{}' not found", name))
            })?;
        self.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[DbValue] {
        &self.values
    }
}

/// Trait for converting from DbValue.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError>;
}

fn null_error(type_name: &str) -> BackendError {
    BackendError::TypeConversion(format!(
        "{type_name} field is NULL - use Option<{type_name}> for nullable columns"
    ))
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            DbValue::Null => Err(null_error("i64")),
            _ => Err(BackendError::TypeConversion("Expected integer".to_string())),
        }
    }
}

impl FromDbValue for i32 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Integer(v) => i32::try_from(*v)
                .map_err(|_| BackendError::TypeConversion("Expected i32".to_string())),
            DbValue::Null => Err(null_error("i32")),
            _ => Err(BackendError::TypeConversion("Expected integer".to_string())),
        }
    }
}

impl FromDbValue for f64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Real(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v as f64),
            DbValue::Null => Err(null_error("f64")),
            _ => Err(BackendError::TypeConversion("Expected real".to_string())),
        }
    }
}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            DbValue::Null => Err(null_error("String")),
            _ => Err(BackendError::TypeConversion("Expected text".to_string())),
        }
    }
}

impl FromDbValue for bool {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Boolean(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v != 0),
            DbValue::Null => Err(null_error("bool")),
            _ => Err(BackendError::TypeConversion("Expected boolean".to_string())),
        }
    }
}

impl FromDbValue for NaiveDateTime {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Timestamp(v) => Ok(*v),
            DbValue::Text(v) => NaiveDateTime::parse_from_str(v, "%Y-%m-%d %H:%M:%S%.f")
                .map_err(|e| BackendError::TypeConversion(e.to_string())),
            DbValue::Null => Err(null_error("NaiveDateTime")),
            _ => Err(BackendError::TypeConversion("Expected timestamp".to_string())),
        }
    }
}

impl FromDbValue for NaiveDate {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Date(v) => Ok(*v),
            DbValue::Timestamp(v) => Ok(v.date()),
            DbValue::Null => Err(null_error("NaiveDate")),
            _ => Err(BackendError::TypeConversion("Expected date".to_string())),
        }
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Null => Ok(None),
            _ => T::from_db_value(value).map(Some),
        }
    }
}

/// DuckDB connection handle.
///
/// Not `Clone`: each thread takes its own handle through [`try_clone`](Self::try_clone).
/// All handles cloned from one another share one database instance and one
/// process lock.
pub struct DbConnection {
    conn: duckdb::Connection,
    access_mode: AccessMode,
    /// Holds the exclusive file lock via RAII - not read, but dropping the last
    /// handle releases the lock.
    #[allow(dead_code)]
    lock_guard: Option<Arc<DbLockGuard>>,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("backend", &"DuckDB")
            .field("access_mode", &self.access_mode)
            .finish()
    }
}

impl DbConnection {
    /// Open a database file, or an in-memory database for `:memory:`.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        if path.as_os_str() == ":memory:" {
            return Self::open_duckdb_memory();
        }
        Self::open_duckdb(path)
    }

    /// Open a DuckDB database with exclusive write lock.
    ///
    /// DuckDB only allows one writer process at a time. This function acquires
    /// an exclusive lock before opening the database.
    pub fn open_duckdb(path: &Path) -> Result<Self, BackendError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                BackendError::Database(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let lock_guard = try_lock_exclusive(path)?;
        let conn = duckdb::Connection::open(path)?;
        info!(
            "Opened DuckDB database with exclusive lock: {}",
            path.display()
        );

        Ok(Self {
            conn,
            access_mode: AccessMode::ReadWrite,
            lock_guard: Some(Arc::new(lock_guard)),
        })
    }

    /// Open a DuckDB database in read-only mode (no lock required).
    pub fn open_duckdb_readonly(path: &Path) -> Result<Self, BackendError> {
        use duckdb::{AccessMode as DuckAccessMode, Config};

        let config = Config::default().access_mode(DuckAccessMode::ReadOnly)?;
        let conn = duckdb::Connection::open_with_flags(path, config)?;
        info!("Opened DuckDB database (read-only): {}", path.display());

        Ok(Self {
            conn,
            access_mode: AccessMode::ReadOnly,
            lock_guard: None,
        })
    }

    /// Open an in-memory DuckDB database (for testing).
    pub fn open_duckdb_memory() -> Result<Self, BackendError> {
        let conn = duckdb::Connection::open_in_memory()?;
        info!("Opened in-memory DuckDB database");

        Ok(Self {
            conn,
            access_mode: AccessMode::ReadWrite,
            lock_guard: None,
        })
    }

    /// New handle on the same database, for use on another thread.
    pub fn try_clone(&self) -> Result<Self, BackendError> {
        Ok(Self {
            conn: self.conn.try_clone()?,
            access_mode: self.access_mode,
            lock_guard: self.lock_guard.clone(),
        })
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn is_writable(&self) -> bool {
        self.access_mode == AccessMode::ReadWrite
    }

    /// Execute a SQL statement (no results).
    pub fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
        if self.access_mode == AccessMode::ReadOnly {
            return Err(BackendError::ReadOnly);
        }

        execute_on_conn(&self.conn, sql, params)
    }

    /// Execute a batch of SQL statements.
    pub fn execute_batch(&self, sql: &str) -> Result<(), BackendError> {
        if self.access_mode == AccessMode::ReadOnly {
            return Err(BackendError::ReadOnly);
        }

        execute_batch_on_conn(&self.conn, sql)
    }

    /// Bulk insert rows into a table.
    ///
    /// Column order must match the row value order.
    pub fn bulk_insert_rows(
        &self,
        table: &TableRef,
        columns: &[&str],
        rows: &[Vec<DbValue>],
    ) -> Result<u64, BackendError> {
        if self.access_mode == AccessMode::ReadOnly {
            return Err(BackendError::ReadOnly);
        }

        bulk_insert_rows_internal(&self.conn, table, columns, rows)
    }

    /// Query and return all rows.
    pub fn query_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, BackendError> {
        query_on_conn(&self.conn, sql, params)
    }

    /// Query and return the first row, if any.
    pub fn query_optional(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Option<DbRow>, BackendError> {
        let rows = self.query_all(sql, params)?;
        Ok(rows.into_iter().next())
    }

    /// Query and return exactly one row.
    pub fn query_one(&self, sql: &str, params: &[DbValue]) -> Result<DbRow, BackendError> {
        self.query_optional(sql, params)?
            .ok_or_else(|| BackendError::Query("Expected one row, got none".to_string()))
    }

    /// Query and return a single scalar value.
    pub fn query_scalar<T: FromDbValue>(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, BackendError> {
        let row = self.query_one(sql, params)?;
        row.get(0)
    }

    /// Run `op` inside `BEGIN` / `COMMIT`, rolling back on error.
    pub fn transaction<T, F>(&self, op: F) -> Result<T, BackendError>
    where
        F: for<'a> FnOnce(&'a mut DbTransaction<'a>) -> Result<T, BackendError>,
    {
        if self.access_mode == AccessMode::ReadOnly {
            return Err(BackendError::ReadOnly);
        }

        self.conn.execute_batch("BEGIN")?;
        let mut tx = DbTransaction { conn: &self.conn };
        let result = op(&mut tx);

        match result {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => match self.conn.execute_batch("ROLLBACK") {
                Ok(()) => Err(err),
                Err(rollback_err) => Err(BackendError::Transaction(format!(
                    "Transaction failed: {}; rollback failed: {}",
                    err, rollback_err
                ))),
            },
        }
    }
}

/// Transaction wrapper for DuckDB.
pub struct DbTransaction<'a> {
    conn: &'a duckdb::Connection,
}

impl<'a> DbTransaction<'a> {
    pub fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
        execute_on_conn(self.conn, sql, params)
    }

    pub fn execute_batch(&mut self, sql: &str) -> Result<(), BackendError> {
        execute_batch_on_conn(self.conn, sql)
    }

    pub fn query_all(&mut self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, BackendError> {
        query_on_conn(self.conn, sql, params)
    }

    pub fn query_scalar<T: FromDbValue>(
        &mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, BackendError> {
        let row = self
            .query_all(sql, params)?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Query("Expected one row, got none".to_string()))?;
        row.get(0)
    }

    /// Bulk insert rows into a table within this transaction.
    pub fn bulk_insert_rows(
        &mut self,
        table: &TableRef,
        columns: &[&str],
        rows: &[Vec<DbValue>],
    ) -> Result<u64, BackendError> {
        bulk_insert_rows_internal(self.conn, table, columns, rows)
    }
}

fn execute_on_conn(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[DbValue],
) -> Result<u64, BackendError> {
    let op = sql_op_name(sql);
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.exec",
        op = op,
        sql_hash = %sql_hash,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare(sql)?;
    let duckdb_params = to_duckdb_params(params);
    let param_refs: Vec<&dyn duckdb::ToSql> = duckdb_params
        .iter()
        .map(|v| v as &dyn duckdb::ToSql)
        .collect();
    let rows = stmt.execute(param_refs.as_slice())?;
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(rows as u64)
}

fn execute_batch_on_conn(conn: &duckdb::Connection, sql: &str) -> Result<(), BackendError> {
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.exec_batch",
        op = "BATCH",
        sql_hash = %sql_hash,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();
    conn.execute_batch(sql)?;
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(())
}

fn query_on_conn(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[DbValue],
) -> Result<Vec<DbRow>, BackendError> {
    let op = sql_op_name(sql);
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.query",
        op = op,
        sql_hash = %sql_hash,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare(sql)?;
    let duckdb_params = to_duckdb_params(params);
    let param_refs: Vec<&dyn duckdb::ToSql> = duckdb_params
        .iter()
        .map(|v| v as &dyn duckdb::ToSql)
        .collect();

    let mut rows_iter = stmt.query(param_refs.as_slice())?;

    let (column_count, columns) = if let Some(stmt_ref) = rows_iter.as_ref() {
        let count = stmt_ref.column_count();
        let cols: Vec<String> = (0..count)
            .map(|i| {
                stmt_ref
                    .column_name(i)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| format!("col{}", i))
            })
            .collect();
        (count, cols)
    } else {
        return Ok(Vec::new());
    };

    let mut result = Vec::new();
    while let Some(row) = rows_iter.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(duckdb_value_to_db_value(row, i)?);
        }
        result.push(DbRow::new(columns.clone(), values));
    }

    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(result)
}

const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn to_duckdb_params(params: &[DbValue]) -> Vec<duckdb::types::Value> {
    use chrono::Datelike;
    use duckdb::types::{TimeUnit, Value as DuckValue};

    params
        .iter()
        .map(|p| match p {
            DbValue::Null => DuckValue::Null,
            DbValue::Integer(v) => DuckValue::BigInt(*v),
            DbValue::Real(v) => DuckValue::Double(*v),
            DbValue::Text(v) => DuckValue::Text(v.clone()),
            DbValue::Boolean(v) => DuckValue::Boolean(*v),
            DbValue::Date(d) => DuckValue::Date32(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
            DbValue::Timestamp(ts) => {
                DuckValue::Timestamp(TimeUnit::Microsecond, ts.and_utc().timestamp_micros())
            }
        })
        .collect()
}

fn micros_from(unit: duckdb::types::TimeUnit, v: i64) -> i64 {
    use duckdb::types::TimeUnit;
    match unit {
        TimeUnit::Second => v * 1_000_000,
        TimeUnit::Millisecond => v * 1_000,
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

fn duckdb_value_to_db_value(row: &duckdb::Row, index: usize) -> Result<DbValue, duckdb::Error> {
    use duckdb::types::ValueRef;

    match row.get_ref(index)? {
        ValueRef::Null => Ok(DbValue::Null),
        ValueRef::Boolean(v) => Ok(DbValue::Boolean(v)),
        ValueRef::TinyInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::SmallInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::Int(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::BigInt(v) => Ok(DbValue::Integer(v)),
        ValueRef::HugeInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::UTinyInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::USmallInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::UInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::UBigInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::Float(v) => Ok(DbValue::Real(v as f64)),
        ValueRef::Double(v) => Ok(DbValue::Real(v)),
        ValueRef::Text(v) => Ok(DbValue::Text(String::from_utf8_lossy(v).to_string())),
        ValueRef::Timestamp(unit, v) => {
            let micros = micros_from(unit, v);
            match chrono::DateTime::from_timestamp_micros(micros) {
                Some(dt) => Ok(DbValue::Timestamp(dt.naive_utc())),
                None => Ok(DbValue::Integer(micros)),
            }
        }
        ValueRef::Date32(days) => {
            match NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_DAYS_FROM_CE + days) {
                Some(date) => Ok(DbValue::Date(date)),
                None => Ok(DbValue::Integer(days as i64)),
            }
        }
        other => {
            tracing::warn!(
                "DuckDB type {:?} at column {} mapped to debug string",
                std::mem::discriminant(&other),
                index
            );
            Ok(DbValue::Text(format!("{:?}", other)))
        }
    }
}

const DEFAULT_MAX_PARAMS: usize = 999;

fn bulk_insert_rows_internal(
    conn: &duckdb::Connection,
    table: &TableRef,
    columns: &[&str],
    rows: &[Vec<DbValue>],
) -> Result<u64, BackendError> {
    if rows.is_empty() {
        return Ok(0);
    }
    if columns.is_empty() {
        return Err(BackendError::InvalidInput(
            "bulk_insert_rows requires at least one column".to_string(),
        ));
    }

    for (index, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(BackendError::InvalidInput(format!(
                "Row {} has {} values, expected {}",
                index,
                row.len(),
                columns.len()
            )));
        }
    }

    let total_params = rows.len().saturating_mul(columns.len());
    if total_params <= DEFAULT_MAX_PARAMS {
        return bulk_insert_rows_generic(conn, table, columns, rows, DEFAULT_MAX_PARAMS);
    }

    bulk_insert_rows_appender(conn, table, rows)
}

fn bulk_insert_rows_appender(
    conn: &duckdb::Connection,
    table: &TableRef,
    rows: &[Vec<DbValue>],
) -> Result<u64, BackendError> {
    let mut appender = conn.appender_to_db(&table.table, &table.schema)?;
    for row in rows {
        let duckdb_params = to_duckdb_params(row);
        let param_refs: Vec<&dyn duckdb::ToSql> = duckdb_params
            .iter()
            .map(|v| v as &dyn duckdb::ToSql)
            .collect();
        appender.append_row(param_refs.as_slice())?;
    }
    appender.flush()?;
    Ok(rows.len() as u64)
}

fn bulk_insert_rows_generic(
    conn: &duckdb::Connection,
    table: &TableRef,
    columns: &[&str],
    rows: &[Vec<DbValue>],
    max_params: usize,
) -> Result<u64, BackendError> {
    let cols_len = columns.len();
    if cols_len > max_params {
        return Err(BackendError::InvalidInput(format!(
            "Too many columns ({}) for max params ({})",
            cols_len, max_params
        )));
    }

    let rows_per_chunk = max_params / cols_len;
    let quoted_cols = columns
        .iter()
        .map(|col| quote_ident(col))
        .collect::<Vec<_>>()
        .join(", ");
    let row_clause = format!("({})", vec!["?"; cols_len].join(", "));

    let mut total = 0;
    for chunk in rows.chunks(rows_per_chunk) {
        let values_clause = std::iter::repeat(row_clause.as_str())
            .take(chunk.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            table.qualified(),
            quoted_cols,
            values_clause
        );
        let params: Vec<DbValue> = chunk.iter().flatten().cloned().collect();
        execute_on_conn(conn, &sql, &params)?;
        total += chunk.len() as u64;
    }

    Ok(total)
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

fn hash_sql(sql: &str) -> String {
    // FNV-1a 64-bit hash for low-cardinality, stable identification.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(conn: &DbConnection) -> TableRef {
        conn.execute_batch("CREATE TABLE t (id BIGINT, name TEXT)")
            .unwrap();
        TableRef::new("main", "t")
    }

    #[test]
    fn bulk_insert_rows_inserts_expected_rows() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        let t = table(&conn);

        let rows = vec![
            vec![DbValue::from(1_i64), DbValue::from("alpha")],
            vec![DbValue::from(2_i64), DbValue::from("beta")],
        ];
        let inserted = conn.bulk_insert_rows(&t, &["id", "name"], &rows).unwrap();

        assert_eq!(inserted, 2);
        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn bulk_insert_rows_uses_appender_for_large_batches() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        let t = table(&conn);

        let rows: Vec<Vec<DbValue>> = (0..2_000_i64)
            .map(|i| vec![DbValue::from(i), DbValue::from(format!("row-{i}"))])
            .collect();
        let inserted = conn.bulk_insert_rows(&t, &["id", "name"], &rows).unwrap();

        assert_eq!(inserted, 2_000);
        let max: i64 = conn.query_scalar("SELECT MAX(id) FROM t", &[]).unwrap();
        assert_eq!(max, 1_999);
    }

    #[test]
    fn bulk_insert_rows_rejects_mismatched_row_len() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        let t = table(&conn);

        let rows = vec![
            vec![DbValue::from(1_i64)],
            vec![DbValue::from(2_i64), DbValue::from("beta")],
        ];
        let err = conn
            .bulk_insert_rows(&t, &["id", "name"], &rows)
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidInput(_)));
    }

    #[test]
    fn bulk_insert_rows_empty_is_noop() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        let t = table(&conn);

        let inserted = conn.bulk_insert_rows(&t, &["id"], &[]).unwrap();
        assert_eq!(inserted, 0);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        table(&conn);

        let result: Result<(), BackendError> = conn.transaction(|tx| {
            tx.execute("INSERT INTO t VALUES (1, 'a')", &[])?;
            Err(BackendError::Query("boom".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn timestamps_and_dates_round_trip() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        conn.execute_batch("CREATE TABLE ts (at TIMESTAMP, d DATE)")
            .unwrap();
        let at = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        let d = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        conn.execute("INSERT INTO ts VALUES (?, ?)", &[at.into(), d.into()])
            .unwrap();

        let row = conn.query_one("SELECT at, d FROM ts", &[]).unwrap();
        let got: NaiveDateTime = row.get(0).unwrap();
        assert_eq!(got, at);
        assert!(matches!(row.values().get(1), Some(DbValue::Date(v)) if *v == d));
    }

    #[test]
    fn hash_sql_is_stable() {
        assert_eq!(hash_sql("SELECT 1"), hash_sql("SELECT 1"));
        assert_ne!(hash_sql("SELECT 1"), hash_sql("SELECT 2"));
        assert_eq!(sql_op_name("  INSERT INTO t"), "INSERT");
    }
}
