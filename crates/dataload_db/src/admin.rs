//! Administrative log tables: one LoadProfile row per processed file and an
//! append-only error log keyed by the profile key.
//!
//! `loadsuccessstatus = 1` is the de-duplication authority. The flip to 1 is
//! guarded in SQL so at most one row per `(filename, schemaname,
//! targettablename)` can ever carry it.

use chrono::NaiveDateTime;
use dataload_protocol::defaults::{ERROR_LOG_TABLE, LOAD_PROFILE_TABLE};
use dataload_protocol::naming::quote_qualified;
use dataload_protocol::TableRef;
use tracing::debug;

use crate::backend::{BackendError, DbConnection, DbRow, DbValue};

/// Per-file ingestion record.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadProfile {
    pub profile_key: String,
    pub file_name: String,
    pub delimiter: Option<String>,
    pub table: TableRef,
    /// Data columns only; metadata columns are not counted.
    pub column_count: i64,
    pub total_records: i64,
    pub duplicate_records: i64,
    /// Rows the reader could not parse.
    pub error_records: i64,
    pub load_success: bool,
    pub file_created_at: Option<NaiveDateTime>,
    pub load_started_at: NaiveDateTime,
    pub loaded_to_memory_at: Option<NaiveDateTime>,
    pub load_ended_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorLogEntry {
    /// Profile key, or the file name when no profile exists yet.
    pub profile_key: String,
    pub table: String,
    pub message: String,
    pub logged_at: NaiveDateTime,
    pub notification_sent: bool,
}

/// Accessor for the admin tables in one namespace.
#[derive(Debug, Clone)]
pub struct AdminLog {
    schema: String,
}

impl AdminLog {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn profile_table(&self) -> String {
        quote_qualified(&self.schema, LOAD_PROFILE_TABLE)
    }

    fn error_table(&self) -> String {
        quote_qualified(&self.schema, ERROR_LOG_TABLE)
    }

    /// Create the admin namespace and tables if missing. Run once at startup,
    /// before any worker holds a connection.
    pub fn ensure_tables(&self, conn: &DbConnection) -> Result<(), BackendError> {
        conn.ensure_schema(&self.schema)?;
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {profile} (
                datafilestagehk VARCHAR NOT NULL,
                filename VARCHAR NOT NULL,
                delimiter VARCHAR,
                targettablename VARCHAR NOT NULL,
                schemaname VARCHAR NOT NULL,
                numberofcolumns BIGINT NOT NULL,
                totalrecords BIGINT NOT NULL,
                duplicaterecords BIGINT NOT NULL,
                invalidcharactersrecords BIGINT NOT NULL,
                loadsuccessstatus INTEGER NOT NULL DEFAULT 0,
                filecreatetime TIMESTAMP,
                loadstarttime TIMESTAMP NOT NULL,
                loadtomemoryendtime TIMESTAMP,
                loadendtime TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS {errors} (
                datafilestagehk VARCHAR NOT NULL,
                targettablename VARCHAR NOT NULL,
                message VARCHAR NOT NULL,
                errordatetime TIMESTAMP NOT NULL,
                notificationsent BOOLEAN NOT NULL DEFAULT FALSE
            );
            "#,
            profile = self.profile_table(),
            errors = self.error_table(),
        ))
    }

    /// Record a freshly profiled file with status pending.
    pub fn insert_profile(
        &self,
        conn: &DbConnection,
        profile: &LoadProfile,
    ) -> Result<(), BackendError> {
        conn.execute(
            &format!(
                "INSERT INTO {} (datafilestagehk, filename, delimiter, targettablename, schemaname, \
                 numberofcolumns, totalrecords, duplicaterecords, invalidcharactersrecords, \
                 loadsuccessstatus, filecreatetime, loadstarttime, loadtomemoryendtime, loadendtime) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                self.profile_table()
            ),
            &[
                DbValue::from(profile.profile_key.as_str()),
                DbValue::from(profile.file_name.as_str()),
                DbValue::from(profile.delimiter.clone()),
                DbValue::from(profile.table.table.as_str()),
                DbValue::from(profile.table.schema.as_str()),
                DbValue::from(profile.column_count),
                DbValue::from(profile.total_records),
                DbValue::from(profile.duplicate_records),
                DbValue::from(profile.error_records),
                DbValue::from(i64::from(profile.load_success)),
                DbValue::from(profile.file_created_at),
                DbValue::from(profile.load_started_at),
                DbValue::from(profile.loaded_to_memory_at),
                DbValue::from(profile.load_ended_at),
            ],
        )?;
        debug!(key = %profile.profile_key, file = %profile.file_name, "load profile recorded");
        Ok(())
    }

    /// Flip a pending profile to success. Returns false when another row for
    /// the same file and table already carries success, leaving both untouched.
    pub fn mark_load_succeeded(
        &self,
        conn: &DbConnection,
        profile_key: &str,
        ended_at: NaiveDateTime,
    ) -> Result<bool, BackendError> {
        let table = self.profile_table();
        let updated = conn.execute(
            &format!(
                "UPDATE {table} AS p SET loadsuccessstatus = 1, loadendtime = ? \
                 WHERE p.datafilestagehk = ? AND p.loadsuccessstatus = 0 \
                 AND NOT EXISTS ( \
                     SELECT 1 FROM {table} AS s \
                     WHERE s.filename = p.filename \
                       AND s.schemaname = p.schemaname \
                       AND s.targettablename = p.targettablename \
                       AND s.loadsuccessstatus = 1)"
            ),
            &[DbValue::from(ended_at), DbValue::from(profile_key)],
        )?;
        Ok(updated > 0)
    }

    /// Whether `file_name` has already been loaded into `table`.
    pub fn is_file_loaded(
        &self,
        conn: &DbConnection,
        file_name: &str,
        table: &TableRef,
    ) -> Result<bool, BackendError> {
        let count: i64 = conn.query_scalar(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE filename = ? AND schemaname = ? \
                 AND targettablename = ? AND loadsuccessstatus = 1",
                self.profile_table()
            ),
            &[
                DbValue::from(file_name),
                DbValue::from(table.schema.as_str()),
                DbValue::from(table.table.as_str()),
            ],
        )?;
        Ok(count > 0)
    }

    pub fn insert_error(
        &self,
        conn: &DbConnection,
        entry: &ErrorLogEntry,
    ) -> Result<(), BackendError> {
        conn.execute(
            &format!(
                "INSERT INTO {} (datafilestagehk, targettablename, message, errordatetime, notificationsent) \
                 VALUES (?, ?, ?, ?, ?)",
                self.error_table()
            ),
            &[
                DbValue::from(entry.profile_key.as_str()),
                DbValue::from(entry.table.as_str()),
                DbValue::from(entry.message.as_str()),
                DbValue::from(entry.logged_at),
                DbValue::from(entry.notification_sent),
            ],
        )?;
        Ok(())
    }

    pub fn mark_notification_sent(
        &self,
        conn: &DbConnection,
        profile_key: &str,
    ) -> Result<(), BackendError> {
        conn.execute(
            &format!(
                "UPDATE {} SET notificationsent = TRUE \
                 WHERE datafilestagehk = ? AND NOT notificationsent",
                self.error_table()
            ),
            &[DbValue::from(profile_key)],
        )?;
        Ok(())
    }

    /// Most recent profiles first, optionally for one target table name.
    pub fn recent_profiles(
        &self,
        conn: &DbConnection,
        table: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LoadProfile>, BackendError> {
        let mut sql = format!(
            "SELECT datafilestagehk, filename, delimiter, targettablename, schemaname, \
             numberofcolumns, totalrecords, duplicaterecords, invalidcharactersrecords, \
             loadsuccessstatus, filecreatetime, loadstarttime, loadtomemoryendtime, loadendtime \
             FROM {}",
            self.profile_table()
        );
        let mut params = Vec::new();
        if let Some(table) = table {
            sql.push_str(" WHERE targettablename = ?");
            params.push(DbValue::from(table));
        }
        sql.push_str(&format!(" ORDER BY loadstarttime DESC LIMIT {limit}"));

        conn.query_all(&sql, &params)?
            .iter()
            .map(profile_from_row)
            .collect()
    }

    pub fn recent_errors(
        &self,
        conn: &DbConnection,
        limit: usize,
    ) -> Result<Vec<ErrorLogEntry>, BackendError> {
        let rows = conn.query_all(
            &format!(
                "SELECT datafilestagehk, targettablename, message, errordatetime, notificationsent \
                 FROM {} ORDER BY errordatetime DESC LIMIT {limit}",
                self.error_table()
            ),
            &[],
        )?;

        rows.iter()
            .map(|row| {
                Ok(ErrorLogEntry {
                    profile_key: row.get(0)?,
                    table: row.get(1)?,
                    message: row.get(2)?,
                    logged_at: row.get(3)?,
                    notification_sent: row.get(4)?,
                })
            })
            .collect()
    }
}

fn profile_from_row(row: &DbRow) -> Result<LoadProfile, BackendError> {
    let status: i64 = row.get(9)?;
    Ok(LoadProfile {
        profile_key: row.get(0)?,
        file_name: row.get(1)?,
        delimiter: row.get(2)?,
        table: TableRef::new(row.get::<String>(4)?, row.get::<String>(3)?),
        column_count: row.get(5)?,
        total_records: row.get(6)?,
        duplicate_records: row.get(7)?,
        error_records: row.get(8)?,
        load_success: status == 1,
        file_created_at: row.get(10)?,
        load_started_at: row.get(11)?,
        loaded_to_memory_at: row.get(12)?,
        load_ended_at: row.get(13)?,
    })
}
