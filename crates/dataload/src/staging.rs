//! Staging-table protocol.
//!
//! One file's row-set reaches its target table through a staging table:
//!
//! 1. The staging name is the target name when the target does not exist,
//!    otherwise `<target>_<file discriminator>`.
//! 2. If a drop for that name is still queued, wait for it to run.
//! 3. A staging table that already exists is an unreclaimed leftover of an
//!    earlier failure. The file is rejected and the table is left alone.
//! 4. The create goes through the DDL queue; poll the catalog until the table
//!    is visible.
//! 5. Rows are inserted in bounded batches, one transaction per batch. If a
//!    batch fails, the table this file created (staging, or the brand-new
//!    target) is dropped before the error is returned.
//! 6. Against a pre-existing target, the staging columns (name, position,
//!    type) must match exactly. A mismatch keeps the staging table for
//!    inspection.
//! 7. Otherwise one `INSERT INTO target SELECT * FROM staging` merges the
//!    rows and the staging table is queued for drop without waiting.

use std::fmt;

use dataload_db::{BackendError, CatalogColumn, DbConnection, DbValue};
use dataload_protocol::naming::staging_table_name;
use dataload_protocol::{RowSet, TableRef};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::ddl::{CreateTableRequest, DdlHandle, DropTableRequest};
use crate::wait::{WaitPolicy, WaitTimeout};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("unreclaimed staging table {table} from a previous run")]
    UnreclaimedStaging { table: TableRef },

    #[error(transparent)]
    Timeout(#[from] WaitTimeout),

    #[error("store error while staging: {0}")]
    Merge(#[from] BackendError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Rows are in the target. `created_target` means the staging table
    /// became the target and nothing was dropped.
    Merged {
        staging: TableRef,
        rows: u64,
        created_target: bool,
    },
    /// The staging table was kept; the target is untouched.
    SchemaMismatch { staging: TableRef, diff: SchemaDiff },
}

/// Column differences between a staging table and its target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    /// In staging, not in the target.
    pub new_columns: Vec<String>,
    /// In the target, not in staging.
    pub missing_columns: Vec<String>,
    /// `(column, target type, staging type)`
    pub type_changes: Vec<(String, String, String)>,
    /// `(column, target position, staging position)`
    pub position_changes: Vec<(String, i64, i64)>,
}

impl SchemaDiff {
    pub fn between(target: &[CatalogColumn], staging: &[CatalogColumn]) -> Self {
        let mut diff = SchemaDiff::default();
        for col in staging {
            match target.iter().find(|t| t.name == col.name) {
                None => diff.new_columns.push(col.name.clone()),
                Some(t) => {
                    if t.data_type != col.data_type {
                        diff.type_changes.push((
                            col.name.clone(),
                            t.data_type.clone(),
                            col.data_type.clone(),
                        ));
                    }
                    if t.ordinal != col.ordinal {
                        diff.position_changes
                            .push((col.name.clone(), t.ordinal, col.ordinal));
                    }
                }
            }
        }
        for col in target {
            if !staging.iter().any(|s| s.name == col.name) {
                diff.missing_columns.push(col.name.clone());
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.new_columns.is_empty()
            && self.missing_columns.is_empty()
            && self.type_changes.is_empty()
            && self.position_changes.is_empty()
    }
}

impl fmt::Display for SchemaDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.new_columns.is_empty() {
            parts.push(format!("new columns: {}", self.new_columns.join(", ")));
        }
        if !self.missing_columns.is_empty() {
            parts.push(format!("missing columns: {}", self.missing_columns.join(", ")));
        }
        for (name, from, to) in &self.type_changes {
            parts.push(format!("{name} type {from} -> {to}"));
        }
        for (name, from, to) in &self.position_changes {
            parts.push(format!("{name} position {from} -> {to}"));
        }
        f.write_str(&parts.join("; "))
    }
}

/// Drives the staging protocol for one worker's files.
#[derive(Clone)]
pub struct Stager {
    ddl: DdlHandle,
    wait: WaitPolicy,
    batch_rows: usize,
}

impl Stager {
    pub fn new(ddl: DdlHandle, wait: WaitPolicy, batch_rows: usize) -> Self {
        Self {
            ddl,
            wait,
            batch_rows: batch_rows.max(1),
        }
    }

    pub fn stage(
        &self,
        conn: &DbConnection,
        rows: &RowSet,
        target: &TableRef,
        file_name: &str,
    ) -> Result<StageOutcome, StageError> {
        let target_exists = conn.table_exists(target)?;
        let staging = target.sibling(staging_table_name(&target.table, file_name, target_exists));

        if self.ddl.is_drop_pending(&staging) {
            debug!(table = %staging, "waiting for queued drop");
            self.wait
                .wait_until::<StageError, _>(&format!("drop of {staging}"), || {
                    Ok(!self.ddl.is_drop_pending(&staging) || !conn.table_exists(&staging)?)
                })?;
        }

        if conn.table_exists(&staging)? {
            warn!(table = %staging, file = file_name, "staging table already exists");
            return Err(StageError::UnreclaimedStaging { table: staging });
        }

        if !self.ddl.enqueue_create(CreateTableRequest {
            table: staging.clone(),
            schema: rows.schema.clone(),
        }) {
            return Err(BackendError::Database("create queue is closed".to_string()).into());
        }
        self.wait
            .wait_until::<StageError, _>(&format!("creation of {staging}"), || {
                Ok(conn.table_exists(&staging)?)
            })?;

        let inserted = match self.insert_rows(conn, &staging, rows) {
            Ok(inserted) => inserted,
            Err(err) => {
                self.discard(conn, &staging, file_name);
                return Err(err.into());
            }
        };
        debug!(table = %staging, rows = inserted, "staging table populated");

        if !target_exists {
            info!(table = %target, rows = inserted, "target table created from {}", file_name);
            return Ok(StageOutcome::Merged {
                staging,
                rows: inserted,
                created_target: true,
            });
        }

        let diff = SchemaDiff::between(&conn.table_columns(target)?, &conn.table_columns(&staging)?);
        if !diff.is_empty() {
            warn!(table = %target, staging = %staging, "schema mismatch: {}", diff);
            return Ok(StageOutcome::SchemaMismatch { staging, diff });
        }

        conn.execute(
            &format!(
                "INSERT INTO {} SELECT * FROM {}",
                target.qualified(),
                staging.qualified()
            ),
            &[],
        )?;
        if !self.ddl.enqueue_drop(DropTableRequest {
            table: staging.clone(),
        }) {
            warn!(table = %staging, "drop queue is closed; staging table left behind");
        }
        info!(table = %target, rows = inserted, "merged {}", file_name);

        Ok(StageOutcome::Merged {
            staging,
            rows: inserted,
            created_target: false,
        })
    }

    /// Drop a table this file created but could not fill, and wait until it
    /// is gone so the next file sees the store as it was before this one.
    /// Committed batches would otherwise stay behind and be loaded twice when
    /// the file is dropped again.
    fn discard(&self, conn: &DbConnection, staging: &TableRef, file_name: &str) {
        warn!(table = %staging, file = file_name, "insert failed, dropping partially loaded table");
        if !self.ddl.enqueue_drop(DropTableRequest {
            table: staging.clone(),
        }) {
            warn!(table = %staging, "drop queue is closed; partially loaded table left behind");
            return;
        }
        let dropped = self
            .wait
            .wait_until::<StageError, _>(&format!("drop of {staging}"), || {
                Ok(!conn.table_exists(staging)?)
            });
        if let Err(err) = dropped {
            error!(table = %staging, "partially loaded table not dropped: {}", err);
        }
    }

    fn insert_rows(
        &self,
        conn: &DbConnection,
        staging: &TableRef,
        rows: &RowSet,
    ) -> Result<u64, BackendError> {
        let columns = rows.schema.column_names();
        let mut total = 0;
        for batch in rows.rows.chunks(self.batch_rows) {
            let values: Vec<Vec<DbValue>> = batch
                .iter()
                .map(|row| row.iter().map(DbValue::from).collect())
                .collect();
            total += conn.transaction(|tx| tx.bulk_insert_rows(staging, &columns, &values))?;
        }
        Ok(total)
    }
}
