//! Folder worker: drains one table folder's file snapshot, one file at a time.
//!
//! Per file, in order:
//!
//! 1. still being written: skip, retry on a later pass
//! 2. already loaded into this table: archive without reprocessing
//! 3. over the size threshold: split into chunks, wait for the chunk writers
//!    to finish, then archive the original. If any chunk fails to write, the
//!    chunks already written are removed and the original is rejected.
//! 4. parse, profile, stage and merge, archive, then flip the profile to
//!    success
//!
//! Any failure in steps 3 and 4 moves the file to the error folder, writes an error
//! log entry and (for most kinds) a notification. The worker always moves on
//! to the next file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use dataload_db::{AdminLog, DbConnection, ErrorLogEntry, LoadProfile};
use dataload_protocol::{profile_key, TableRef};
use dataload_source::{SchemaHint, TabularSource};
use tracing::{debug, error, info, info_span, warn};

use crate::cancel::ShutdownToken;
use crate::chunking::{remove_chunks, ChunkError, ChunkHandle};
use crate::fsops::{confirm_moved, is_in_flight, list_files, modified_at, move_into, TableFolder};
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::staging::{StageError, StageOutcome, Stager};
use crate::wait::WaitPolicy;

/// Everything a folder worker shares with the rest of the pipeline.
pub struct EngineContext {
    pub root: PathBuf,
    pub admin: AdminLog,
    pub stager: Stager,
    pub chunks: ChunkHandle,
    pub source: Arc<dyn TabularSource>,
    pub notifier: Arc<dyn Notifier>,
    pub wait: WaitPolicy,
    pub settle: Duration,
    pub chunk_threshold: u64,
    pub chunk_budget: u64,
    pub hints: HashMap<TableRef, SchemaHint>,
    pub recipient: Option<String>,
    pub shutdown: ShutdownToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Modified within the settle window or locked by its producer.
    InFlight,
    /// The load profile table could not be queried.
    StoreUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ParseFailure,
    SchemaMismatch,
    UnreclaimedStaging,
    MergeFailure,
    WaitTimeout,
    /// The load profile could not be written or flipped.
    ProfileWrite,
    ChunkFailure,
    /// Loaded, but the file could not be archived.
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Skipped(SkipReason),
    Duplicate,
    Chunked { chunks: usize },
    Loaded { rows: u64 },
    Failed(FailureKind),
}

/// Tally of one worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub table: TableRef,
    pub loaded: usize,
    pub rows: u64,
    pub duplicates: usize,
    pub chunked: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl WorkerReport {
    fn new(table: TableRef) -> Self {
        Self {
            table,
            loaded: 0,
            rows: 0,
            duplicates: 0,
            chunked: 0,
            skipped: 0,
            failed: 0,
        }
    }

    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Skipped(_) => self.skipped += 1,
            FileOutcome::Duplicate => self.duplicates += 1,
            FileOutcome::Chunked { .. } => self.chunked += 1,
            FileOutcome::Loaded { rows } => {
                self.loaded += 1;
                self.rows += rows;
            }
            FileOutcome::Failed(_) => self.failed += 1,
        }
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub struct FolderWorker {
    ctx: Arc<EngineContext>,
    conn: DbConnection,
    folder: TableFolder,
}

impl FolderWorker {
    /// `conn` must be this worker's own handle.
    pub fn new(ctx: Arc<EngineContext>, conn: DbConnection, folder: TableFolder) -> Self {
        Self { ctx, conn, folder }
    }

    pub fn table(&self) -> &TableRef {
        &self.folder.table
    }

    /// Process the files present now, then end. Files that appear during the
    /// run are left for the next worker.
    pub fn run(self) -> WorkerReport {
        let span = info_span!("folder", table = %self.folder.table);
        let _enter = span.enter();
        let mut report = WorkerReport::new(self.folder.table.clone());

        let files = match list_files(&self.folder.drop_dir) {
            Ok(files) => files,
            Err(err) => {
                warn!(dir = %self.folder.drop_dir.display(), "cannot list drop folder: {}", err);
                return report;
            }
        };
        info!(files = files.len(), "worker started");

        for path in files {
            if self.ctx.shutdown.is_stopped() {
                info!("shutdown requested, leaving remaining files");
                break;
            }
            let outcome = self.process_file(&path);
            debug!(file = %path.display(), ?outcome, "file processed");
            report.record(&outcome);
        }

        info!(
            loaded = report.loaded,
            rows = report.rows,
            duplicates = report.duplicates,
            chunked = report.chunked,
            skipped = report.skipped,
            failed = report.failed,
            "worker finished"
        );
        report
    }

    pub fn process_file(&self, path: &Path) -> FileOutcome {
        let ctx = &self.ctx;
        let table = &self.folder.table;
        let file_name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => return FileOutcome::Skipped(SkipReason::InFlight),
        };

        if is_in_flight(path, ctx.settle) {
            debug!(file = %file_name, "file still being written");
            return FileOutcome::Skipped(SkipReason::InFlight);
        }

        match ctx.admin.is_file_loaded(&self.conn, &file_name, table) {
            Ok(true) => {
                info!(file = %file_name, "already loaded, archiving");
                return match self.archive(path) {
                    Ok(()) => FileOutcome::Duplicate,
                    Err(kind) => FileOutcome::Failed(kind),
                };
            }
            Ok(false) => {}
            Err(err) => {
                warn!(file = %file_name, "load profile lookup failed: {}", err);
                return FileOutcome::Skipped(SkipReason::StoreUnavailable);
            }
        }

        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size > ctx.chunk_threshold {
            return self.chunk(path, &file_name, size);
        }

        self.load(path, &file_name)
    }

    fn chunk(&self, path: &Path, file_name: &str, size: u64) -> FileOutcome {
        let ctx = &self.ctx;
        let table = &self.folder.table;
        info!(file = %file_name, bytes = size, budget = ctx.chunk_budget, "splitting oversized file");

        let drained = ctx
            .chunks
            .split_file(table, path, ctx.chunk_budget)
            .and_then(|chunks| {
                ctx.chunks.wait_drained(table, ctx.wait.max_wait)?;
                Ok(chunks)
            });

        match drained {
            Ok(chunks) => match self.archive(path) {
                Ok(()) => FileOutcome::Chunked { chunks },
                Err(kind) => FileOutcome::Failed(kind),
            },
            Err(ChunkError::Timeout(timeout)) => {
                // Late chunks still land and load on a later pass.
                self.reject(path, file_name, Some(NotificationKind::WaitTimeout), timeout.to_string());
                FileOutcome::Failed(FailureKind::WaitTimeout)
            }
            Err(err) => {
                error!(file = %file_name, "chunking failed: {}", err);
                if !matches!(err, ChunkError::Write { .. }) {
                    let _ = ctx.chunks.wait_drained(table, ctx.wait.max_wait);
                }
                // Each chunk but the last holds at least `budget` bytes.
                remove_chunks(path, size.div_ceil(ctx.chunk_budget.max(1)) as usize, ctx.chunk_budget);
                self.reject(path, file_name, Some(NotificationKind::LoadFailure), err.to_string());
                FileOutcome::Failed(FailureKind::ChunkFailure)
            }
        }
    }

    fn load(&self, path: &Path, file_name: &str) -> FileOutcome {
        let ctx = &self.ctx;
        let table = &self.folder.table;
        let load_started = now();

        let parsed = match ctx.source.parse(path, ctx.hints.get(table)) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(file = %file_name, "parse failed: {}", err);
                self.reject(path, file_name, Some(NotificationKind::InvalidFormat), err.to_string());
                return FileOutcome::Failed(FailureKind::ParseFailure);
            }
        };

        // The store would reject the CREATE, which only shows up as a wait timeout.
        if let Some(column) = parsed.rows.schema.clashing_column() {
            let message = format!(
                "{file_name}: column {column:?} repeats another column or a metadata column"
            );
            warn!(file = %file_name, "{}", message);
            self.reject(path, file_name, Some(NotificationKind::InvalidFormat), message);
            return FileOutcome::Failed(FailureKind::ParseFailure);
        }

        let key = profile_key(file_name, load_started);
        let profile = LoadProfile {
            profile_key: key.clone(),
            file_name: file_name.to_string(),
            delimiter: parsed.delimiter.map(|d| d.to_string()),
            table: table.clone(),
            column_count: parsed.rows.schema.len() as i64,
            total_records: parsed.rows.row_count() as i64,
            duplicate_records: parsed.rows.duplicate_rows() as i64,
            error_records: parsed.error_rows as i64,
            load_success: false,
            file_created_at: modified_at(path),
            load_started_at: load_started,
            loaded_to_memory_at: Some(now()),
            load_ended_at: None,
        };
        if let Err(err) = ctx.admin.insert_profile(&self.conn, &profile) {
            error!(file = %file_name, "cannot record load profile, leaving file in place: {}", err);
            return FileOutcome::Failed(FailureKind::ProfileWrite);
        }

        let rows = parsed.rows.with_metadata(&key, file_name, load_started);
        match ctx.stager.stage(&self.conn, &rows, table, file_name) {
            Ok(StageOutcome::Merged { rows, .. }) => self.finish_load(path, file_name, &key, rows),
            Ok(StageOutcome::SchemaMismatch { staging, diff }) => {
                self.reject(
                    path,
                    &key,
                    Some(NotificationKind::SchemaMismatch),
                    format!("{file_name}: schema of {staging} does not match {table}: {diff}"),
                );
                FileOutcome::Failed(FailureKind::SchemaMismatch)
            }
            Err(err @ StageError::UnreclaimedStaging { .. }) => {
                error!(file = %file_name, "{}", err);
                self.reject(path, &key, None, format!("{file_name}: {err}"));
                FileOutcome::Failed(FailureKind::UnreclaimedStaging)
            }
            Err(StageError::Timeout(timeout)) => {
                self.reject(
                    path,
                    &key,
                    Some(NotificationKind::WaitTimeout),
                    format!("{file_name}: {timeout}"),
                );
                FileOutcome::Failed(FailureKind::WaitTimeout)
            }
            Err(StageError::Merge(err)) => {
                error!(file = %file_name, "load failed: {}", err);
                self.reject(
                    path,
                    &key,
                    Some(NotificationKind::LoadFailure),
                    format!("{file_name}: {err}"),
                );
                FileOutcome::Failed(FailureKind::MergeFailure)
            }
        }
    }

    /// Archive, confirm the move, then flip the profile to success.
    fn finish_load(&self, path: &Path, file_name: &str, key: &str, rows: u64) -> FileOutcome {
        if let Err(kind) = self.archive_with_key(path, key) {
            return FileOutcome::Failed(kind);
        }

        match self.ctx.admin.mark_load_succeeded(&self.conn, key, now()) {
            Ok(true) => FileOutcome::Loaded { rows },
            Ok(false) => {
                warn!(file = %file_name, key, "another load of this file is already marked successful");
                FileOutcome::Loaded { rows }
            }
            Err(err) => {
                error!(file = %file_name, key, "cannot mark load successful: {}", err);
                self.record_error(key, None, format!("{file_name}: {err}"), path);
                FileOutcome::Failed(FailureKind::ProfileWrite)
            }
        }
    }

    fn archive(&self, path: &Path) -> Result<(), FailureKind> {
        let key = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.archive_with_key(path, &key)
    }

    fn archive_with_key(&self, path: &Path, key: &str) -> Result<(), FailureKind> {
        let dest_dir = self.folder.archive_dir(&self.ctx.root);
        let dest = match move_into(path, &dest_dir) {
            Ok(dest) => dest,
            Err(err) => {
                let message = format!("cannot archive {}: {}", path.display(), err);
                self.record_error(key, Some(NotificationKind::LoadFailure), message, path);
                return Err(FailureKind::Archive);
            }
        };
        if let Err(timeout) = confirm_moved(&self.ctx.wait, path, &dest) {
            self.record_error(key, Some(NotificationKind::WaitTimeout), timeout.to_string(), path);
            return Err(FailureKind::WaitTimeout);
        }
        debug!(file = %dest.display(), "archived");
        Ok(())
    }

    /// Move to the error folder, then log and notify.
    fn reject(&self, path: &Path, key: &str, kind: Option<NotificationKind>, message: String) {
        let dest_dir = self.folder.error_dir(&self.ctx.root);
        let file = match move_into(path, &dest_dir) {
            Ok(dest) => dest,
            Err(err) => {
                error!(file = %path.display(), "cannot move file to error folder: {}", err);
                path.to_path_buf()
            }
        };
        self.record_error(key, kind, message, &file);
    }

    fn record_error(&self, key: &str, kind: Option<NotificationKind>, message: String, file: &Path) {
        let ctx = &self.ctx;
        let table = &self.folder.table;
        let entry = ErrorLogEntry {
            profile_key: key.to_string(),
            table: table.table.clone(),
            message: message.clone(),
            logged_at: now(),
            notification_sent: false,
        };
        if let Err(err) = ctx.admin.insert_error(&self.conn, &entry) {
            error!(key, "cannot write error log entry: {}", err);
        }

        let Some(kind) = kind else { return };
        let notification = Notification {
            kind,
            profile_key: key.to_string(),
            table: table.clone(),
            file: file.to_path_buf(),
            message,
            recipient: ctx.recipient.clone(),
            raised_at: now(),
        };
        match ctx.notifier.notify(&notification) {
            Ok(()) => {
                if let Err(err) = ctx.admin.mark_notification_sent(&self.conn, key) {
                    warn!(key, "cannot flag notification as sent: {}", err);
                }
            }
            Err(err) => warn!(key, kind = ?kind, "notification failed: {}", err),
        }
    }
}
