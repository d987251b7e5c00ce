//! Notification sinks. Fire-and-forget: the caller logs a failed send and
//! moves on.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use dataload_protocol::TableRef;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LoadFailure,
    SchemaMismatch,
    InvalidFormat,
    WaitTimeout,
}

impl NotificationKind {
    pub fn subject(&self) -> &'static str {
        match self {
            NotificationKind::LoadFailure => "Load failure",
            NotificationKind::SchemaMismatch => "Schema mismatch",
            NotificationKind::InvalidFormat => "Invalid file format",
            NotificationKind::WaitTimeout => "Pipeline wait timed out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub profile_key: String,
    pub table: TableRef,
    pub file: PathBuf,
    pub message: String,
    pub recipient: Option<String>,
    pub raised_at: NaiveDateTime,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to write notification outbox {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Logs notifications at warn level. Used when no outbox is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        warn!(
            kind = ?n.kind,
            table = %n.table,
            file = %n.file.display(),
            key = %n.profile_key,
            "{}: {}",
            n.kind.subject(),
            n.message
        );
        Ok(())
    }
}

/// Appends one JSON object per line to an outbox file for a mail relay.
#[derive(Debug)]
pub struct OutboxNotifier {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl OutboxNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

impl Notifier for OutboxNotifier {
    fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        let mut line = serde_json::to_vec(n)?;
        line.push(b'\n');

        let io_err = |source: std::io::Error| NotifyError::Io {
            path: self.path.clone(),
            source,
        };
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(&line).map_err(io_err)?;
        Ok(())
    }
}
