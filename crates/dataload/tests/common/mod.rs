//! Shared fixtures for the pipeline integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dataload::{Notification, Notifier, NotifyError, PipelineConfig};
use tempfile::TempDir;

/// Temp root, store path and a config tuned for fast polling.
pub struct TestEnv {
    _temp: TempDir,
    pub root: PathBuf,
    pub db_path: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let root = temp.path().join("watch");
        let db_path = temp.path().join("store.duckdb");
        fs::create_dir_all(&root).expect("Failed to create watch root");
        Self {
            _temp: temp,
            root,
            db_path,
        }
    }

    pub fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new(&self.root);
        config.database_path = self.db_path.clone();
        config.poll_interval_ms = 5;
        config.max_wait_secs = 10;
        config.ddl_idle_ms = 20;
        config.settle_secs = 0;
        config.discovery_interval_secs = 0;
        config
    }

    pub fn drop_dir(&self, schema: &str, table: &str) -> PathBuf {
        let dir = self.root.join(schema).join(table).join("drop");
        fs::create_dir_all(&dir).expect("Failed to create drop dir");
        dir
    }

    /// Write `name` into the table's drop folder.
    pub fn drop_file(&self, schema: &str, table: &str, name: &str, content: &str) -> PathBuf {
        let path = self.drop_dir(schema, table).join(name);
        fs::write(&path, content).expect("Failed to write drop file");
        path
    }

    pub fn archived(&self, schema: &str, table: &str, name: &str) -> PathBuf {
        self.root.join("archive").join(schema).join(table).join(name)
    }

    pub fn errored(&self, schema: &str, table: &str, name: &str) -> PathBuf {
        self.root.join("error").join(schema).join(table).join(name)
    }
}

/// Keeps every notification it is handed.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn data_lines(path: &Path) -> usize {
    fs::read_to_string(path)
        .expect("Failed to read file")
        .lines()
        .skip(1)
        .filter(|l| !l.is_empty())
        .count()
}
