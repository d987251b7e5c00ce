//! Shared logging utilities for dataload binaries.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "dataload=info,dataload_db=info,dataload_source=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by dataload binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the file filter on stderr instead of warnings only.
    pub verbose: bool,
    /// Overrides `<home>/logs`.
    pub log_dir: Option<PathBuf>,
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = config
        .log_dir
        .unwrap_or_else(|| dataload_home().join("logs"));
    let appender =
        RollingFileAppender::new(log_dir.clone(), config.app_name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
            .with_context(|| format!("Failed to open log file in {}", log_dir.display()))?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(appender))
                .with_ansi(false)
                .with_thread_names(true)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Dataload home directory: `$DATALOAD_HOME`, else `~/.dataload`.
pub fn dataload_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("DATALOAD_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dataload")
}

struct RollingFileAppender {
    dir: PathBuf,
    base_name: String,
    max_files: usize,
    max_size: u64,
    file: Option<File>,
    current_size: u64,
}

impl RollingFileAppender {
    fn new(dir: PathBuf, base_name: &str, max_files: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let mut appender = Self {
            dir,
            base_name: sanitize_name(base_name),
            max_files: max_files.max(1),
            max_size,
            file: None,
            current_size: 0,
        };
        let (file, size) = appender.open_current_file()?;
        appender.file = Some(file);
        appender.current_size = size;
        if appender.current_size > appender.max_size {
            appender.rotate()?;
        }
        Ok(appender)
    }

    fn open_current_file(&self) -> io::Result<(File, u64)> {
        let path = self.current_path();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.base_name, index))
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        rotate_files(&self.current_path(), |idx| self.rotated_path(idx), self.max_files)?;

        let (file, size) = self.open_current_file()?;
        self.file = Some(file);
        self.current_size = size;
        Ok(())
    }
}

/// Shift `name.log.N` up by one, dropping the oldest, then move the current
/// file to `name.log.1`.
fn rotate_files<F>(current: &Path, rotated_path: F, max_files: usize) -> io::Result<()>
where
    F: Fn(usize) -> PathBuf,
{
    let max_index = max_files.saturating_sub(1);
    if max_index == 0 {
        return Ok(());
    }

    let oldest = rotated_path(max_index);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    for idx in (1..max_index).rev() {
        let src = rotated_path(idx);
        if src.exists() {
            fs::rename(&src, rotated_path(idx + 1))?;
        }
    }

    if current.exists() {
        fs::rename(current, rotated_path(1))?;
    }

    Ok(())
}

impl Write for RollingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let bytes = file.write(buf)?;
        self.current_size += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_name_replaces_separators() {
        assert_eq!(sanitize_name("data load/1"), "data_load_1");
    }

    #[test]
    fn appender_rotates_when_size_exceeded() {
        let tmp = TempDir::new().unwrap();
        let mut appender =
            RollingFileAppender::new(tmp.path().to_path_buf(), "dataload", 3, 16).unwrap();

        appender.write_all(b"0123456789").unwrap();
        appender.write_all(b"0123456789").unwrap();
        appender.flush().unwrap();

        assert!(tmp.path().join("dataload.log").exists());
        assert!(tmp.path().join("dataload.log.1").exists());
        let current = fs::read(tmp.path().join("dataload.log")).unwrap();
        assert_eq!(current.len(), 10);
    }

    #[test]
    fn rotation_keeps_at_most_max_files() {
        let tmp = TempDir::new().unwrap();
        let mut appender =
            RollingFileAppender::new(tmp.path().to_path_buf(), "dataload", 2, 4).unwrap();

        for _ in 0..5 {
            appender.write_all(b"abcd").unwrap();
        }

        assert!(tmp.path().join("dataload.log.1").exists());
        assert!(!tmp.path().join("dataload.log.2").exists());
    }
}
