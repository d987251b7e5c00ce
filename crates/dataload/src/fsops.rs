//! Filesystem layout and file moves.
//!
//! ```text
//! <root>/<schema>/<table>/drop/      new files
//! <root>/archive/<schema>/<table>/   loaded or duplicate files
//! <root>/error/<schema>/<table>/     rejected files
//! ```

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local, NaiveDateTime};
use dataload_protocol::defaults::{ARCHIVE_DIR, DROP_DIR, ERROR_DIR};
use dataload_protocol::naming::{safe_identifier, target_table_name};
use dataload_protocol::TableRef;
use fs2::FileExt;
use tracing::{debug, warn};

use crate::wait::{WaitPolicy, WaitTimeout};

/// A watched table folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFolder {
    pub table: TableRef,
    pub drop_dir: PathBuf,
}

impl TableFolder {
    pub fn archive_dir(&self, root: &Path) -> PathBuf {
        root.join(ARCHIVE_DIR)
            .join(&self.table.schema)
            .join(&self.table.table)
    }

    pub fn error_dir(&self, root: &Path) -> PathBuf {
        root.join(ERROR_DIR)
            .join(&self.table.schema)
            .join(&self.table.table)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'))
}

fn subdirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() && !is_hidden(&path) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Every `<root>/<schema>/<table>/drop` folder, sorted by table.
pub fn discover_folders(root: &Path) -> io::Result<Vec<TableFolder>> {
    let mut folders = Vec::new();
    for schema_dir in subdirs(root)? {
        let Some(schema_name) = schema_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if schema_name == ARCHIVE_DIR || schema_name == ERROR_DIR {
            continue;
        }
        for table_dir in subdirs(&schema_dir)? {
            let drop_dir = table_dir.join(DROP_DIR);
            if !drop_dir.is_dir() {
                continue;
            }
            let Some(table_name) = table_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            folders.push(TableFolder {
                table: TableRef::new(safe_identifier(schema_name), target_table_name(table_name)),
                drop_dir,
            });
        }
    }
    folders.sort_by(|a, b| a.table.cmp(&b.table));
    Ok(folders)
}

/// Regular, non-hidden files in `dir`, sorted by name.
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && !is_hidden(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// True while a producer is still writing `path`: modified within `settle`,
/// or holding a lock on it.
pub fn is_in_flight(path: &Path, settle: Duration) -> bool {
    let modified = fs::metadata(path).and_then(|m| m.modified());
    if let Ok(modified) = modified {
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age < settle {
            return true;
        }
    }

    match File::open(path) {
        Ok(file) => match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        },
        Err(_) => true,
    }
}

/// Last modification time in local time.
pub fn modified_at(path: &Path) -> Option<NaiveDateTime> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Local>::from(modified).naive_local())
}

/// Move `src` into `dest_dir` under the same name, replacing any file already
/// there. Falls back to copy and remove across filesystems.
pub fn move_into(src: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let file_name = src
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let dest = dest_dir.join(file_name);
    if dest.exists() {
        warn!(file = %dest.display(), "replacing existing file");
        fs::remove_file(&dest)?;
    }

    if let Err(err) = fs::rename(src, &dest) {
        debug!(file = %src.display(), "rename failed ({}), copying", err);
        fs::copy(src, &dest)?;
        fs::remove_file(src)?;
    }
    Ok(dest)
}

/// Block until `src` is gone and `dest` is present.
pub fn confirm_moved(wait: &WaitPolicy, src: &Path, dest: &Path) -> Result<(), WaitTimeout> {
    let what = format!("move of {} to {}", src.display(), dest.display());
    wait.wait_until::<WaitTimeout, _>(&what, || Ok(!src.exists() && dest.exists()))
}
