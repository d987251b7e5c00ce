//! Large-file chunking.
//!
//! A folder worker streams an oversized file into segments of roughly
//! `budget` bytes (whole lines, at least `budget` unless the file ends) and
//! pushes them onto a bounded queue. A fixed pool of writer threads drains
//! the queue and writes each segment back into the drop folder as
//! `<stem>_<index>_<budget><ext>`, with the header line repeated on every
//! segment after the first. Segments are written under a dot-prefixed name
//! and renamed into place, so workers never pick up a partial chunk.
//!
//! A failed chunk write is tallied against its table and returned by
//! [`ChunkHandle::wait_drained`], so the worker can reject the whole file.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dataload_protocol::TableRef;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::wait::WaitTimeout;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Chunk writers have shut down")]
    Closed,

    #[error(transparent)]
    Timeout(#[from] WaitTimeout),

    #[error("{} chunk(s) for {table} could not be written: {}", .failures.len(), .failures.join("; "))]
    Write {
        table: TableRef,
        failures: Vec<String>,
    },
}

/// One segment waiting to be written.
#[derive(Debug)]
struct ChunkJob {
    table: TableRef,
    dest: PathBuf,
    contents: Vec<u8>,
}

enum Command {
    Write(ChunkJob),
    Stop,
}

/// Jobs still queued or being written for one table, plus the writes that
/// failed since the table's last drain.
#[derive(Debug, Default)]
struct Tally {
    pending: usize,
    failures: Vec<String>,
}

#[derive(Debug, Default)]
struct InFlight {
    tallies: Mutex<HashMap<TableRef, Tally>>,
    drained: Condvar,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashMap<TableRef, Tally>> {
        self.tallies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add(&self, table: &TableRef) {
        self.lock().entry(table.clone()).or_default().pending += 1;
    }

    fn finish(&self, table: &TableRef, failure: Option<String>) {
        let mut tallies = self.lock();
        if let Some(tally) = tallies.get_mut(table) {
            tally.pending = tally.pending.saturating_sub(1);
            tally.failures.extend(failure);
            if tally.pending == 0 && tally.failures.is_empty() {
                tallies.remove(table);
            }
        }
        self.drained.notify_all();
    }

    fn pending(&self, table: &TableRef) -> usize {
        self.lock().get(table).map_or(0, |t| t.pending)
    }
}

/// Chunk file name for segment `index`.
pub fn chunk_file_name(original: &Path, index: usize, budget: u64) -> String {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = original
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{stem}_{index}_{budget}{ext}")
}

/// Producer side: splits files and waits for a table's chunks to land.
#[derive(Clone)]
pub struct ChunkHandle {
    tx: SyncSender<Command>,
    in_flight: Arc<InFlight>,
}

impl ChunkHandle {
    /// Stream `path` into chunk jobs for `table`, written next to the
    /// original. Blocks while the queue is full. Returns the number of chunks
    /// queued.
    pub fn split_file(&self, table: &TableRef, path: &Path, budget: u64) -> Result<usize, ChunkError> {
        let read_err = |source: io::Error| ChunkError::Read {
            path: path.to_path_buf(),
            source,
        };
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut reader = BufReader::new(File::open(path).map_err(read_err)?);
        let budget_bytes = usize::try_from(budget).unwrap_or(usize::MAX).max(1);

        let mut header: Option<Vec<u8>> = None;
        let mut index = 0usize;
        loop {
            let mut segment = Vec::new();
            let mut line = Vec::new();
            while segment.len() < budget_bytes {
                line.clear();
                if reader.read_until(b'\n', &mut line).map_err(read_err)? == 0 {
                    break;
                }
                if header.is_none() {
                    header = Some(line.clone());
                }
                segment.extend_from_slice(&line);
            }
            if segment.is_empty() {
                break;
            }

            let mut contents = Vec::with_capacity(segment.len());
            if index > 0 {
                if let Some(header) = &header {
                    contents.extend_from_slice(header);
                }
            }
            contents.extend_from_slice(&segment);

            let job = ChunkJob {
                table: table.clone(),
                dest: dir.join(chunk_file_name(path, index, budget)),
                contents,
            };
            self.in_flight.add(table);
            if self.tx.send(Command::Write(job)).is_err() {
                self.in_flight.finish(table, None);
                return Err(ChunkError::Closed);
            }
            index += 1;
        }

        info!(table = %table, file = %path.display(), chunks = index, "file split into chunks");
        Ok(index)
    }

    /// Block until no chunk for `table` is queued or being written, then
    /// report any writes that failed since the last drain.
    pub fn wait_drained(&self, table: &TableRef, max_wait: Duration) -> Result<(), ChunkError> {
        let start = Instant::now();
        let mut tallies = self.in_flight.lock();
        while tallies.get(table).map_or(0, |t| t.pending) > 0 {
            let waited = start.elapsed();
            if waited >= max_wait {
                return Err(WaitTimeout {
                    what: format!("chunk writers for {table}"),
                    waited,
                }
                .into());
            }
            let (guard, _) = self
                .in_flight
                .drained
                .wait_timeout(tallies, max_wait - waited)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            tallies = guard;
        }

        match tallies.remove(table) {
            Some(tally) if !tally.failures.is_empty() => Err(ChunkError::Write {
                table: table.clone(),
                failures: tally.failures,
            }),
            _ => Ok(()),
        }
    }

    pub fn pending(&self, table: &TableRef) -> usize {
        self.in_flight.pending(table)
    }
}

/// The writer pool.
pub struct ChunkPipeline {
    handle: ChunkHandle,
    writers: Vec<JoinHandle<()>>,
}

impl ChunkPipeline {
    pub fn start(writers: usize, queue_depth: usize) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let in_flight = Arc::new(InFlight::default());

        let mut handles = Vec::new();
        for i in 0..writers.max(1) {
            let rx = Arc::clone(&rx);
            let in_flight = Arc::clone(&in_flight);
            handles.push(
                thread::Builder::new()
                    .name(format!("chunk-writer-{i}"))
                    .spawn(move || run_writer(rx, in_flight))?,
            );
        }

        Ok(Self {
            handle: ChunkHandle { tx, in_flight },
            writers: handles,
        })
    }

    pub fn handle(&self) -> ChunkHandle {
        self.handle.clone()
    }

    /// Writers finish the jobs queued ahead of their stop message, then exit.
    /// Handles still held elsewhere get [`ChunkError::Closed`] afterwards.
    pub fn shutdown(self) {
        for _ in &self.writers {
            if self.handle.tx.send(Command::Stop).is_err() {
                break;
            }
        }
        drop(self.handle);
        for writer in self.writers {
            if writer.join().is_err() {
                error!("chunk writer panicked");
            }
        }
    }
}

fn run_writer(rx: Arc<Mutex<Receiver<Command>>>, in_flight: Arc<InFlight>) {
    loop {
        let command = {
            let rx = rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rx.recv()
        };
        let job = match command {
            Ok(Command::Write(job)) => job,
            Ok(Command::Stop) | Err(_) => break,
        };

        let failure = match write_chunk(&job.dest, &job.contents) {
            Ok(()) => {
                debug!(table = %job.table, file = %job.dest.display(), "chunk written");
                None
            }
            Err(err) => {
                error!(table = %job.table, file = %job.dest.display(), "chunk write failed: {}", err);
                Some(format!("{}: {}", job.dest.display(), err))
            }
        };
        in_flight.finish(&job.table, failure);
    }
}

fn write_chunk(dest: &Path, contents: &[u8]) -> io::Result<()> {
    let name = dest
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "chunk path has no file name"))?;
    let temp = dest.with_file_name(format!(".{}", name.to_string_lossy()));
    fs::write(&temp, contents)?;
    fs::rename(&temp, dest).inspect_err(|_| {
        let _ = fs::remove_file(&temp);
    })
}

/// Remove the chunk files written for `original`, leaving anything that is
/// not a regular file alone.
pub fn remove_chunks(original: &Path, chunks: usize, budget: u64) {
    let dir = original.parent().unwrap_or_else(|| Path::new("."));
    for index in 0..chunks {
        let chunk = dir.join(chunk_file_name(original, index, budget));
        if !chunk.is_file() {
            continue;
        }
        if let Err(err) = fs::remove_file(&chunk) {
            warn!(file = %chunk.display(), "cannot remove chunk: {}", err);
        }
    }
}
