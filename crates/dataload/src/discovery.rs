//! Discovery loop and the composition root of the pipeline.
//!
//! [`Pipeline`] owns the store connection, the DDL serializers, the chunk
//! writer pool, the admission gate and the active-table registry, and hands
//! each folder worker its own connection plus a shared [`EngineContext`].
//! Each pass over the watched root starts at most one worker per table.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use dataload_db::{AdminLog, BackendError, DbConnection};
use dataload_protocol::TableRef;
use dataload_source::{FileSource, TabularSource};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cancel::ShutdownToken;
use crate::chunking::ChunkPipeline;
use crate::config::{ConfigError, PipelineConfig};
use crate::ddl::DdlQueues;
use crate::fsops::{discover_folders, list_files, TableFolder};
use crate::gate::{AdmissionGate, AdmissionPermit};
use crate::notify::{LogNotifier, Notifier, OutboxNotifier};
use crate::registry::{ActiveTableGuard, ActiveTables};
use crate::staging::Stager;
use crate::worker::{EngineContext, FolderWorker, WorkerReport};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] BackendError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// What one discovery pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Workers started.
    pub started: usize,
    /// New-table folders refused by the admission gate.
    pub deferred: usize,
    /// Folders whose table already has a running worker.
    pub busy: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    conn: DbConnection,
    ctx: Arc<EngineContext>,
    ddl: DdlQueues,
    chunker: ChunkPipeline,
    gate: AdmissionGate,
    active: ActiveTables,
    workers: Vec<JoinHandle<WorkerReport>>,
    shutdown: ShutdownToken,
}

impl Pipeline {
    /// Start with the file-format source and the notifier the config asks for.
    pub fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        let source: Arc<dyn TabularSource> = Arc::new(FileSource::new(config.delimiter_bytes()?));
        let notifier: Arc<dyn Notifier> = match &config.notify.outbox {
            Some(path) => Arc::new(OutboxNotifier::new(path)),
            None => Arc::new(LogNotifier),
        };
        Self::start(config, source, notifier)
    }

    pub fn start(
        config: PipelineConfig,
        source: Arc<dyn TabularSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let conn = DbConnection::open(&config.database_path)?;
        let admin = AdminLog::new(config.admin_schema.clone());
        admin.ensure_tables(&conn)?;

        let ddl = DdlQueues::start(&conn, config.ddl_idle())?;
        let chunker = ChunkPipeline::start(config.chunk_writers, config.chunk_queue_depth)?;
        let shutdown = ShutdownToken::new();
        let wait = config.wait_policy();

        let ctx = Arc::new(EngineContext {
            root: config.root.clone(),
            admin,
            stager: Stager::new(ddl.handle(), wait, config.insert_batch_rows),
            chunks: chunker.handle(),
            source,
            notifier,
            wait,
            settle: config.settle(),
            chunk_threshold: config.chunk_threshold_bytes,
            chunk_budget: config.chunk_budget_bytes,
            hints: config.schema_hints()?,
            recipient: config.notify.recipient.clone(),
            shutdown: shutdown.clone(),
        });

        info!(
            root = %config.root.display(),
            database = %config.database_path.display(),
            "pipeline started"
        );
        Ok(Self {
            config,
            conn,
            ctx,
            ddl,
            chunker,
            gate: AdmissionGate::new(),
            active: ActiveTables::new(),
            workers: Vec::new(),
            shutdown,
        })
    }

    pub fn connection(&self) -> &DbConnection {
        &self.conn
    }

    pub fn admin(&self) -> &AdminLog {
        &self.ctx.admin
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn active_tables(&self) -> Vec<TableRef> {
        self.active.snapshot()
    }

    /// The new table currently admitted, if any.
    pub fn admission_holder(&self) -> Option<TableRef> {
        self.gate.holder()
    }

    /// One discovery pass: start a worker for every folder with files and no
    /// running worker, subject to the admission gate for new tables.
    pub fn poll_once(&mut self) -> Result<PollSummary, PipelineError> {
        self.reap_finished();

        let mut summary = PollSummary::default();
        for folder in discover_folders(&self.config.root)? {
            if self.active.is_active(&folder.table) {
                summary.busy += 1;
                continue;
            }
            match list_files(&folder.drop_dir) {
                Ok(files) if !files.is_empty() => {}
                Ok(_) => continue,
                Err(err) => {
                    warn!(dir = %folder.drop_dir.display(), "cannot list drop folder: {}", err);
                    continue;
                }
            }

            let target_exists = match self.conn.table_exists(&folder.table) {
                Ok(exists) => exists,
                Err(err) => {
                    warn!(table = %folder.table, "catalog lookup failed: {}", err);
                    continue;
                }
            };
            let permit = if target_exists {
                None
            } else {
                match self.gate.try_admit(&folder.table) {
                    Some(permit) => Some(permit),
                    None => {
                        debug!(table = %folder.table, "new table deferred by admission gate");
                        summary.deferred += 1;
                        continue;
                    }
                }
            };

            let Some(claim) = self.active.try_claim(&folder.table) else {
                summary.busy += 1;
                continue;
            };
            match self.spawn_worker(folder, claim, permit) {
                Ok(handle) => {
                    self.workers.push(handle);
                    summary.started += 1;
                }
                Err(err) => error!("cannot start folder worker: {}", err),
            }
        }

        if summary != PollSummary::default() {
            debug!(
                started = summary.started,
                deferred = summary.deferred,
                busy = summary.busy,
                "discovery pass"
            );
        }
        Ok(summary)
    }

    fn spawn_worker(
        &self,
        folder: TableFolder,
        claim: ActiveTableGuard,
        permit: Option<AdmissionPermit>,
    ) -> Result<JoinHandle<WorkerReport>, PipelineError> {
        let conn = self.conn.try_clone()?;
        let ctx = Arc::clone(&self.ctx);
        let name = format!("folder-{}", folder.table);
        let handle = thread::Builder::new().name(name).spawn(move || {
            // Both guards release when the run ends, including by panic.
            let _claim = claim;
            let _permit = permit;
            FolderWorker::new(ctx, conn, folder).run()
        })?;
        Ok(handle)
    }

    fn reap_finished(&mut self) {
        let (done, running): (Vec<_>, Vec<_>) =
            self.workers.drain(..).partition(|handle| handle.is_finished());
        self.workers = running;
        for handle in done {
            join_worker(handle);
        }
    }

    /// Block until every started worker has ended.
    pub fn join_workers(&mut self) -> Vec<WorkerReport> {
        self.workers.drain(..).filter_map(join_worker).collect()
    }

    /// One pass, then wait for the workers it started.
    pub fn run_once(&mut self) -> Result<Vec<WorkerReport>, PipelineError> {
        self.poll_once()?;
        Ok(self.join_workers())
    }

    /// Discovery passes until the shutdown token is set, then wait for the
    /// running workers.
    pub fn run(&mut self) -> Vec<WorkerReport> {
        let interval = self.config.discovery_interval();
        info!(interval_secs = interval.as_secs(), "discovery loop running");
        while !self.shutdown.is_stopped() {
            if let Err(err) = self.poll_once() {
                warn!("discovery pass failed: {}", err);
            }
            if self.shutdown.sleep(interval) {
                break;
            }
        }
        info!(workers = self.workers.len(), "discovery loop stopping");
        self.join_workers()
    }

    /// Stop, wait for workers, then drain and stop the DDL serializers and
    /// chunk writers.
    pub fn shutdown(mut self) {
        self.shutdown.stop();
        self.join_workers();

        let Pipeline {
            conn,
            ctx,
            ddl,
            chunker,
            ..
        } = self;
        // Chunk writers exit only once every handle is gone.
        drop(ctx);
        ddl.shutdown();
        chunker.shutdown();
        drop(conn);
        info!("pipeline stopped");
    }
}

fn join_worker(handle: JoinHandle<WorkerReport>) -> Option<WorkerReport> {
    let name = handle.thread().name().unwrap_or("folder").to_string();
    match handle.join() {
        Ok(report) => Some(report),
        Err(_) => {
            error!(worker = %name, "folder worker panicked");
            None
        }
    }
}
