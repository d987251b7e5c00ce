//! DDL serialization queues.
//!
//! All CREATE TABLE and DROP TABLE statements run on two dedicated threads,
//! one per queue, each with its own connection. Producers enqueue and poll the
//! catalog; they never execute DDL themselves. A failed statement is logged
//! and skipped; the producer sees it as a wait timeout.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dataload_db::{BackendError, DbConnection};
use dataload_protocol::naming::quote_ident;
use dataload_protocol::{TableRef, TableSchema};
use tracing::{debug, error, info, trace};

/// Create `table` with columns derived from a row-set.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableRequest {
    pub table: TableRef,
    pub schema: TableSchema,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTableRequest {
    pub table: TableRef,
}

trait DdlStatement: Send + 'static {
    const KIND: &'static str;
    fn table(&self) -> &TableRef;
    fn sql(&self) -> String;
}

impl DdlStatement for CreateTableRequest {
    const KIND: &'static str = "create";

    fn table(&self) -> &TableRef {
        &self.table
    }

    fn sql(&self) -> String {
        format!(
            "CREATE SCHEMA IF NOT EXISTS {}; CREATE TABLE {} ({});",
            quote_ident(&self.table.schema),
            self.table.qualified(),
            self.schema.column_ddl()
        )
    }
}

impl DdlStatement for DropTableRequest {
    const KIND: &'static str = "drop";

    fn table(&self) -> &TableRef {
        &self.table
    }

    fn sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {};", self.table.qualified())
    }
}

enum Command<R> {
    Run(R),
    Stop,
}

type PendingDrops = Arc<Mutex<HashSet<TableRef>>>;

fn lock_pending(pending: &PendingDrops) -> MutexGuard<'_, HashSet<TableRef>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Producer side of both queues. Cheap to clone; one per worker.
#[derive(Clone)]
pub struct DdlHandle {
    create_tx: Sender<Command<CreateTableRequest>>,
    drop_tx: Sender<Command<DropTableRequest>>,
    pending_drops: PendingDrops,
}

impl DdlHandle {
    /// Queue a create. Returns false if the create serializer is gone.
    pub fn enqueue_create(&self, request: CreateTableRequest) -> bool {
        debug!(table = %request.table, "create queued");
        self.create_tx.send(Command::Run(request)).is_ok()
    }

    /// Queue a drop and mark the table as pending removal until the drop
    /// serializer has executed it.
    pub fn enqueue_drop(&self, request: DropTableRequest) -> bool {
        debug!(table = %request.table, "drop queued");
        let table = request.table.clone();
        lock_pending(&self.pending_drops).insert(table.clone());
        if self.drop_tx.send(Command::Run(request)).is_err() {
            lock_pending(&self.pending_drops).remove(&table);
            return false;
        }
        true
    }

    pub fn is_drop_pending(&self, table: &TableRef) -> bool {
        lock_pending(&self.pending_drops).contains(table)
    }
}

/// The two serializer threads. Lives as long as the pipeline.
pub struct DdlQueues {
    handle: DdlHandle,
    threads: Vec<JoinHandle<()>>,
}

impl DdlQueues {
    /// Spawn both serializers on clones of `conn`. `idle` is how long a
    /// serializer blocks on an empty queue before logging and re-checking.
    pub fn start(conn: &DbConnection, idle: Duration) -> Result<Self, BackendError> {
        let pending_drops: PendingDrops = Arc::default();

        let (create_tx, create_rx) = mpsc::channel();
        let create_conn = conn.try_clone()?;
        let create_thread = thread::Builder::new()
            .name("ddl-create".to_string())
            .spawn(move || run_serializer(create_conn, create_rx, idle, |_| {}))
            .map_err(|e| BackendError::Database(format!("spawn ddl-create: {e}")))?;

        let (drop_tx, drop_rx) = mpsc::channel();
        let drop_conn = conn.try_clone()?;
        let drop_pending = Arc::clone(&pending_drops);
        let drop_thread = thread::Builder::new()
            .name("ddl-drop".to_string())
            .spawn(move || {
                run_serializer(drop_conn, drop_rx, idle, |req: &DropTableRequest| {
                    lock_pending(&drop_pending).remove(&req.table);
                })
            })
            .map_err(|e| BackendError::Database(format!("spawn ddl-drop: {e}")))?;

        info!("DDL serializers started");
        Ok(Self {
            handle: DdlHandle {
                create_tx,
                drop_tx,
                pending_drops,
            },
            threads: vec![create_thread, drop_thread],
        })
    }

    pub fn handle(&self) -> DdlHandle {
        self.handle.clone()
    }

    /// Finish everything already queued, then stop both serializers.
    pub fn shutdown(self) {
        let _ = self.handle.create_tx.send(Command::Stop);
        let _ = self.handle.drop_tx.send(Command::Stop);
        for thread in self.threads {
            if thread.join().is_err() {
                error!("DDL serializer panicked");
            }
        }
        info!("DDL serializers stopped");
    }
}

fn run_serializer<R, F>(conn: DbConnection, rx: Receiver<Command<R>>, idle: Duration, on_done: F)
where
    R: DdlStatement,
    F: Fn(&R),
{
    loop {
        let request = match rx.recv_timeout(idle) {
            Ok(Command::Run(request)) => request,
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                trace!(kind = R::KIND, "DDL queue idle");
                continue;
            }
        };

        let sql = request.sql();
        match conn.transaction(|tx| tx.execute_batch(&sql)) {
            Ok(()) => info!(kind = R::KIND, table = %request.table(), "DDL executed"),
            Err(err) => error!(kind = R::KIND, table = %request.table(), "DDL failed: {}", err),
        }
        on_done(&request);
    }
}
