//! Folder-watching ingestion pipeline.
//!
//! Files dropped into `<root>/<schema>/<table>/drop` are parsed, staged and
//! merged into `<schema>.<table>` in a DuckDB store, then archived. Each table
//! folder is drained by at most one worker at a time; all CREATE/DROP TABLE
//! statements run on two serializer threads; only one brand-new table is
//! created at a time.

pub mod cancel;
pub mod chunking;
pub mod config;
pub mod ddl;
pub mod discovery;
pub mod fsops;
pub mod gate;
pub mod notify;
pub mod output;
pub mod registry;
pub mod staging;
pub mod wait;
pub mod worker;

pub use cancel::ShutdownToken;
pub use chunking::{chunk_file_name, ChunkError, ChunkHandle, ChunkPipeline};
pub use config::{ConfigError, NotifyConfig, PipelineConfig, TableLayout};
pub use ddl::{CreateTableRequest, DdlHandle, DdlQueues, DropTableRequest};
pub use discovery::{Pipeline, PipelineError, PollSummary};
pub use fsops::TableFolder;
pub use gate::{AdmissionGate, AdmissionPermit};
pub use notify::{
    LogNotifier, Notification, NotificationKind, Notifier, NotifyError, OutboxNotifier,
};
pub use registry::{ActiveTableGuard, ActiveTables};
pub use staging::{SchemaDiff, StageError, StageOutcome, Stager};
pub use wait::{WaitPolicy, WaitTimeout};
pub use worker::{EngineContext, FailureKind, FileOutcome, FolderWorker, SkipReason, WorkerReport};
