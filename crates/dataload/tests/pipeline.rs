//! Discovery, folder workers and file routing, end to end.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use common::{RecordingNotifier, TestEnv};
use dataload::{NotificationKind, Pipeline, PollSummary};
use dataload_protocol::naming::staging_table_name;
use dataload_protocol::{TableRef, Value};
use dataload_source::{FileSource, ParseError, ParsedFile, SchemaHint, TabularSource};

fn start(env: &TestEnv, notifier: Arc<RecordingNotifier>) -> Pipeline {
    let config = env.config();
    let source = Arc::new(FileSource::new(config.delimiter_bytes().unwrap()));
    Pipeline::start(config, source, notifier).unwrap()
}

#[test]
fn orders_csv_lands_in_a_new_table_and_is_archived() {
    let env = TestEnv::new();
    let dropped = env.drop_file("sales", "orders", "orders.csv", "id,name\n1,Alice\n2,Bob\n");
    let notifier = RecordingNotifier::new();
    let mut pipeline = start(&env, notifier.clone());

    let reports = pipeline.run_once().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].loaded, 1);
    assert_eq!(reports[0].rows, 2);

    let conn = pipeline.connection();
    let orders = TableRef::new("sales", "orders");
    let columns: Vec<String> = conn
        .table_columns(&orders)
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(
        columns,
        vec!["datafilestagehk", "filename", "load_datetime", "id", "name"]
    );
    assert_eq!(conn.row_count(&orders).unwrap(), 2);

    let profiles = pipeline.admin().recent_profiles(conn, Some("orders"), 10).unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].total_records, 2);
    assert_eq!(profiles[0].duplicate_records, 0);
    assert_eq!(profiles[0].column_count, 2);
    assert_eq!(profiles[0].delimiter.as_deref(), Some(","));
    assert!(profiles[0].load_success);
    assert!(profiles[0].load_ended_at.is_some());

    assert!(!dropped.exists());
    assert!(env.archived("sales", "orders", "orders.csv").exists());
    assert!(!env.errored("sales", "orders", "orders.csv").exists());
    assert!(notifier.sent().is_empty());

    pipeline.shutdown();
}

#[test]
fn re_dropping_a_loaded_file_only_archives_it() {
    let env = TestEnv::new();
    let content = "id,name\n1,Alice\n2,Bob\n";
    env.drop_file("sales", "orders", "orders.csv", content);
    let mut pipeline = start(&env, RecordingNotifier::new());
    pipeline.run_once().unwrap();

    env.drop_file("sales", "orders", "orders.csv", content);
    let reports = pipeline.run_once().unwrap();
    assert_eq!(reports[0].duplicates, 1);
    assert_eq!(reports[0].loaded, 0);

    let conn = pipeline.connection();
    assert_eq!(conn.row_count(&TableRef::new("sales", "orders")).unwrap(), 2);
    let profiles = pipeline.admin().recent_profiles(conn, Some("orders"), 10).unwrap();
    assert_eq!(profiles.iter().filter(|p| p.load_success).count(), 1);
    assert!(env.archived("sales", "orders", "orders.csv").exists());
    assert!(!env.drop_dir("sales", "orders").join("orders.csv").exists());

    pipeline.shutdown();
}

#[test]
fn later_files_merge_into_the_existing_table() {
    let env = TestEnv::new();
    env.drop_file("sales", "orders", "a.csv", "id,name\n1,Alice\n");
    env.drop_file("sales", "orders", "b.csv", "id,name\n2,Bob\n3,Carol\n");
    let mut pipeline = start(&env, RecordingNotifier::new());

    let reports = pipeline.run_once().unwrap();
    assert_eq!(reports[0].loaded, 2);
    assert_eq!(
        pipeline
            .connection()
            .row_count(&TableRef::new("sales", "orders"))
            .unwrap(),
        3
    );
    assert!(env.archived("sales", "orders", "a.csv").exists());
    assert!(env.archived("sales", "orders", "b.csv").exists());

    pipeline.shutdown();
}

#[test]
fn schema_drift_goes_to_error_and_keeps_staging() {
    let env = TestEnv::new();
    env.drop_file("sales", "orders", "a.csv", "id,name\n1,Alice\n");
    env.drop_file("sales", "orders", "b.csv", "id,name,extra\n2,Bob,7\n");
    let notifier = RecordingNotifier::new();
    let mut pipeline = start(&env, notifier.clone());

    let reports = pipeline.run_once().unwrap();
    assert_eq!(reports[0].loaded, 1);
    assert_eq!(reports[0].failed, 1);

    let orders = TableRef::new("sales", "orders");
    let conn = pipeline.connection();
    assert_eq!(conn.row_count(&orders).unwrap(), 1);
    let staging = orders.sibling(staging_table_name("orders", "b.csv", true));
    assert!(conn.table_exists(&staging).unwrap());

    assert!(env.errored("sales", "orders", "b.csv").exists());
    assert!(!env.archived("sales", "orders", "b.csv").exists());

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::SchemaMismatch);
    assert!(sent[0].message.contains("extra"));

    let errors = pipeline.admin().recent_errors(conn, 10).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].profile_key, sent[0].profile_key);
    assert!(errors[0].notification_sent);

    pipeline.shutdown();
}

#[test]
fn unreadable_file_is_rejected_with_invalid_format() {
    let env = TestEnv::new();
    env.drop_file("sales", "orders", "report.xlsx", "PK\u{3}\u{4}");
    env.drop_file("sales", "orders", "z.csv", "id,name\n1,Alice\n");
    let notifier = RecordingNotifier::new();
    let mut pipeline = start(&env, notifier.clone());

    let reports = pipeline.run_once().unwrap();
    assert_eq!(reports[0].failed, 1);
    assert_eq!(reports[0].loaded, 1);

    assert!(env.errored("sales", "orders", "report.xlsx").exists());
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::InvalidFormat);
    assert_eq!(sent[0].profile_key, "report.xlsx");

    let errors = pipeline.admin().recent_errors(pipeline.connection(), 10).unwrap();
    assert_eq!(errors[0].profile_key, "report.xlsx");

    pipeline.shutdown();
}

#[test]
fn metadata_column_clash_fails_fast_as_invalid_format() {
    let env = TestEnv::new();
    env.drop_file("sales", "docs", "docs.csv", "id,filename\n1,a.pdf\n");
    let mut config = env.config();
    config.max_wait_secs = 30;
    let source = Arc::new(FileSource::new(config.delimiter_bytes().unwrap()));
    let notifier = RecordingNotifier::new();
    let mut pipeline = Pipeline::start(config, source, notifier.clone()).unwrap();

    let started = Instant::now();
    let reports = pipeline.run_once().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(reports[0].failed, 1);

    assert!(env.errored("sales", "docs", "docs.csv").exists());
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::InvalidFormat);
    let errors = pipeline.admin().recent_errors(pipeline.connection(), 10).unwrap();
    assert!(errors[0].message.contains("filename"));
    assert!(!pipeline
        .connection()
        .table_exists(&TableRef::new("sales", "docs"))
        .unwrap());

    pipeline.shutdown();
}

/// Appends a row too short to insert to the first file it parses.
struct ShortRowSource {
    inner: FileSource,
    armed: AtomicBool,
}

impl TabularSource for ShortRowSource {
    fn parse(&self, path: &Path, hint: Option<&SchemaHint>) -> Result<ParsedFile, ParseError> {
        let mut parsed = self.inner.parse(path, hint)?;
        if self.armed.swap(false, Ordering::SeqCst) {
            parsed.rows.rows.push(vec![Value::Int(0)]);
        }
        Ok(parsed)
    }
}

#[test]
fn failed_first_load_leaves_no_rows_to_duplicate_on_redrop() {
    let env = TestEnv::new();
    let content = "id,name\n1,Alice\n2,Bob\n3,Cara\n4,Dan\n";
    env.drop_file("sales", "orders", "orders.csv", content);
    let mut config = env.config();
    config.insert_batch_rows = 2;
    let source = Arc::new(ShortRowSource {
        inner: FileSource::new(config.delimiter_bytes().unwrap()),
        armed: AtomicBool::new(true),
    });
    let notifier = RecordingNotifier::new();
    let mut pipeline = Pipeline::start(config, source, notifier.clone()).unwrap();
    let table = TableRef::new("sales", "orders");

    let reports = pipeline.run_once().unwrap();
    assert_eq!(reports[0].failed, 1);
    assert!(env.errored("sales", "orders", "orders.csv").exists());
    assert_eq!(notifier.sent()[0].kind, NotificationKind::LoadFailure);
    assert!(!pipeline.connection().table_exists(&table).unwrap());

    std::fs::remove_file(env.errored("sales", "orders", "orders.csv")).unwrap();
    env.drop_file("sales", "orders", "orders.csv", content);
    let reports = pipeline.run_once().unwrap();
    assert_eq!(reports[0].loaded, 1);
    assert_eq!(pipeline.connection().row_count(&table).unwrap(), 4);

    pipeline.shutdown();
}

#[test]
fn leftover_staging_table_sends_file_to_error_without_cleanup() {
    let env = TestEnv::new();
    env.drop_file("sales", "orders", "a.csv", "id,name\n1,Alice\n");
    let notifier = RecordingNotifier::new();
    let mut pipeline = start(&env, notifier.clone());
    pipeline.run_once().unwrap();

    let orders = TableRef::new("sales", "orders");
    let leftover = orders.sibling(staging_table_name("orders", "b.csv", true));
    pipeline
        .connection()
        .execute_batch(&format!("CREATE TABLE {} (x BIGINT)", leftover.qualified()))
        .unwrap();

    env.drop_file("sales", "orders", "b.csv", "id,name\n2,Bob\n");
    let reports = pipeline.run_once().unwrap();
    assert_eq!(reports[0].failed, 1);

    assert!(env.errored("sales", "orders", "b.csv").exists());
    assert!(pipeline.connection().table_exists(&leftover).unwrap());
    assert_eq!(pipeline.connection().row_count(&orders).unwrap(), 1);
    assert!(notifier.sent().is_empty());
    let errors = pipeline.admin().recent_errors(pipeline.connection(), 10).unwrap();
    assert!(errors[0].message.contains("unreclaimed staging table"));

    pipeline.shutdown();
}

#[test]
fn files_still_being_written_are_left_for_later() {
    let env = TestEnv::new();
    let dropped = env.drop_file("sales", "orders", "orders.csv", "id,name\n1,Alice\n");
    let mut config = env.config();
    config.settle_secs = 3600;
    let source = Arc::new(FileSource::new(config.delimiter_bytes().unwrap()));
    let mut pipeline = Pipeline::start(config, source, RecordingNotifier::new()).unwrap();

    let reports = pipeline.run_once().unwrap();
    assert_eq!(reports[0].skipped, 1);
    assert!(dropped.exists());
    assert!(!pipeline
        .connection()
        .table_exists(&TableRef::new("sales", "orders"))
        .unwrap());

    pipeline.shutdown();
}

/// Holds every parse until released.
struct BlockingSource {
    inner: FileSource,
    released: Mutex<bool>,
    cond: Condvar,
}

impl BlockingSource {
    fn new(inner: FileSource) -> Arc<Self> {
        Arc::new(Self {
            inner,
            released: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

impl TabularSource for BlockingSource {
    fn parse(&self, path: &Path, hint: Option<&SchemaHint>) -> Result<ParsedFile, ParseError> {
        let mut released = self.released.lock().unwrap();
        while !*released {
            released = self.cond.wait(released).unwrap();
        }
        drop(released);
        self.inner.parse(path, hint)
    }
}

#[test]
fn only_one_new_table_is_admitted_at_a_time() {
    let env = TestEnv::new();
    env.drop_file("sales", "alpha", "a.csv", "id\n1\n");
    env.drop_file("sales", "beta", "b.csv", "id\n2\n");
    let config = env.config();
    let source = BlockingSource::new(FileSource::new(config.delimiter_bytes().unwrap()));
    let mut pipeline = Pipeline::start(config, source.clone(), RecordingNotifier::new()).unwrap();

    let first = pipeline.poll_once().unwrap();
    assert_eq!(
        first,
        PollSummary {
            started: 1,
            deferred: 1,
            busy: 0
        }
    );
    let alpha = TableRef::new("sales", "alpha");
    assert_eq!(pipeline.admission_holder(), Some(alpha.clone()));
    assert_eq!(pipeline.active_tables(), vec![alpha.clone()]);

    // Still blocked: alpha is busy, beta still deferred.
    let second = pipeline.poll_once().unwrap();
    assert_eq!(second.started, 0);
    assert_eq!(second.busy, 1);
    assert_eq!(second.deferred, 1);

    source.release();
    let reports = pipeline.join_workers();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].table, alpha);
    assert_eq!(pipeline.admission_holder(), None);
    assert!(pipeline.active_tables().is_empty());

    let third = pipeline.poll_once().unwrap();
    assert_eq!(third.started, 1);
    assert_eq!(third.deferred, 0);
    pipeline.join_workers();

    let conn = pipeline.connection();
    assert!(conn.table_exists(&alpha).unwrap());
    assert!(conn.table_exists(&TableRef::new("sales", "beta")).unwrap());

    pipeline.shutdown();
}

#[test]
fn existing_tables_bypass_the_gate() {
    let env = TestEnv::new();
    env.drop_file("sales", "alpha", "a.csv", "id\n3\n");
    env.drop_file("sales", "beta", "b.csv", "id\n2\n");
    env.drop_file("sales", "gamma", "c.csv", "id\n4\n");
    let config = env.config();
    let source = BlockingSource::new(FileSource::new(config.delimiter_bytes().unwrap()));
    let mut pipeline = Pipeline::start(config, source.clone(), RecordingNotifier::new()).unwrap();
    pipeline
        .connection()
        .execute_batch("CREATE SCHEMA sales; CREATE TABLE sales.alpha (x BIGINT)")
        .unwrap();

    let summary = pipeline.poll_once().unwrap();
    // alpha skips the gate; only one of beta and gamma is admitted.
    assert_eq!(summary.started, 2);
    assert_eq!(summary.deferred, 1);
    assert_eq!(pipeline.admission_holder(), Some(TableRef::new("sales", "beta")));

    source.release();
    assert_eq!(pipeline.join_workers().len(), 2);
    pipeline.shutdown();
}
