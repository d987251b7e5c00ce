//! Cloned connections share one database: appends from several threads land,
//! and DDL from one handle becomes visible to the others.

use dataload_db::{DbConnection, DbValue};
use dataload_protocol::TableRef;
use std::thread;
use tempfile::TempDir;

#[test]
fn concurrent_appends_from_cloned_connections() {
    let temp = TempDir::new().unwrap();
    let conn = DbConnection::open(&temp.path().join("store.duckdb")).unwrap();
    conn.ensure_schema("sales").unwrap();

    let handles: Vec<_> = (0..4_i64)
        .map(|worker| {
            let conn = conn.try_clone().unwrap();
            let table = TableRef::new("sales", format!("t{worker}"));
            conn.execute_batch(&format!(
                "CREATE TABLE {} (id BIGINT, worker BIGINT)",
                table.qualified()
            ))
            .unwrap();
            thread::spawn(move || {
                let rows: Vec<Vec<DbValue>> = (0..500_i64)
                    .map(|i| vec![DbValue::from(i), DbValue::from(worker)])
                    .collect();
                for batch in rows.chunks(100) {
                    conn.transaction(|tx| tx.bulk_insert_rows(&table, &["id", "worker"], batch))
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    for worker in 0..4 {
        let count = conn
            .row_count(&TableRef::new("sales", format!("t{worker}")))
            .unwrap();
        assert_eq!(count, 500);
    }
}

#[test]
fn ddl_on_one_handle_is_visible_on_another() {
    let temp = TempDir::new().unwrap();
    let conn = DbConnection::open(&temp.path().join("store.duckdb")).unwrap();
    let other = conn.try_clone().unwrap();
    let table = TableRef::new("main", "visible");

    assert!(!other.table_exists(&table).unwrap());
    conn.execute_batch(&format!("CREATE TABLE {} (a BIGINT)", table.qualified()))
        .unwrap();
    assert!(other.table_exists(&table).unwrap());

    conn.execute_batch(&format!("DROP TABLE {}", table.qualified()))
        .unwrap();
    assert!(!other.table_exists(&table).unwrap());
}

#[test]
fn open_is_refused_while_locked() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.duckdb");
    let _conn = DbConnection::open(&path).unwrap();

    let err = DbConnection::open(&path).unwrap_err();
    assert!(matches!(err, dataload_db::BackendError::Locked(_)));
}
