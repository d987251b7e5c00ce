//! Catalog lookups against `information_schema`.

use dataload_protocol::naming::quote_ident;
use dataload_protocol::TableRef;

use crate::backend::{BackendError, DbConnection, DbValue};

/// One column as the store's catalog reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    /// 1-based.
    pub ordinal: i64,
    pub data_type: String,
}

impl DbConnection {
    /// Whether `table` is currently visible in the catalog.
    pub fn table_exists(&self, table: &TableRef) -> Result<bool, BackendError> {
        let count: i64 = self.query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
            &[
                DbValue::from(table.schema.as_str()),
                DbValue::from(table.table.as_str()),
            ],
        )?;
        Ok(count > 0)
    }

    /// Columns of `table` in ordinal order. Empty when the table does not exist.
    pub fn table_columns(&self, table: &TableRef) -> Result<Vec<CatalogColumn>, BackendError> {
        let rows = self.query_all(
            "SELECT column_name, ordinal_position, data_type \
             FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
            &[
                DbValue::from(table.schema.as_str()),
                DbValue::from(table.table.as_str()),
            ],
        )?;

        rows.iter()
            .map(|row| {
                Ok(CatalogColumn {
                    name: row.get(0)?,
                    ordinal: row.get(1)?,
                    data_type: row.get::<String>(2)?.to_ascii_uppercase(),
                })
            })
            .collect()
    }

    pub fn ensure_schema(&self, schema: &str) -> Result<(), BackendError> {
        self.execute_batch(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(schema)
        ))
    }

    /// Rows currently in `table`.
    pub fn row_count(&self, table: &TableRef) -> Result<i64, BackendError> {
        self.query_scalar(&format!("SELECT COUNT(*) FROM {}", table.qualified()), &[])
    }
}
