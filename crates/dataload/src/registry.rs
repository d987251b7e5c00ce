use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use dataload_protocol::TableRef;

/// Target tables that currently have a running folder worker.
#[derive(Debug, Clone, Default)]
pub struct ActiveTables {
    inner: Arc<Mutex<BTreeSet<TableRef>>>,
}

impl ActiveTables {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<TableRef>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `table` for one worker. `None` if another worker holds it.
    pub fn try_claim(&self, table: &TableRef) -> Option<ActiveTableGuard> {
        if !self.lock().insert(table.clone()) {
            return None;
        }
        Some(ActiveTableGuard {
            registry: self.clone(),
            table: table.clone(),
        })
    }

    pub fn is_active(&self, table: &TableRef) -> bool {
        self.lock().contains(table)
    }

    pub fn snapshot(&self) -> Vec<TableRef> {
        self.lock().iter().cloned().collect()
    }
}

/// Removes its table from the registry on drop, including during unwinding.
#[derive(Debug)]
pub struct ActiveTableGuard {
    registry: ActiveTables,
    table: TableRef,
}

impl ActiveTableGuard {
    pub fn table(&self) -> &TableRef {
        &self.table
    }
}

impl Drop for ActiveTableGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.table);
    }
}
