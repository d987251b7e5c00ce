//! Single-slot admission for folders whose target table does not exist yet.

use std::sync::{Arc, Mutex, MutexGuard};

use dataload_protocol::TableRef;
use tracing::debug;

/// At most one brand-new target table is being created pipeline-wide.
///
/// Non-blocking: a caller that is refused skips the folder for this
/// discovery pass. The slot is freed when the returned permit drops.
#[derive(Debug, Clone, Default)]
pub struct AdmissionGate {
    slot: Arc<Mutex<Option<TableRef>>>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<TableRef>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the slot for `table`, or `None` while any table (including this
    /// one) holds it.
    pub fn try_admit(&self, table: &TableRef) -> Option<AdmissionPermit> {
        let mut slot = self.lock();
        if let Some(holder) = slot.as_ref() {
            debug!(table = %table, holder = %holder, "admission refused");
            return None;
        }
        *slot = Some(table.clone());
        debug!(table = %table, "admitted new table");
        Some(AdmissionPermit {
            gate: self.clone(),
            table: table.clone(),
        })
    }

    pub fn holder(&self) -> Option<TableRef> {
        self.lock().clone()
    }
}

/// Releases the admission slot on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    gate: AdmissionGate,
    table: TableRef,
}

impl AdmissionPermit {
    pub fn table(&self) -> &TableRef {
        &self.table
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let mut slot = self.gate.lock();
        if slot.as_ref() == Some(&self.table) {
            *slot = None;
            debug!(table = %self.table, "admission released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn only_one_table_admitted_at_a_time() {
        let gate = AdmissionGate::new();
        let a = TableRef::new("s", "a");
        let b = TableRef::new("s", "b");

        let permit = gate.try_admit(&a).unwrap();
        assert!(gate.try_admit(&b).is_none());
        assert!(gate.try_admit(&a).is_none());
        assert_eq!(gate.holder(), Some(a.clone()));

        drop(permit);
        assert!(gate.holder().is_none());
        assert_eq!(gate.try_admit(&b).unwrap().table(), &b);
    }

    #[test]
    fn permit_released_when_holder_panics() {
        let gate = AdmissionGate::new();
        let permit = gate.try_admit(&TableRef::new("s", "a")).unwrap();

        let result = thread::spawn(move || {
            let _permit = permit;
            panic!("worker failed");
        })
        .join();

        assert!(result.is_err());
        assert!(gate.holder().is_none());
    }
}
