use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::Address;

/// Keyed lock table serializing submissions per sender. Different senders
/// proceed in parallel; a sender's entry is dropped once the last holder
/// releases it so the table stays bounded by concurrent senders.
#[derive(Default)]
pub(crate) struct SenderLocks {
    locks: Mutex<HashMap<Address, Arc<Mutex<()>>>>,
}

impl SenderLocks {
    pub fn with_locked<R>(&self, addr: &Address, op: impl FnOnce() -> R) -> R {
        let handle = {
            let mut locks = self.locks.lock();
            locks.entry(addr.clone()).or_default().clone()
        };
        let out = {
            let _guard = handle.lock();
            op()
        };
        let mut locks = self.locks.lock();
        if let Some(existing) = locks.get(addr) {
            // Two strong counts mean the table and us; nobody else is queued
            // behind this entry, so it can go.
            if Arc::ptr_eq(existing, &handle) && Arc::strong_count(existing) == 2 {
                locks.remove(addr);
            }
        }
        out
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}
