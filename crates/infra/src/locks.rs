//! Per-stream mutual exclusion inside one process.
//!
//! The event store already rejects a stale append; holding the stream lock
//! across dispatch and projection apply additionally keeps read models fed in
//! sequence order when several threads write the same invoice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use feeledger_core::{AggregateId, TenantId};

#[derive(Debug, Default)]
pub struct StreamLocks {
    inner: Mutex<HashMap<(TenantId, AggregateId), Arc<Mutex<()>>>>,
}

impl StreamLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> Arc<Mutex<()>> {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry((tenant_id, aggregate_id)).or_default().clone()
    }

    /// Run `f` while holding the lock of one stream.
    pub fn with_lock<T>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        f: impl FnOnce() -> T,
    ) -> T {
        let lock = self.lock_for(tenant_id, aggregate_id);
        let out = {
            let _guard = match lock.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            f()
        };
        drop(lock);
        self.release(tenant_id, aggregate_id);
        out
    }

    /// Drop the entry once no caller holds or waits on it. Clones are only
    /// taken under the map lock, so a count of one cannot race upward.
    fn release(&self, tenant_id: TenantId, aggregate_id: AggregateId) {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let key = (tenant_id, aggregate_id);
        if map.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(&key);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn same_stream_is_serialized() {
        let locks = Arc::new(StreamLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let tenant = TenantId::new();
        let id = AggregateId::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                thread::spawn(move || {
                    locks.with_lock(tenant, id, || {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[test]
    fn released_streams_are_forgotten() {
        let locks = StreamLocks::new();
        let tenant = TenantId::new();
        for _ in 0..100 {
            locks.with_lock(tenant, AggregateId::new(), || ());
        }
        assert_eq!(locks.tracked(), 0);

        let outer = AggregateId::new();
        locks.with_lock(tenant, outer, || {
            locks.with_lock(tenant, AggregateId::new(), || ());
            assert_eq!(locks.tracked(), 1);
        });
        assert_eq!(locks.tracked(), 0);
    }
}
