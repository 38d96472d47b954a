use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use signoff_core::domain::request::RequestId;

/// Keyed async mutexes, one per request id. Entries are held weakly so a
/// request that nobody is working on costs nothing once its guard drops.
#[derive(Default)]
pub struct RequestLocks {
    slots: Mutex<HashMap<RequestId, Weak<AsyncMutex<()>>>>,
}

impl RequestLocks {
    pub async fn acquire(&self, request_id: &RequestId) -> OwnedMutexGuard<()> {
        let slot = self.slot(request_id);
        slot.lock_owned().await
    }

    fn slot(&self, request_id: &RequestId) -> Arc<AsyncMutex<()>> {
        let mut slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.retain(|_, slot| slot.strong_count() > 0);

        if let Some(existing) = slots.get(request_id).and_then(Weak::upgrade) {
            return existing;
        }
        let slot = Arc::new(AsyncMutex::new(()));
        slots.insert(request_id.clone(), Arc::downgrade(&slot));
        slot
    }

    /// Requests with a live guard or waiter.
    pub fn tracked(&self) -> usize {
        let slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.values().filter(|slot| slot.strong_count() > 0).count()
    }
}
