//! Legacy default-stream synchronization, gated behind the
//! `default_queue_sync` Cargo feature (spec.md §5 `syncQueues` open
//! question). HIP's legacy default stream implicitly barriers against
//! every other blocking stream on the same device in both directions;
//! that behavior is surprising for code that otherwise expects streams to
//! run independently, so it is opt-in here rather than the default.

#[cfg(feature = "default_queue_sync")]
use std::sync::{Arc, Mutex};

#[cfg(feature = "default_queue_sync")]
use gpurt_core::handle::EventHandle;

#[cfg(feature = "default_queue_sync")]
use crate::queue::Queue;

#[cfg(feature = "default_queue_sync")]
#[derive(Default)]
pub(crate) struct LegacySyncGroup {
    blocking: Mutex<Vec<Queue>>,
    default: Mutex<Option<Queue>>,
}

#[cfg(feature = "default_queue_sync")]
impl LegacySyncGroup {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(LegacySyncGroup::default())
    }

    pub(crate) fn register_blocking(&self, queue: Queue) {
        self.blocking.lock().unwrap().push(queue);
    }

    pub(crate) fn set_default(&self, queue: Queue) {
        *self.default.lock().unwrap() = Some(queue);
    }

    /// Every blocking queue's current `LastEvent`, for the default queue
    /// to wait on before its own next operation.
    pub(crate) fn blocking_last_events(&self) -> Vec<EventHandle> {
        self.blocking.lock().unwrap().iter().filter_map(|q| q.last_event()).map(|e| e.handle()).collect()
    }

    /// The default queue's current `LastEvent`, for a blocking queue to
    /// wait on before its own next operation.
    pub(crate) fn default_last_event(&self) -> Option<EventHandle> {
        self.default.lock().unwrap().as_ref().and_then(|q| q.last_event()).map(|e| e.handle())
    }
}
