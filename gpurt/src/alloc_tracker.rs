//! Per-device allocation accounting (spec.md §4.5).
//!
//! Deliberately thin: spec.md §1 names "allocation accounting beyond the
//! contract that the allocator reports success/failure and tracks base
//! pointer + size" as out of scope. `get_by_dev` therefore only resolves
//! exact base-pointer matches — `DevicePtr` is an opaque handle, not a
//! real address, so there is no pointer arithmetic to support
//! containment lookups against sub-allocation offsets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gpurt_core::driver::Driver;
use gpurt_core::error::ErrorKind;
use gpurt_core::handle::DevicePtr;

use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct AllocRecord {
    pub base: DevicePtr,
    pub size: usize,
}

struct TrackerState {
    by_dev: HashMap<DevicePtr, AllocRecord>,
    host_aliases: HashMap<u64, DevicePtr>,
    total_used: u64,
    peak_used: u64,
}

pub struct AllocationTracker {
    driver: Arc<dyn Driver>,
    global_capacity: u64,
    state: Mutex<TrackerState>,
}

impl AllocationTracker {
    pub fn new(driver: Arc<dyn Driver>, global_capacity: u64) -> Self {
        AllocationTracker {
            driver,
            global_capacity,
            state: Mutex::new(TrackerState {
                by_dev: HashMap::new(),
                host_aliases: HashMap::new(),
                total_used: 0,
                peak_used: 0,
            }),
        }
    }

    /// Atomically admits or rejects `bytes` against remaining capacity.
    pub fn reserve(&self, bytes: u64) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.total_used.saturating_add(bytes) > self.global_capacity {
            return Err(ErrorKind::OutOfMemory(format!(
                "requested {} bytes, {} of {} available",
                bytes,
                self.global_capacity.saturating_sub(st.total_used),
                self.global_capacity
            ))
            .into());
        }
        st.total_used += bytes;
        if st.total_used > st.peak_used {
            st.peak_used = st.total_used;
        }
        Ok(())
    }

    pub fn release(&self, bytes: u64) {
        let mut st = self.state.lock().unwrap();
        st.total_used = st.total_used.saturating_sub(bytes);
    }

    pub fn record(&self, dev_ptr: DevicePtr, size: usize) {
        self.state.lock().unwrap().by_dev.insert(dev_ptr, AllocRecord { base: dev_ptr, size });
    }

    /// Removes and returns the entry for `dev_ptr`, if any. Does not by
    /// itself release quota — callers pair this with `release`.
    pub fn forget(&self, dev_ptr: DevicePtr) -> Option<AllocRecord> {
        self.state.lock().unwrap().by_dev.remove(&dev_ptr)
    }

    pub fn get_by_dev(&self, p: DevicePtr) -> Option<AllocRecord> {
        self.state.lock().unwrap().by_dev.get(&p).copied()
    }

    pub fn register_host_alias(&self, host_id: u64, dev_ptr: DevicePtr) {
        self.state.lock().unwrap().host_aliases.insert(host_id, dev_ptr);
    }

    pub fn get_by_host(&self, host_id: u64) -> Option<AllocRecord> {
        let st = self.state.lock().unwrap();
        st.host_aliases.get(&host_id).and_then(|dp| st.by_dev.get(dp)).copied()
    }

    pub fn total_used(&self) -> u64 {
        self.state.lock().unwrap().total_used
    }

    pub fn peak_used(&self) -> u64 {
        self.state.lock().unwrap().peak_used
    }
}

impl Drop for AllocationTracker {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap();
        for (ptr, _) in st.by_dev.drain() {
            let _ = self.driver.free(ptr);
        }
        st.host_aliases.clear();
        st.total_used = 0;
    }
}
