//! Context: owns its native handle, its EventPools, and its
//! CommandListPool (spec.md §3, §4.2).

use std::sync::{Arc, Mutex, Weak};

use gpurt_core::caps::DeviceProps;
use gpurt_core::driver::Driver;
use gpurt_core::handle::{CommandListHandle, ContextHandle, DeviceHandle};

use crate::error::Result;
use crate::event::{self, Event, EventPoolInner};

const BASE_EVENT_POOL_CAPACITY: u32 = 64;

struct EventPoolGrowth {
    pools: Vec<Arc<EventPoolInner>>,
    events_requested: u64,
    events_reused: u64,
}

struct CommandListPoolState {
    free: Vec<CommandListHandle>,
    lists_requested: u64,
    lists_reused: u64,
}

pub(crate) struct ContextInner {
    handle: ContextHandle,
    device: DeviceHandle,
    owns_native: bool,
    driver: Arc<dyn Driver>,
    device_props: Arc<DeviceProps>,
    self_weak: Weak<ContextInner>,
    event_pools: Mutex<EventPoolGrowth>,
    cmd_lists: Mutex<CommandListPoolState>,
}

impl ContextInner {
    pub(crate) fn handle(&self) -> ContextHandle {
        self.handle
    }

    pub(crate) fn device(&self) -> DeviceHandle {
        self.device
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub(crate) fn device_props(&self) -> &Arc<DeviceProps> {
        &self.device_props
    }

    /// Event acquisition walks known pools under one held lock; if none
    /// has a free slot, a new (doubled-capacity) pool is allocated and
    /// its first event returned (spec.md §4.1 "EventPool capacity
    /// policy").
    pub(crate) fn acquire_event(&self) -> Result<Event> {
        let mut growth = self.event_pools.lock().unwrap();
        for pool in growth.pools.iter() {
            if let Some(result) = event::try_acquire_from_pool(pool, &self.self_weak, &self.driver, &self.device_props) {
                let (ev, reused) = result?;
                growth.events_requested += 1;
                if reused {
                    growth.events_reused += 1;
                }
                return Ok(ev);
            }
        }

        let generation = growth.pools.len() as u32;
        let capacity = BASE_EVENT_POOL_CAPACITY.checked_shl(generation).unwrap_or(u32::MAX);
        log::debug!("event pool exhausted, growing to generation {} (capacity {})", generation, capacity);
        let pool_handle = self.driver.create_event_pool(self.handle, capacity)?;
        let pool = Arc::new(EventPoolInner::new(pool_handle, capacity));
        growth.pools.push(Arc::clone(&pool));
        let (ev, _) = event::try_acquire_from_pool(&pool, &self.self_weak, &self.driver, &self.device_props)
            .expect("freshly created pool must have room for its first event")?;
        growth.events_requested += 1;
        Ok(ev)
    }

    pub(crate) fn event_pool_stats(&self) -> (u64, u64, usize) {
        let g = self.event_pools.lock().unwrap();
        (g.events_requested, g.events_reused, g.pools.len())
    }

    /// `acquireList` (spec.md §4.2): pop a reset list from the free
    /// stack, or create one via the native driver.
    pub(crate) fn acquire_command_list(&self) -> Result<CommandListHandle> {
        let mut st = self.cmd_lists.lock().unwrap();
        st.lists_requested += 1;
        if let Some(cl) = st.free.pop() {
            st.lists_reused += 1;
            return Ok(cl);
        }
        drop(st);
        Ok(self.driver.create_command_list(self.handle)?)
    }

    /// `returnList` (spec.md §4.2): reset, then push back onto the free
    /// stack so the stack only ever holds reset lists.
    pub(crate) fn return_command_list(&self, cl: CommandListHandle) {
        let _ = self.driver.reset_command_list(cl);
        self.cmd_lists.lock().unwrap().free.push(cl);
    }

    pub(crate) fn command_list_stats(&self) -> (u64, u64) {
        let st = self.cmd_lists.lock().unwrap();
        (st.lists_requested, st.lists_reused)
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let growth = self.event_pools.get_mut().unwrap();
        for pool in growth.pools.drain(..) {
            let _ = self.driver.destroy_event_pool(pool.handle);
        }
        let cmd_lists = self.cmd_lists.get_mut().unwrap();
        for cl in cmd_lists.free.drain(..) {
            let _ = self.driver.destroy_command_list(cl);
        }
        if self.owns_native {
            let _ = self.driver.destroy_context(self.handle);
        }
    }
}

/// A context (spec.md §3). Clone shares ownership; the native context,
/// its event pools, and its command-list pool are released once the last
/// clone drops.
#[derive(Clone)]
pub struct Context(pub(crate) Arc<ContextInner>);

impl Context {
    pub(crate) fn create(driver: Arc<dyn Driver>, device: DeviceHandle, device_props: Arc<DeviceProps>) -> Result<Self> {
        let handle = driver.create_context(device)?;
        let inner = Arc::new_cyclic(|weak| ContextInner {
            handle,
            device,
            owns_native: true,
            driver,
            device_props,
            self_weak: weak.clone(),
            event_pools: Mutex::new(EventPoolGrowth { pools: Vec::new(), events_requested: 0, events_reused: 0 }),
            cmd_lists: Mutex::new(CommandListPoolState { free: Vec::new(), lists_requested: 0, lists_reused: 0 }),
        });
        Ok(Context(inner))
    }

    pub fn handle(&self) -> ContextHandle {
        self.0.handle
    }

    pub fn device(&self) -> DeviceHandle {
        self.0.device
    }

    /// `(requested, reused)` counters for this context's command-list
    /// pool, exposed for the command-list-conservation property test.
    pub fn command_list_stats(&self) -> (u64, u64) {
        self.0.command_list_stats()
    }

    /// `(requested, reused, generation_count)` counters for this
    /// context's event pools.
    pub fn event_pool_stats(&self) -> (u64, u64, usize) {
        self.0.event_pool_stats()
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.0
    }

    pub(crate) fn acquire_event(&self) -> Result<crate::event::Event> {
        self.0.acquire_event()
    }

    pub(crate) fn acquire_command_list(&self) -> Result<CommandListHandle> {
        self.0.acquire_command_list()
    }

    pub(crate) fn return_command_list(&self, cl: CommandListHandle) {
        self.0.return_command_list(cl)
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        self.0.driver()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Context").field("handle", &self.0.handle).field("device", &self.0.device).finish()
    }
}
