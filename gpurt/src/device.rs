//! Device: owns Queues and Modules, plus the device-variable index used to
//! resolve a host-side identifier to the module/name that declared it
//! (spec.md §3, §6 `registerDeviceVariable`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use gpurt_core::caps::{DeviceProps, QueueGroupKind};
use gpurt_core::driver::Driver;
use gpurt_core::handle::{DeviceHandle, DevicePtr};
use gpurt_core::types::MemSpace;

use crate::alloc_tracker::AllocationTracker;
use crate::callback::CallbackQueue;
use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::module::Module;
use crate::monitor::EventTracker;
use crate::queue::{Queue, WeakQueue};

struct DeviceInner {
    handle: DeviceHandle,
    ctx: Context,
    driver: Arc<dyn Driver>,
    props: Arc<DeviceProps>,
    config: Arc<RuntimeConfig>,
    tracker: EventTracker,
    callbacks: CallbackQueue,
    compute_next: AtomicU32,
    copy_next: AtomicU32,
    modules: Mutex<Vec<Module>>,
    device_vars: Mutex<HashMap<u64, (Module, String)>>,
    allocations: AllocationTracker,
    /// Every queue this device has ever minted, by weak reference, so
    /// `live_queues` can report only the ones a caller still holds
    /// (spec.md §9 "Design Notes" teardown: `Backend::drop` finishes the
    /// real outstanding queues, not freshly-minted empty ones).
    queues: Mutex<Vec<WeakQueue>>,
    #[cfg(feature = "default_queue_sync")]
    legacy: Arc<crate::legacy_sync::LegacySyncGroup>,
    #[cfg(feature = "default_queue_sync")]
    default_queue: Mutex<Option<Queue>>,
}

/// A device (spec.md §3). Exclusively owns its Queues and Modules.
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);

impl Device {
    pub(crate) fn create(
        ctx: Context,
        handle: DeviceHandle,
        driver: Arc<dyn Driver>,
        props: Arc<DeviceProps>,
        config: Arc<RuntimeConfig>,
        tracker: EventTracker,
        callbacks: CallbackQueue,
    ) -> Result<Self> {
        let allocations = AllocationTracker::new(Arc::clone(&driver), props.global_memory_bytes);
        Ok(Device(Arc::new(DeviceInner {
            handle,
            ctx,
            driver,
            props,
            config,
            tracker,
            callbacks,
            compute_next: AtomicU32::new(0),
            copy_next: AtomicU32::new(0),
            modules: Mutex::new(Vec::new()),
            device_vars: Mutex::new(HashMap::new()),
            allocations,
            queues: Mutex::new(Vec::new()),
            #[cfg(feature = "default_queue_sync")]
            legacy: crate::legacy_sync::LegacySyncGroup::new(),
            #[cfg(feature = "default_queue_sync")]
            default_queue: Mutex::new(None),
        })))
    }

    pub fn handle(&self) -> DeviceHandle {
        self.0.handle
    }

    pub fn props(&self) -> &Arc<DeviceProps> {
        &self.0.props
    }

    pub fn context(&self) -> &Context {
        &self.0.ctx
    }

    /// Round-robins across the physical queues in `kind`'s group (spec.md
    /// §4.4 "Copy-queue round-robin"). Falls back to the compute group if
    /// no copy group exists.
    fn next_queue_index(&self, kind: QueueGroupKind) -> (QueueGroupKind, u32) {
        match kind {
            QueueGroupKind::Copy => match self.0.props.copy_group() {
                Some(group) if group.count > 0 => {
                    let i = self.0.copy_next.fetch_add(1, Ordering::Relaxed) % group.count;
                    (QueueGroupKind::Copy, i)
                }
                _ => self.next_queue_index(QueueGroupKind::Compute),
            },
            QueueGroupKind::Compute => {
                let group = self.0.props.compute_group().expect("device must expose a compute queue group");
                let i = self.0.compute_next.fetch_add(1, Ordering::Relaxed) % group.count.max(1);
                (QueueGroupKind::Compute, i)
            }
        }
    }

    pub fn new_queue(&self, kind: QueueGroupKind, blocking: bool, priority: i32) -> Result<Queue> {
        let (kind, index) = self.next_queue_index(kind);
        let queue = Queue::create(
            self.0.ctx.clone(),
            self.0.handle,
            Arc::clone(&self.0.driver),
            &self.0.props,
            self.0.config.immediate_command_lists,
            kind,
            index,
            blocking,
            priority,
            self.0.tracker.clone(),
            self.0.callbacks.clone(),
        )?;
        self.track_queue(&queue);
        #[cfg(feature = "default_queue_sync")]
        if blocking {
            self.0.legacy.register_blocking(queue.clone());
            queue.attach_legacy_group(Arc::clone(&self.0.legacy), false);
        }
        Ok(queue)
    }

    /// Records a weak reference to `queue` so `live_queues` can find it
    /// later, pruning any references to queues the caller has already
    /// dropped in the same pass.
    fn track_queue(&self, queue: &Queue) {
        let mut queues = self.0.queues.lock().unwrap();
        queues.retain(|w| w.upgrade().is_some());
        queues.push(queue.downgrade());
    }

    /// Every queue minted by this device that the caller still holds
    /// (spec.md §9 "Design Notes" teardown: finish every outstanding
    /// queue, not a synthetic one).
    pub(crate) fn live_queues(&self) -> Vec<Queue> {
        self.0.queues.lock().unwrap().iter().filter_map(|w| w.upgrade()).collect()
    }

    /// The device's legacy default stream (spec.md §5 `syncQueues` open
    /// question), created lazily on first use. Only meaningful with the
    /// `default_queue_sync` feature enabled; every blocking queue this
    /// device has already created (or creates afterward) synchronizes
    /// against it in both directions.
    #[cfg(feature = "default_queue_sync")]
    pub fn default_queue(&self) -> Result<Queue> {
        let mut slot = self.0.default_queue.lock().unwrap();
        if let Some(queue) = slot.as_ref() {
            return Ok(queue.clone());
        }
        let (kind, index) = self.next_queue_index(QueueGroupKind::Compute);
        let queue = Queue::create(
            self.0.ctx.clone(),
            self.0.handle,
            Arc::clone(&self.0.driver),
            &self.0.props,
            self.0.config.immediate_command_lists,
            kind,
            index,
            true,
            0,
            self.0.tracker.clone(),
            self.0.callbacks.clone(),
        )?;
        self.track_queue(&queue);
        queue.attach_legacy_group(Arc::clone(&self.0.legacy), true);
        self.0.legacy.set_default(queue.clone());
        *slot = Some(queue.clone());
        Ok(queue)
    }

    /// `registerModuleStr` (spec.md §6): stores the module's SPIR-V byte
    /// blob. Native compilation is deferred to the module's own one-shot
    /// gate (spec.md §4.3 `compileOnce`).
    pub fn register_module(&self, spirv: Vec<u8>) -> Result<Module> {
        let module = Module::new(self.0.ctx.clone(), self.0.handle, Arc::clone(&self.0.driver), spirv, self.0.config.jit_flags.clone());
        self.0.modules.lock().unwrap().push(module.clone());
        Ok(module)
    }

    pub fn unregister_module(&self, module: &Module) {
        self.0.modules.lock().unwrap().retain(|m| m.handle_hint() != module.handle_hint());
        self.0.device_vars.lock().unwrap().retain(|_, (m, _)| m.handle_hint() != module.handle_hint());
    }

    /// `registerDeviceVariable` (spec.md §6): indexes `host_id` (the
    /// HIP-style host symbol identity, modeled here as an opaque `u64`
    /// rather than a raw pointer) against the module/name pair so later
    /// host-side lookups can resolve it back to a `DeviceVar`.
    pub fn register_device_variable(&self, module: &Module, host_id: u64, name: &str) -> Result<()> {
        module.device_var(name)?;
        self.0.device_vars.lock().unwrap().insert(host_id, (module.clone(), name.to_string()));
        Ok(())
    }

    pub fn device_variable_by_host_id(&self, host_id: u64) -> Result<crate::module::DeviceVar> {
        let (module, name) = self
            .0
            .device_vars
            .lock()
            .unwrap()
            .get(&host_id)
            .cloned()
            .ok_or_else(|| Error::from(gpurt_core::error::ErrorKind::InvalidSymbol(format!("unregistered device variable host id {}", host_id))))?;
        module.device_var(&name)
    }

    pub fn alloc(&self, size: usize, align: usize, space: MemSpace) -> Result<DevicePtr> {
        self.0.allocations.reserve(size as u64)?;
        match self.0.driver.alloc(self.0.ctx.handle(), self.0.handle, size, align, space) {
            Ok(ptr) => {
                self.0.allocations.record(ptr, size);
                Ok(ptr)
            }
            Err(e) => {
                self.0.allocations.release(size as u64);
                Err(e.into())
            }
        }
    }

    pub fn free(&self, ptr: DevicePtr) -> Result<()> {
        let record = self.0.allocations.forget(ptr);
        self.0.driver.free(ptr)?;
        if let Some(record) = record {
            self.0.allocations.release(record.size as u64);
        }
        Ok(())
    }

    pub fn total_used(&self) -> u64 {
        self.0.allocations.total_used()
    }

    pub fn peak_used(&self) -> u64 {
        self.0.allocations.peak_used()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Device").field("handle", &self.0.handle).field("name", &self.0.props.name).finish()
    }
}
