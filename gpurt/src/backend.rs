//! Backend: the process-wide singleton (spec.md §3, §6).
//!
//! Initialized lazily on first use via `lazy_static`, grounded on the
//! teacher's own `lazy_static` dev-dependency (`ocl/Cargo.toml`). Owns
//! every `Context`/`Device`, the active-device pointer, the callback FIFO,
//! the in-construction `ExecItem` stack backing the `configureCall`/
//! `setArg`/`launch` calling convention, and the `EventMonitor`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gpurt_core::caps::QueueGroupKind;
use gpurt_core::driver::Driver;
use gpurt_core::handle::{DeviceHandle, DevicePtr};
use gpurt_core::sim::SimDriver;
use gpurt_core::types::{Dim3, MemSpace};

use lazy_static::lazy_static;

use crate::callback;
use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::exec_item::ExecItem;
use crate::event::Event;
use crate::module::{Kernel, Module};
use crate::monitor::{EventMonitor, EventTracker};
use crate::queue::Queue;

#[derive(Default)]
struct BackendState {
    devices: Vec<DeviceHandle>,
    device_objects: HashMap<DeviceHandle, Device>,
    contexts: HashMap<DeviceHandle, Context>,
    active_device: Option<DeviceHandle>,
    exec_item_stack: Vec<ExecItem>,
}

pub struct Backend {
    driver: Arc<dyn Driver>,
    state: Mutex<BackendState>,
    tracker: EventTracker,
    callbacks: callback::CallbackQueue,
    monitor: Mutex<Option<EventMonitor>>,
    config: Arc<RuntimeConfig>,
}

impl Backend {
    fn new() -> Self {
        let config = Arc::new(RuntimeConfig::from_env());

        let sim = SimDriver::new();
        sim.add_default_device();
        let driver: Arc<dyn Driver> = Arc::new(sim);

        let (callbacks, callback_receiver) = callback::channel();
        let tracker = EventTracker::new();
        let monitor = EventMonitor::start(tracker.clone(), callback_receiver);

        let backend = Backend { driver, state: Mutex::new(BackendState::default()), tracker, callbacks, monitor: Mutex::new(Some(monitor)), config };
        backend.bring_up_devices();
        backend
    }

    fn bring_up_devices(&self) {
        let handles = self.driver.enumerate_devices();
        let mut state = self.state.lock().unwrap();
        for handle in handles {
            let props = match self.driver.device_props(handle) {
                Ok(p) => Arc::new(p),
                Err(_) => continue,
            };
            let ctx = match Context::create(Arc::clone(&self.driver), handle, Arc::clone(&props)) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let device = match Device::create(ctx.clone(), handle, Arc::clone(&self.driver), props, Arc::clone(&self.config), self.tracker.clone(), self.callbacks.clone()) {
                Ok(d) => d,
                Err(_) => continue,
            };
            if state.active_device.is_none() {
                state.active_device = Some(handle);
            }
            state.devices.push(handle);
            state.contexts.insert(handle, ctx);
            state.device_objects.insert(handle, device);
        }
    }

    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.state.lock().unwrap().devices.clone()
    }

    pub fn set_active_device(&self, device: DeviceHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.device_objects.contains_key(&device) {
            return Err(gpurt_core::error::ErrorKind::InvalidHandle(format!("{:?}", device)).into());
        }
        state.active_device = Some(device);
        Ok(())
    }

    pub fn active_device(&self) -> Result<Device> {
        let state = self.state.lock().unwrap();
        let handle = state.active_device.ok_or_else(|| Error::from(gpurt_core::error::ErrorKind::InitializationError("no active device".into())))?;
        state.device_objects.get(&handle).cloned().ok_or_else(|| Error::from(gpurt_core::error::ErrorKind::InvalidHandle(format!("{:?}", handle))))
    }

    pub fn active_context(&self) -> Result<Context> {
        let device = self.active_device()?;
        Ok(device.context().clone())
    }

    /// Creates a new queue on the active device (spec.md §6
    /// `getActive{Queue,...}` is modeled as "mint one on demand" since the
    /// spec does not require queue caching beyond what `Device`'s
    /// round-robin already provides).
    pub fn new_queue(&self, kind: QueueGroupKind, blocking: bool, priority: i32) -> Result<Queue> {
        self.active_device()?.new_queue(kind, blocking, priority)
    }

    /// The active device's legacy default stream. Only present with the
    /// `default_queue_sync` feature enabled (spec.md §5 `syncQueues` open
    /// question).
    #[cfg(feature = "default_queue_sync")]
    pub fn default_queue(&self) -> Result<Queue> {
        self.active_device()?.default_queue()
    }

    pub fn register_module(&self, spirv: &[u8]) -> Result<Module> {
        self.active_device()?.register_module(spirv.to_vec())
    }

    pub fn unregister_module(&self, module: &Module) -> Result<()> {
        self.active_device()?.unregister_module(module);
        Ok(())
    }

    pub fn register_function_as_kernel(&self, module: &Module, name: &str) -> Result<Kernel> {
        module.kernel(name)
    }

    pub fn register_device_variable(&self, module: &Module, host_id: u64, name: &str) -> Result<()> {
        self.active_device()?.register_device_variable(module, host_id, name)
    }

    pub fn alloc(&self, size: usize, align: usize, space: MemSpace) -> Result<DevicePtr> {
        self.active_device()?.alloc(size, align, space)
    }

    pub fn free(&self, ptr: DevicePtr) -> Result<()> {
        self.active_device()?.free(ptr)
    }

    /// `configureCall` (spec.md §6): pushes a partially-built `ExecItem`
    /// that subsequent `set_arg`/`launch` calls address.
    pub fn configure_call(&self, queue: Queue, kernel: Kernel, grid: Dim3, block: Dim3, shared_mem_bytes: u32) {
        let item = ExecItem::new(queue, kernel, grid, block, shared_mem_bytes);
        self.state.lock().unwrap().exec_item_stack.push(item);
    }

    pub fn set_arg(&self, index: usize, offset: usize, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let item = state
            .exec_item_stack
            .last_mut()
            .ok_or_else(|| Error::from(gpurt_core::error::ErrorKind::InvalidValue("set_arg with no pending configure_call".into())))?;
        item.set_arg(index, offset, data)
    }

    /// Pops the pending `ExecItem` and launches it on its queue.
    pub fn launch(&self) -> Result<Event> {
        let item = self
            .state
            .lock()
            .unwrap()
            .exec_item_stack
            .pop()
            .ok_or_else(|| Error::from(gpurt_core::error::ErrorKind::InvalidValue("launch with no pending configure_call".into())))?;
        let queue = item.queue.clone();
        queue.launch(item)
    }
}

impl Drop for Backend {
    /// spec.md §9 "Design Notes" teardown: join the monitor, finish every
    /// queue a caller actually used, then let `Context`/`Device`'s own
    /// `Drop` impls release allocations and destroy native contexts.
    fn drop(&mut self) {
        if let Some(mut monitor) = self.monitor.lock().unwrap().take() {
            monitor.stop();
        }
        let state = self.state.lock().unwrap();
        for handle in state.devices.iter().rev() {
            if let Some(device) = state.device_objects.get(handle) {
                for queue in device.live_queues() {
                    if let Err(e) = queue.finish() {
                        log::error!("backend teardown: queue finish failed: {}", e);
                    }
                }
            }
        }
    }
}

lazy_static! {
    static ref BACKEND: Backend = Backend::new();
}

/// Returns the process-wide backend, initializing it on first call
/// (spec.md §9 "Initialize lazily on first use").
pub fn backend() -> &'static Backend {
    &BACKEND
}
