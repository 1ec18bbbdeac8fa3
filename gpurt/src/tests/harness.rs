//! Test-only `Context`+`Device` wiring, built directly on `SimDriver`
//! rather than the process-wide `Backend` singleton, so tests stay
//! independent of one another and of process-global state.

use std::sync::{Arc, Mutex};

use gpurt_core::caps::DeviceProps;
use gpurt_core::driver::Driver;
use gpurt_core::sim::{ModuleBlob, SimDriver};

use crate::callback;
use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::device::Device;
use crate::module::Module;
use crate::monitor::{EventMonitor, EventTracker};

pub(super) struct Harness {
    driver: Arc<SimDriver>,
    ctx: Context,
    device: Device,
    monitor: Mutex<Option<EventMonitor>>,
}

/// The default sim device's properties (one compute group of 2, one copy
/// group of 1, immediate lists supported), as a starting point for tests
/// that need to vary one capability.
fn default_props() -> DeviceProps {
    let probe_driver = SimDriver::new();
    let probe = probe_driver.add_default_device();
    probe_driver.device_props(probe).unwrap()
}

impl Harness {
    pub(super) fn new() -> Self {
        Harness::with_device_props(default_props())
    }

    /// A device with no immediate-command-list support, exercising the
    /// regular-queue + `CommandListPool` path instead.
    pub(super) fn without_immediate_lists() -> Self {
        let mut props = default_props();
        props.features.remove(gpurt_core::caps::FeatureFlags::IMMEDIATE_COMMAND_LISTS);
        Harness::with_device_props(props)
    }

    /// A device that exposes only a compute queue group, exercising
    /// `Device`'s Copy-to-Compute fallback.
    pub(super) fn without_copy_group() -> Self {
        let mut props = default_props();
        props.queue_groups.retain(|g| g.kind != gpurt_core::caps::QueueGroupKind::Copy);
        Harness::with_device_props(props)
    }

    /// A device whose timestamp counter only has `bits` valid low-order
    /// bits, narrow enough to force `Event::elapsed_ms`'s wraparound
    /// fallback after a handful of ticks.
    pub(super) fn with_timestamp_bits(bits: u32) -> Self {
        let mut props = default_props();
        props.valid_timestamp_bits = bits;
        Harness::with_device_props(props)
    }

    fn with_device_props(props: DeviceProps) -> Self {
        let sim = Arc::new(SimDriver::new());
        let device_handle = sim.add_device(props);
        let driver: Arc<dyn Driver> = sim.clone();
        let props = Arc::new(driver.device_props(device_handle).unwrap());

        let ctx = Context::create(Arc::clone(&driver), device_handle, Arc::clone(&props)).unwrap();
        let (callbacks, callback_rx) = callback::channel();
        let tracker = EventTracker::new();
        let monitor = EventMonitor::start(tracker.clone(), callback_rx);
        let config = Arc::new(RuntimeConfig::default());
        let device = Device::create(ctx.clone(), device_handle, Arc::clone(&driver), props, config, tracker, callbacks).unwrap();

        Harness { driver: sim, ctx, device, monitor: Mutex::new(Some(monitor)) }
    }

    pub(super) fn driver(&self) -> &Arc<SimDriver> {
        &self.driver
    }

    pub(super) fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub(super) fn device(&self) -> &Device {
        &self.device
    }

    pub(super) fn register_module(&self, blob: ModuleBlob) -> Module {
        let bytes = self.driver.register_blob(blob);
        self.device.register_module(bytes).unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(mut monitor) = self.monitor.lock().unwrap().take() {
            monitor.stop();
        }
    }
}
