//! `SimDriver`: an in-process software implementation of [`Driver`].
//!
//! Stands in for both the native Level-Zero-style driver and the SPIR-V
//! compilation toolchain, both out of scope per spec.md §1. Command lists
//! execute synchronously on whichever thread submits (or appends to, for
//! immediate lists) them; this keeps the simulation single-threaded-simple
//! while still exercising every ordering constraint the real `Queue`
//! submission engine depends on (wait sets are honored, `LastEvent`
//! chaining still matters, finish() still has to wait on the right
//! things) because `gpurt` never assumes synchronous completion.

mod mem;
mod registry;

pub use mem::{SimMemView, SimMemory};
pub use registry::{BlobRegistry, KernelBody, KernelDecl, ModuleBlob};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use crate::caps::{DeviceProps, FeatureFlags, QueueGroupKind, QueueGroupProps};
use crate::driver::Driver;
use crate::error::{ErrorKind, Result};
use crate::handle::{
    CommandListHandle, CommandQueueHandle, ContextHandle, DeviceHandle, DevicePtr, EventHandle,
    EventPoolHandle, FenceHandle, ImmediateCommandListHandle, KernelHandle, ModuleHandle,
};
use crate::types::{CommandOp, Dim3, EventStatus, EventTimestamps, MemSpace, ModuleInfo};

#[derive(Clone)]
enum ListEntry {
    Barrier { waits: Vec<EventHandle>, signal: Option<EventHandle> },
    Op { op: CommandOp, signal: Option<EventHandle> },
}

struct EventRecord {
    status: EventStatus,
    error: Option<ErrorKind>,
    timestamps: Option<EventTimestamps>,
}

struct EventPoolRecord {
    capacity: u32,
    ctx: ContextHandle,
}

struct ModuleRecord {
    info: ModuleInfo,
    blob: ModuleBlob,
}

struct KernelRecord {
    module: ModuleHandle,
    name: String,
}

#[derive(Default)]
struct SimState {
    devices: HashMap<DeviceHandle, DeviceProps>,
    contexts: HashMap<ContextHandle, DeviceHandle>,
    command_lists: HashMap<CommandListHandle, Vec<ListEntry>>,
    event_pools: HashMap<EventPoolHandle, EventPoolRecord>,
    events: HashMap<EventHandle, EventRecord>,
    modules: HashMap<ModuleHandle, ModuleRecord>,
    kernels: HashMap<KernelHandle, KernelRecord>,
}

/// The simulated native driver. One instance typically backs an entire
/// `Backend` for the life of the process.
pub struct SimDriver {
    state: Mutex<SimState>,
    event_cv: Condvar,
    mem: SimMemory,
    blobs: BlobRegistry,
    clock: Instant,
    clock_ticks: AtomicU64,
}

impl Default for SimDriver {
    fn default() -> Self {
        SimDriver::new()
    }
}

impl SimDriver {
    pub fn new() -> Self {
        SimDriver {
            state: Mutex::new(SimState::default()),
            event_cv: Condvar::new(),
            mem: SimMemory::new(),
            blobs: BlobRegistry::new(),
            clock: Instant::now(),
            clock_ticks: AtomicU64::new(0),
        }
    }

    /// Registers a device with the given properties and returns its
    /// handle. Call before `Backend::initialize` in tests/examples.
    pub fn add_device(&self, props: DeviceProps) -> DeviceHandle {
        let handle = DeviceHandle::new();
        self.state.lock().unwrap().devices.insert(handle, props);
        handle
    }

    /// A reasonable default single-GPU device: one compute queue group of
    /// 2 physical queues, one copy group of 1, immediate lists supported.
    pub fn add_default_device(&self) -> DeviceHandle {
        self.add_device(DeviceProps {
            name: "sim0".into(),
            timestamp_frequency: 1_000_000_000,
            valid_timestamp_bits: 60,
            queue_groups: vec![
                QueueGroupProps { kind: QueueGroupKind::Compute, count: 2 },
                QueueGroupProps { kind: QueueGroupKind::Copy, count: 1 },
            ],
            features: FeatureFlags::IMMEDIATE_COMMAND_LISTS | FeatureFlags::ON_DEMAND_PAGING,
            global_memory_bytes: 1 << 30,
        })
    }

    /// Registers a compiler-toolchain-produced module blob and returns the
    /// opaque bytes `Backend::register_module` would hand to
    /// `Driver::load_module`.
    pub fn register_blob(&self, blob: ModuleBlob) -> Vec<u8> {
        self.blobs.register(blob)
    }

    fn now(&self) -> EventTimestamps {
        let host_nanos = self.clock.elapsed().as_nanos() as u64;
        let device_ticks = self.clock_ticks.fetch_add(1, Ordering::Relaxed);
        EventTimestamps { device_ticks, host_nanos }
    }

    fn set_finished(&self, event: EventHandle, error: Option<ErrorKind>) {
        let ts = self.now();
        let mut state = self.state.lock().unwrap();
        if let Some(rec) = state.events.get_mut(&event) {
            rec.status = EventStatus::Finished;
            rec.error = error;
            rec.timestamps = Some(ts);
        }
        drop(state);
        self.event_cv.notify_all();
    }

    fn wait_for(&self, event: EventHandle) {
        let mut state = self.state.lock().unwrap();
        loop {
            match state.events.get(&event) {
                Some(rec) if rec.status == EventStatus::Finished => return,
                Some(_) => {
                    state = self.event_cv.wait(state).unwrap();
                }
                None => return,
            }
        }
    }

    fn execute_op(&self, state: &SimState, op: &CommandOp) -> Result<()> {
        match op {
            CommandOp::Copy { src, dst, len } => self.mem.copy(*src, *dst, *len),
            CommandOp::Fill { dst, len, pattern } => self.mem.fill(*dst, *len, pattern),
            CommandOp::Copy2D { src, dst, src_pitch, dst_pitch, width, height } => {
                for row in 0..*height {
                    let tmp_off = row * src_pitch;
                    let dst_off = row * dst_pitch;
                    let mut buf = vec![0u8; *width];
                    self.mem.read(*src, tmp_off, &mut buf)?;
                    self.mem.write(*dst, dst_off, &buf)?;
                }
                Ok(())
            }
            CommandOp::Copy3D {
                src, dst, src_pitch, dst_pitch, src_slice_pitch, dst_slice_pitch, width, height, depth,
            } => {
                for z in 0..*depth {
                    for row in 0..*height {
                        let src_off = z * src_slice_pitch + row * src_pitch;
                        let dst_off = z * dst_slice_pitch + row * dst_pitch;
                        let mut buf = vec![0u8; *width];
                        self.mem.read(*src, src_off, &mut buf)?;
                        self.mem.write(*dst, dst_off, &buf)?;
                    }
                }
                Ok(())
            }
            CommandOp::CopyToTexture { src, len, .. } => {
                // Texture descriptors are out of scope; treat the
                // destination as an opaque sink and only validate the
                // source region is readable.
                let mut buf = vec![0u8; *len];
                self.mem.read(*src, 0, &mut buf)
            }
            CommandOp::Prefetch { ptr, len } => {
                let mut buf = vec![0u8; (*len).min(1)];
                self.mem.read(*ptr, 0, &mut buf).map(|_| ())
            }
            CommandOp::Dispatch { kernel, grid, block, shared_mem_bytes, args } => {
                self.execute_dispatch(state, *kernel, *grid, *block, *shared_mem_bytes, args)
            }
        }
    }

    fn execute_dispatch(
        &self,
        state: &SimState,
        kernel: KernelHandle,
        grid: Dim3,
        block: Dim3,
        shared_mem_bytes: u32,
        args: &[crate::types::KernelArgValue],
    ) -> Result<()> {
        use crate::types::KernelArgValue;

        let krec = state
            .kernels
            .get(&kernel)
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", kernel)))?;
        let mrec = state
            .modules
            .get(&krec.module)
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", krec.module)))?;
        let decl = mrec
            .blob
            .kernels
            .iter()
            .find(|k| k.info.name == krec.name)
            .ok_or_else(|| ErrorKind::InvalidSymbol(krec.name.clone()))?;

        for (arg, info) in args.iter().zip(decl.info.args.iter()) {
            if info.is_pointer {
                if let KernelArgValue::Pointer { ptr: None, .. } = arg {
                    return Err(ErrorKind::LaunchFailure(format!(
                        "kernel '{}': null pointer passed for argument {}",
                        krec.name, info.index
                    ))
                    .into());
                }
            }
        }

        if let Some(body) = &decl.body {
            let view = SimMemView::new(&self.mem);
            body(&view, grid, block, shared_mem_bytes, args);
        }
        Ok(())
    }

    fn execute_entry(&self, entry: &ListEntry) {
        match entry {
            ListEntry::Barrier { waits, signal } => {
                for w in waits {
                    self.wait_for(*w);
                }
                if let Some(sig) = signal {
                    self.set_finished(*sig, None);
                }
            }
            ListEntry::Op { op, signal } => {
                let result = {
                    let state = self.state.lock().unwrap();
                    self.execute_op(&state, op)
                };
                if let Some(sig) = signal {
                    self.set_finished(*sig, result.err().map(|e| e.kind().clone()));
                }
            }
        }
    }
}

impl Driver for SimDriver {
    fn enumerate_devices(&self) -> Vec<DeviceHandle> {
        self.state.lock().unwrap().devices.keys().copied().collect()
    }

    fn device_props(&self, device: DeviceHandle) -> Result<DeviceProps> {
        self.state
            .lock()
            .unwrap()
            .devices
            .get(&device)
            .cloned()
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", device)).into())
    }

    fn create_context(&self, device: DeviceHandle) -> Result<ContextHandle> {
        let mut state = self.state.lock().unwrap();
        if !state.devices.contains_key(&device) {
            return Err(ErrorKind::InvalidHandle(format!("{:?}", device)).into());
        }
        let handle = ContextHandle::new();
        state.contexts.insert(handle, device);
        Ok(handle)
    }

    fn destroy_context(&self, ctx: ContextHandle) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .contexts
            .remove(&ctx)
            .map(|_| ())
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", ctx)).into())
    }

    fn create_command_list(&self, ctx: ContextHandle) -> Result<CommandListHandle> {
        let mut state = self.state.lock().unwrap();
        if !state.contexts.contains_key(&ctx) {
            return Err(ErrorKind::InvalidHandle(format!("{:?}", ctx)).into());
        }
        let handle = CommandListHandle::new();
        state.command_lists.insert(handle, Vec::new());
        Ok(handle)
    }

    fn reset_command_list(&self, list: CommandListHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entries = state
            .command_lists
            .get_mut(&list)
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", list)))?;
        entries.clear();
        Ok(())
    }

    fn destroy_command_list(&self, list: CommandListHandle) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .command_lists
            .remove(&list)
            .map(|_| ())
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", list)).into())
    }

    fn create_immediate_command_list(
        &self,
        ctx: ContextHandle,
        _device: DeviceHandle,
    ) -> Result<ImmediateCommandListHandle> {
        if !self.state.lock().unwrap().contexts.contains_key(&ctx) {
            return Err(ErrorKind::InvalidHandle(format!("{:?}", ctx)).into());
        }
        Ok(ImmediateCommandListHandle::new())
    }

    fn append_barrier(
        &self,
        list: CommandListHandle,
        waits: &[EventHandle],
        signal: Option<EventHandle>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entries = state
            .command_lists
            .get_mut(&list)
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", list)))?;
        entries.push(ListEntry::Barrier { waits: waits.to_vec(), signal });
        Ok(())
    }

    fn append_op(
        &self,
        list: CommandListHandle,
        op: CommandOp,
        signal: Option<EventHandle>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entries = state
            .command_lists
            .get_mut(&list)
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", list)))?;
        entries.push(ListEntry::Op { op, signal });
        Ok(())
    }

    fn append_op_immediate(
        &self,
        _list: ImmediateCommandListHandle,
        op: CommandOp,
        waits: &[EventHandle],
        signal: Option<EventHandle>,
    ) -> Result<()> {
        for w in waits {
            self.wait_for(*w);
        }
        let result = {
            let state = self.state.lock().unwrap();
            self.execute_op(&state, &op)
        };
        if let Some(sig) = signal {
            self.set_finished(sig, result.err().map(|e| e.kind().clone()));
        }
        Ok(())
    }

    fn append_barrier_immediate(
        &self,
        _list: ImmediateCommandListHandle,
        waits: &[EventHandle],
        signal: Option<EventHandle>,
    ) -> Result<()> {
        for w in waits {
            self.wait_for(*w);
        }
        if let Some(sig) = signal {
            self.set_finished(sig, None);
        }
        Ok(())
    }

    fn create_command_queue(&self, ctx: ContextHandle, _device: DeviceHandle) -> Result<CommandQueueHandle> {
        if !self.state.lock().unwrap().contexts.contains_key(&ctx) {
            return Err(ErrorKind::InvalidHandle(format!("{:?}", ctx)).into());
        }
        Ok(CommandQueueHandle::new())
    }

    fn submit_command_list(&self, _queue: CommandQueueHandle, list: CommandListHandle) -> Result<FenceHandle> {
        let entries = {
            let state = self.state.lock().unwrap();
            state
                .command_lists
                .get(&list)
                .cloned()
                .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", list)))?
        };
        for entry in &entries {
            self.execute_entry(entry);
        }
        Ok(FenceHandle::new())
    }

    fn wait_fence(&self, _fence: FenceHandle) -> Result<()> {
        // Lists are executed synchronously by `submit_command_list`, so
        // by the time a fence handle exists there is nothing left to wait
        // for.
        Ok(())
    }

    fn create_event_pool(&self, ctx: ContextHandle, capacity: u32) -> Result<EventPoolHandle> {
        if !self.state.lock().unwrap().contexts.contains_key(&ctx) {
            return Err(ErrorKind::InvalidHandle(format!("{:?}", ctx)).into());
        }
        let handle = EventPoolHandle::new();
        self.state
            .lock()
            .unwrap()
            .event_pools
            .insert(handle, EventPoolRecord { capacity, ctx });
        Ok(handle)
    }

    fn destroy_event_pool(&self, pool: EventPoolHandle) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .event_pools
            .remove(&pool)
            .map(|_| ())
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", pool)).into())
    }

    fn create_event(&self, pool: EventPoolHandle, slot: u32) -> Result<EventHandle> {
        let mut state = self.state.lock().unwrap();
        let rec = state
            .event_pools
            .get(&pool)
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", pool)))?;
        if slot >= rec.capacity {
            return Err(ErrorKind::InvalidValue(format!("slot {} >= capacity {}", slot, rec.capacity)).into());
        }
        let handle = EventHandle::new();
        state.events.insert(handle, EventRecord { status: EventStatus::Init, error: None, timestamps: None });
        Ok(handle)
    }

    fn reset_event(&self, event: EventHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let rec = state
            .events
            .get_mut(&event)
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", event)))?;
        rec.status = EventStatus::Init;
        rec.error = None;
        rec.timestamps = None;
        Ok(())
    }

    fn destroy_event(&self, event: EventHandle) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .events
            .remove(&event)
            .map(|_| ())
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", event)).into())
    }

    fn query_event_status(&self, event: EventHandle) -> Result<EventStatus> {
        self.state
            .lock()
            .unwrap()
            .events
            .get(&event)
            .map(|r| r.status)
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", event)).into())
    }

    fn wait_event(&self, event: EventHandle) -> Result<()> {
        if !self.state.lock().unwrap().events.contains_key(&event) {
            return Err(ErrorKind::InvalidHandle(format!("{:?}", event)).into());
        }
        self.wait_for(event);
        Ok(())
    }

    fn host_signal_event(&self, event: EventHandle) -> Result<()> {
        if !self.state.lock().unwrap().events.contains_key(&event) {
            return Err(ErrorKind::InvalidHandle(format!("{:?}", event)).into());
        }
        self.set_finished(event, None);
        Ok(())
    }

    fn event_timestamps(&self, event: EventHandle) -> Result<EventTimestamps> {
        self.state
            .lock()
            .unwrap()
            .events
            .get(&event)
            .and_then(|r| r.timestamps)
            .ok_or_else(|| ErrorKind::NotReady.into())
    }

    fn event_error(&self, event: EventHandle) -> Result<Option<ErrorKind>> {
        self.state
            .lock()
            .unwrap()
            .events
            .get(&event)
            .map(|r| r.error.clone())
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", event)).into())
    }

    fn load_module(
        &self,
        ctx: ContextHandle,
        _device: DeviceHandle,
        spirv: &[u8],
        jit_flags: Option<&str>,
    ) -> Result<(ModuleHandle, ModuleInfo)> {
        if !self.state.lock().unwrap().contexts.contains_key(&ctx) {
            return Err(ErrorKind::InvalidHandle(format!("{:?}", ctx)).into());
        }
        if let Some(flags) = jit_flags {
            log::debug!("load_module: jit flags {:?}", flags);
        }
        let blob = self
            .blobs
            .resolve(spirv)
            .ok_or_else(|| ErrorKind::InvalidValue("unrecognized module blob".into()))?;
        let info = ModuleInfo {
            kernels: blob.kernels.iter().map(|k| k.info.clone()).collect(),
            device_vars: blob.device_vars.clone(),
        };
        let handle = ModuleHandle::new();
        self.state.lock().unwrap().modules.insert(handle, ModuleRecord { info: info.clone(), blob });
        Ok((handle, info))
    }

    fn destroy_module(&self, module: ModuleHandle) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .modules
            .remove(&module)
            .map(|_| ())
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", module)).into())
    }

    fn create_kernel(&self, module: ModuleHandle, name: &str) -> Result<KernelHandle> {
        let mut state = self.state.lock().unwrap();
        let mrec = state
            .modules
            .get(&module)
            .ok_or_else(|| ErrorKind::InvalidHandle(format!("{:?}", module)))?;
        if !mrec.info.kernels.iter().any(|k| k.name == name) {
            return Err(ErrorKind::InvalidSymbol(name.to_string()).into());
        }
        let handle = KernelHandle::new();
        state.kernels.insert(handle, KernelRecord { module, name: name.to_string() });
        Ok(handle)
    }

    fn alloc(&self, ctx: ContextHandle, _device: DeviceHandle, size: usize, _align: usize, _space: MemSpace) -> Result<DevicePtr> {
        if !self.state.lock().unwrap().contexts.contains_key(&ctx) {
            return Err(ErrorKind::InvalidHandle(format!("{:?}", ctx)).into());
        }
        let ptr = DevicePtr::new();
        self.mem.alloc(ptr, size);
        Ok(ptr)
    }

    fn free(&self, ptr: DevicePtr) -> Result<()> {
        self.mem.free(ptr)
    }

    fn read(&self, ptr: DevicePtr, offset: usize, out: &mut [u8]) -> Result<()> {
        self.mem.read(ptr, offset, out)
    }

    fn write(&self, ptr: DevicePtr, offset: usize, data: &[u8]) -> Result<()> {
        self.mem.write(ptr, offset, data)
    }
}
