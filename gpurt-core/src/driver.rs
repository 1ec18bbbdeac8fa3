//! The native-driver capability object.
//!
//! spec.md §9 Design Notes: "Express backend-specific behavior as a set of
//! tagged variants or as a capability object passed to the core; the core
//! must not know backend identity." `Driver` is that capability object.
//! `gpurt` is generic over `D: Driver` everywhere it would otherwise need
//! to call into the native Level-Zero-style API directly; the real driver
//! and the SPIR-V toolchain that feeds it are both external per spec.md
//! §1 and are not implemented here. `sim::SimDriver` is the one concrete
//! implementation carried in this repository, standing in for both so the
//! runtime is exercisable and testable.

use crate::caps::DeviceProps;
use crate::error::{ErrorKind, Result};
use crate::handle::{
    CommandListHandle, CommandQueueHandle, ContextHandle, DeviceHandle, DevicePtr, EventHandle,
    EventPoolHandle, FenceHandle, ImmediateCommandListHandle, KernelHandle, ModuleHandle,
};
use crate::types::{CommandOp, EventStatus, EventTimestamps, MemSpace, ModuleInfo};

/// Everything the core needs from the native driver. One device's worth
/// of identity is threaded through as `DeviceHandle` rather than modeled
/// as separate trait objects per device, matching how a real Level-Zero
/// driver hands out device handles from a single loader instance.
pub trait Driver: Send + Sync {
    // -- enumeration / device properties -----------------------------------

    fn enumerate_devices(&self) -> Vec<DeviceHandle>;
    fn device_props(&self, device: DeviceHandle) -> Result<DeviceProps>;

    // -- context -------------------------------------------------------------

    fn create_context(&self, device: DeviceHandle) -> Result<ContextHandle>;
    fn destroy_context(&self, ctx: ContextHandle) -> Result<()>;

    // -- command lists ---------------------------------------------------

    fn create_command_list(&self, ctx: ContextHandle) -> Result<CommandListHandle>;
    fn reset_command_list(&self, list: CommandListHandle) -> Result<()>;
    fn destroy_command_list(&self, list: CommandListHandle) -> Result<()>;

    fn create_immediate_command_list(
        &self,
        ctx: ContextHandle,
        device: DeviceHandle,
    ) -> Result<ImmediateCommandListHandle>;

    /// Appends a barrier waiting on `waits` before anything appended after
    /// it in program order, and (if `signal` is given) signals it once
    /// the barrier itself is reached. spec.md §4.4 step 4.
    fn append_barrier(
        &self,
        list: CommandListHandle,
        waits: &[EventHandle],
        signal: Option<EventHandle>,
    ) -> Result<()>;

    fn append_op(
        &self,
        list: CommandListHandle,
        op: CommandOp,
        signal: Option<EventHandle>,
    ) -> Result<()>;

    /// Executes `op` immediately against an immediate command list,
    /// returning once appended (immediate lists make submission and
    /// append the same action per spec.md glossary).
    fn append_op_immediate(
        &self,
        list: ImmediateCommandListHandle,
        op: CommandOp,
        waits: &[EventHandle],
        signal: Option<EventHandle>,
    ) -> Result<()>;

    fn append_barrier_immediate(
        &self,
        list: ImmediateCommandListHandle,
        waits: &[EventHandle],
        signal: Option<EventHandle>,
    ) -> Result<()>;

    // -- regular-queue submission (used when immediate lists aren't available) --

    fn create_command_queue(&self, ctx: ContextHandle, device: DeviceHandle) -> Result<CommandQueueHandle>;
    fn submit_command_list(
        &self,
        queue: CommandQueueHandle,
        list: CommandListHandle,
    ) -> Result<FenceHandle>;
    fn wait_fence(&self, fence: FenceHandle) -> Result<()>;

    // -- events ------------------------------------------------------------

    fn create_event_pool(&self, ctx: ContextHandle, capacity: u32) -> Result<EventPoolHandle>;
    fn destroy_event_pool(&self, pool: EventPoolHandle) -> Result<()>;
    fn create_event(&self, pool: EventPoolHandle, slot: u32) -> Result<EventHandle>;
    fn reset_event(&self, event: EventHandle) -> Result<()>;
    fn destroy_event(&self, event: EventHandle) -> Result<()>;
    fn query_event_status(&self, event: EventHandle) -> Result<EventStatus>;
    /// Blocks the calling thread until `event` is `Finished`.
    fn wait_event(&self, event: EventHandle) -> Result<()>;
    /// Forces `event` into `Finished`, as if a host-side signaler fired
    /// (spec.md §4.1 `hostSignal`).
    fn host_signal_event(&self, event: EventHandle) -> Result<()>;
    fn event_timestamps(&self, event: EventHandle) -> Result<EventTimestamps>;
    /// `Some(kind)` if the operation `event` was attached to finished with
    /// an error (spec.md §7: a fatal op still signals its event so the
    /// queue doesn't deadlock, but the error must still surface somewhere).
    /// `None` once the event is `Finished` cleanly, and also while it is
    /// not yet `Finished` at all.
    fn event_error(&self, event: EventHandle) -> Result<Option<ErrorKind>>;

    // -- modules / kernels ---------------------------------------------------

    /// Compiles `spirv` for `device`. Called at most once per (module,
    /// device) pair; callers are responsible for the one-shot gate
    /// (spec.md §4.3 `compileOnce`). `jit_flags` is opaque to this trait —
    /// forwarded verbatim from `RuntimeConfig::jit_flags` for the driver's
    /// own toolchain to interpret.
    fn load_module(&self, ctx: ContextHandle, device: DeviceHandle, spirv: &[u8], jit_flags: Option<&str>) -> Result<(ModuleHandle, ModuleInfo)>;
    fn destroy_module(&self, module: ModuleHandle) -> Result<()>;
    fn create_kernel(&self, module: ModuleHandle, name: &str) -> Result<KernelHandle>;

    // -- memory --------------------------------------------------------------

    fn alloc(&self, ctx: ContextHandle, device: DeviceHandle, size: usize, align: usize, space: MemSpace) -> Result<DevicePtr>;
    fn free(&self, ptr: DevicePtr) -> Result<()>;
    /// Copies host bytes into a device allocation (used for scratch
    /// readback in the device-variable protocol, spec.md §4.3 step 4).
    fn read(&self, ptr: DevicePtr, offset: usize, out: &mut [u8]) -> Result<()>;
    fn write(&self, ptr: DevicePtr, offset: usize, data: &[u8]) -> Result<()>;
}
