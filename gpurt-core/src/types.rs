//! Small data types shared between `Driver` implementations and their
//! callers. Kept free of any logic; these are wire-shaped records, the
//! equivalent of `ocl_core::types::structs`.

use crate::handle::DevicePtr;

/// Three-dimensional launch dimensions (grid or block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Dim3 { x, y, z }
    }

    pub fn one() -> Self {
        Dim3 { x: 1, y: 1, z: 1 }
    }

    pub fn volume(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

/// Per-parameter metadata derived from a module's SPIR-V (spec.md §3
/// Kernel: "function-info record (arg types, sizes, pointer-ness)").
/// Parsing SPIR-V itself is out of scope; `Driver::load_module` returns
/// these already-populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgInfo {
    pub index: u32,
    pub size: usize,
    pub is_pointer: bool,
    pub is_image: bool,
    pub is_sampler: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub args: Vec<ArgInfo>,
    pub max_workgroup_size: u32,
    pub private_mem_size: u32,
    pub static_local_mem_size: u32,
}

/// A device-resident global variable discovered alongside a module's
/// kernels (spec.md §3 DeviceVar / §4.3 shadow-kernel convention).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceVarInfo {
    pub name: String,
    pub size: usize,
    pub alignment: usize,
    pub has_initializer: bool,
}

/// The result of loading a module's SPIR-V: everything the core needs
/// without having parsed the binary itself.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub kernels: Vec<FunctionInfo>,
    pub device_vars: Vec<DeviceVarInfo>,
}

/// Memory space passed to `Driver::alloc`, mirroring the Level-Zero-style
/// `Shared`/`Device`/`Host` distinction spec.md §4.3 step 5 relies on for
/// device-variable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemSpace {
    Device,
    Host,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListKind {
    Regular,
    Immediate,
}

/// The execution status of an event, spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Init,
    Recording,
    Recorded,
    Finished,
}

/// Timestamps captured on completion (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventTimestamps {
    pub device_ticks: u64,
    pub host_nanos: u64,
}

/// One packed kernel argument as bound at dispatch time. A pointer
/// argument carries a byte offset alongside the allocation handle since
/// `DevicePtr` (unlike a real device address) cannot itself be offset —
/// this is what lets a single scratch allocation stand in for the
/// pointer arithmetic spec.md §4.3's device-variable protocol relies on.
#[derive(Debug, Clone)]
pub enum KernelArgValue {
    Bytes(Vec<u8>),
    Pointer { ptr: Option<DevicePtr>, offset: usize },
}

/// A single append into a command list, spec.md §4.4 step 4.
#[derive(Debug, Clone)]
pub enum CommandOp {
    Copy { src: DevicePtr, dst: DevicePtr, len: usize },
    Fill { dst: DevicePtr, len: usize, pattern: Vec<u8> },
    Copy2D {
        src: DevicePtr,
        dst: DevicePtr,
        src_pitch: usize,
        dst_pitch: usize,
        width: usize,
        height: usize,
    },
    Copy3D {
        src: DevicePtr,
        dst: DevicePtr,
        src_pitch: usize,
        dst_pitch: usize,
        src_slice_pitch: usize,
        dst_slice_pitch: usize,
        width: usize,
        height: usize,
        depth: usize,
    },
    CopyToTexture { src: DevicePtr, dst: crate::handle::ImageHandle, len: usize },
    Prefetch { ptr: DevicePtr, len: usize },
    Dispatch {
        kernel: crate::handle::KernelHandle,
        grid: Dim3,
        block: Dim3,
        shared_mem_bytes: u32,
        args: Vec<KernelArgValue>,
    },
}
