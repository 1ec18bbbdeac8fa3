//! `ExecItem`: a one-shot kernel-launch descriptor (spec.md §3, §4.4
//! "Launch").
//!
//! Argument values are packed into one byte buffer, exactly the way a
//! real HIP/CUDA launch packs its argument list — a pointer argument's
//! bytes are nothing more than the raw bits of the device address.
//! `DevicePtr` isn't a real address, so `Queue::launch` decodes a
//! pointer-typed slot's bytes back into a handle by treating them as a
//! little-endian `u64` id (`0` standing in for `nullptr`).

use gpurt_core::handle::DevicePtr;
use gpurt_core::types::Dim3;

use crate::error::{Error, Result};
use crate::module::Kernel;
use crate::queue::Queue;

#[derive(Debug, Clone, Copy)]
pub(crate) struct ArgSlot {
    pub offset: usize,
    pub size: usize,
}

/// Per-launch descriptor built via `configure_call` + `set_arg`, consumed
/// by `Queue::launch`.
pub struct ExecItem {
    pub(crate) queue: Queue,
    pub(crate) kernel: Kernel,
    pub(crate) grid: Dim3,
    pub(crate) block: Dim3,
    pub(crate) shared_mem_bytes: u32,
    pub(crate) arg_buffer: Vec<u8>,
    pub(crate) arg_slots: Vec<ArgSlot>,
}

impl ExecItem {
    pub fn new(queue: Queue, kernel: Kernel, grid: Dim3, block: Dim3, shared_mem_bytes: u32) -> Self {
        ExecItem { queue, kernel, grid, block, shared_mem_bytes, arg_buffer: Vec::new(), arg_slots: Vec::new() }
    }

    /// Packs `size` bytes at `offset`, growing the backing buffer to
    /// exactly `offset + size` if needed (spec.md §9: no `+1024` slack).
    pub fn set_arg(&mut self, index: usize, offset: usize, data: &[u8]) -> Result<()> {
        let size = data.len();
        let end = offset + size;
        if end > self.arg_buffer.len() {
            self.arg_buffer.resize(end, 0);
        }
        self.arg_buffer[offset..end].copy_from_slice(data);
        if index >= self.arg_slots.len() {
            self.arg_slots.resize(index + 1, ArgSlot { offset: 0, size: 0 });
        }
        self.arg_slots[index] = ArgSlot { offset, size };
        Ok(())
    }

    /// Convenience over `set_arg` for a pointer-typed parameter.
    pub fn set_arg_ptr(&mut self, index: usize, offset: usize, ptr: Option<DevicePtr>) -> Result<()> {
        let raw = ptr.map(|p| p.raw()).unwrap_or(0);
        self.set_arg(index, offset, &raw.to_le_bytes())
    }

    pub fn arg_count(&self) -> usize {
        self.arg_slots.len()
    }

    pub(crate) fn arg_bytes(&self, index: usize) -> Result<&[u8]> {
        let slot = self
            .arg_slots
            .get(index)
            .ok_or_else(|| Error::from(gpurt_core::error::ErrorKind::InvalidValue(format!("no argument at index {}", index))))?;
        let end = slot.offset + slot.size;
        self.arg_buffer.get(slot.offset..end).ok_or_else(|| {
            Error::from(gpurt_core::error::ErrorKind::InvalidValue(format!(
                "argument {} buffer range {}..{} exceeds packed size {}",
                index, slot.offset, end, self.arg_buffer.len()
            )))
        })
    }
}
