//! Backing storage for simulated device allocations.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{ErrorKind, Result};
use crate::handle::DevicePtr;

#[derive(Default)]
pub struct SimMemory {
    regions: Mutex<HashMap<DevicePtr, Vec<u8>>>,
}

impl SimMemory {
    pub fn new() -> Self {
        SimMemory::default()
    }

    pub fn alloc(&self, ptr: DevicePtr, size: usize) {
        self.regions.lock().unwrap().insert(ptr, vec![0u8; size]);
    }

    pub fn free(&self, ptr: DevicePtr) -> Result<()> {
        self.regions
            .lock()
            .unwrap()
            .remove(&ptr)
            .map(|_| ())
            .ok_or_else(|| ErrorKind::InvalidDevicePointer(format!("{:?}", ptr)).into())
    }

    pub fn read(&self, ptr: DevicePtr, offset: usize, out: &mut [u8]) -> Result<()> {
        let regions = self.regions.lock().unwrap();
        let buf = regions
            .get(&ptr)
            .ok_or_else(|| ErrorKind::InvalidDevicePointer(format!("{:?}", ptr)))?;
        let end = offset + out.len();
        if end > buf.len() {
            return Err(ErrorKind::InvalidValue(format!(
                "read out of bounds: {}..{} > {}",
                offset, end, buf.len()
            ))
            .into());
        }
        out.copy_from_slice(&buf[offset..end]);
        Ok(())
    }

    pub fn write(&self, ptr: DevicePtr, offset: usize, data: &[u8]) -> Result<()> {
        let mut regions = self.regions.lock().unwrap();
        let buf = regions
            .get_mut(&ptr)
            .ok_or_else(|| ErrorKind::InvalidDevicePointer(format!("{:?}", ptr)))?;
        let end = offset + data.len();
        if end > buf.len() {
            return Err(ErrorKind::InvalidValue(format!(
                "write out of bounds: {}..{} > {}",
                offset, end, buf.len()
            ))
            .into());
        }
        buf[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&self, ptr: DevicePtr, len: usize, pattern: &[u8]) -> Result<()> {
        let mut regions = self.regions.lock().unwrap();
        let buf = regions
            .get_mut(&ptr)
            .ok_or_else(|| ErrorKind::InvalidDevicePointer(format!("{:?}", ptr)))?;
        if len > buf.len() || pattern.is_empty() {
            return Err(ErrorKind::InvalidValue("fill out of bounds or empty pattern".into()).into());
        }
        for (i, byte) in buf[..len].iter_mut().enumerate() {
            *byte = pattern[i % pattern.len()];
        }
        Ok(())
    }

    pub fn copy(&self, src: DevicePtr, dst: DevicePtr, len: usize) -> Result<()> {
        let tmp = {
            let regions = self.regions.lock().unwrap();
            let sbuf = regions
                .get(&src)
                .ok_or_else(|| ErrorKind::InvalidDevicePointer(format!("{:?}", src)))?;
            if len > sbuf.len() {
                return Err(ErrorKind::InvalidValue("copy src out of bounds".into()).into());
            }
            sbuf[..len].to_vec()
        };
        let mut regions = self.regions.lock().unwrap();
        let dbuf = regions
            .get_mut(&dst)
            .ok_or_else(|| ErrorKind::InvalidDevicePointer(format!("{:?}", dst)))?;
        if len > dbuf.len() {
            return Err(ErrorKind::InvalidValue("copy dst out of bounds".into()).into());
        }
        dbuf[..len].copy_from_slice(&tmp);
        Ok(())
    }
}

/// A read/write view over sim memory handed to kernel bodies; kernels
/// never see raw host pointers, only this indirection, mirroring how a
/// real device kernel only ever sees device addresses.
pub struct SimMemView<'a> {
    mem: &'a SimMemory,
}

impl<'a> SimMemView<'a> {
    pub fn new(mem: &'a SimMemory) -> Self {
        SimMemView { mem }
    }

    pub fn read_into(&self, ptr: DevicePtr, offset: usize, out: &mut [u8]) {
        let _ = self.mem.read(ptr, offset, out);
    }

    pub fn write_from(&self, ptr: DevicePtr, offset: usize, data: &[u8]) {
        let _ = self.mem.write(ptr, offset, data);
    }

    pub fn read_i32(&self, ptr: DevicePtr, index: usize) -> i32 {
        let mut buf = [0u8; 4];
        self.read_into(ptr, index * 4, &mut buf);
        i32::from_le_bytes(buf)
    }

    pub fn write_i32(&self, ptr: DevicePtr, index: usize, value: i32) {
        self.write_from(ptr, index * 4, &value.to_le_bytes());
    }
}
