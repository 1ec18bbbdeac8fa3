//! Host-executable kernel bodies, keyed by a module id embedded in the
//! "SPIR-V blob" `Driver::load_module` receives.
//!
//! Compiling and interpreting real SPIR-V is out of scope (spec.md §1).
//! `SimDriver` instead accepts a `ModuleBlob` assembled by the caller (in
//! practice, a test or example standing in for the compiler toolchain)
//! describing each kernel's metadata and, for kernels that must actually
//! execute against host-visible sim memory, a closure playing the role of
//! the compiled device code.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{Dim3, DeviceVarInfo, FunctionInfo, KernelArgValue};

use super::mem::SimMemView;

pub type KernelBody = Arc<dyn Fn(&SimMemView, Dim3, Dim3, u32, &[KernelArgValue]) + Send + Sync>;

#[derive(Clone)]
pub struct KernelDecl {
    pub info: FunctionInfo,
    pub body: Option<KernelBody>,
}

/// A module as produced by the (external, simulated) compiler toolchain:
/// kernel declarations plus device-variable declarations. This is the sim
/// stand-in for a SPIR-V binary.
#[derive(Clone, Default)]
pub struct ModuleBlob {
    pub kernels: Vec<KernelDecl>,
    pub device_vars: Vec<DeviceVarInfo>,
    pub initializers: HashMap<String, Vec<u8>>,
}

impl ModuleBlob {
    pub fn new() -> Self {
        ModuleBlob::default()
    }

    pub fn with_kernel(mut self, info: FunctionInfo, body: Option<KernelBody>) -> Self {
        self.kernels.push(KernelDecl { info, body });
        self
    }

    pub fn with_device_var(mut self, var: DeviceVarInfo, initializer: Option<Vec<u8>>) -> Self {
        if let Some(init) = initializer {
            self.initializers.insert(var.name.clone(), init);
        }
        self.device_vars.push(var);
        self
    }
}

static NEXT_BLOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide table of registered blobs. `register` returns the 8-byte
/// little-endian id that serves as the "SPIR-V bytes" passed across the
/// `Driver::load_module` boundary.
#[derive(Default)]
pub struct BlobRegistry {
    blobs: Mutex<HashMap<u64, ModuleBlob>>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        BlobRegistry::default()
    }

    pub fn register(&self, blob: ModuleBlob) -> Vec<u8> {
        let id = NEXT_BLOB_ID.fetch_add(1, Ordering::Relaxed);
        self.blobs.lock().unwrap().insert(id, blob);
        id.to_le_bytes().to_vec()
    }

    pub fn resolve(&self, bytes: &[u8]) -> Option<ModuleBlob> {
        if bytes.len() != 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        let id = u64::from_le_bytes(buf);
        self.blobs.lock().unwrap().get(&id).cloned()
    }
}
