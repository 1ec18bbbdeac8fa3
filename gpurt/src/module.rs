//! Module, Kernel, DeviceVar, and the device-variable shadow-kernel
//! binding protocol (spec.md §3, §4.3).
//!
//! Native compilation happens at most once per module, guarded by a
//! one-shot gate (`compile_once`) rather than eagerly at registration —
//! `registerModuleStr` only has to store the SPIR-V bytes (spec.md §6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use gpurt_core::driver::Driver;
use gpurt_core::handle::{DeviceHandle, DevicePtr, KernelHandle, ModuleHandle};
use gpurt_core::types::{FunctionInfo, KernelArgValue, MemSpace, ModuleInfo};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::queue::Queue;

const INFO_KERNEL_PREFIX: &str = "__gpurt_info_";
const BIND_KERNEL_PREFIX: &str = "__gpurt_bind_";
const INIT_KERNEL_PREFIX: &str = "__gpurt_init_";

/// Packed on-device layout the Info shadow kernel writes into its slot of
/// the scratch buffer: `{size, alignment, has_initializer}` as three
/// little-endian `u32`s (spec.md §4.3 shadow-kernel convention).
const VAR_INFO_RECORD_SIZE: usize = 12;

struct KernelInner {
    handle: KernelHandle,
    info: FunctionInfo,
}

/// Bound to exactly one Module and Device (spec.md §3 Kernel).
#[derive(Clone)]
pub struct Kernel(Arc<KernelInner>);

impl Kernel {
    pub fn handle(&self) -> KernelHandle {
        self.0.handle
    }

    pub fn info(&self) -> &FunctionInfo {
        &self.0.info
    }

    pub fn max_workgroup_size(&self) -> u32 {
        self.0.info.max_workgroup_size
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Kernel").field("name", &self.0.info.name).field("handle", &self.0.handle).finish()
    }
}

struct DeviceVarState {
    name: String,
    size: usize,
    alignment: usize,
    has_initializer: bool,
    dev_ptr: Mutex<Option<DevicePtr>>,
}

/// Name, size, alignment, optional initializer flag, and a mutable device
/// pointer assigned after binding (spec.md §3 DeviceVar). `dev_addr()` is
/// `None` iff storage is unallocated.
#[derive(Clone)]
pub struct DeviceVar(Arc<DeviceVarState>);

impl DeviceVar {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn size(&self) -> usize {
        self.0.size
    }

    pub fn alignment(&self) -> usize {
        self.0.alignment
    }

    pub fn has_initializer(&self) -> bool {
        self.0.has_initializer
    }

    pub fn dev_addr(&self) -> Option<DevicePtr> {
        *self.0.dev_ptr.lock().unwrap()
    }
}

impl std::fmt::Debug for DeviceVar {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("DeviceVar").field("name", &self.0.name).field("dev_addr", &self.dev_addr()).finish()
    }
}

enum CompileState {
    Uncompiled,
    Compiled { handle: ModuleHandle, info: ModuleInfo },
}

struct ModuleInner {
    id: u64,
    ctx: Context,
    device: DeviceHandle,
    driver: Arc<dyn Driver>,
    spirv: Vec<u8>,
    /// `RuntimeConfig::jit_flags` (spec.md §6 "Persisted state"), forwarded
    /// verbatim to `Driver::load_module` at compile time.
    jit_flags: Option<String>,
    compile: Mutex<CompileState>,
    kernels: Mutex<HashMap<String, Kernel>>,
    device_vars: Mutex<HashMap<String, DeviceVar>>,
    variables_allocated: AtomicBool,
    variables_initialized: AtomicBool,
    /// Serializes the whole device-variable lifecycle protocol (spec.md
    /// §4.3 "holding the module lock"). A single gate rather than the
    /// full §5 lock hierarchy: nothing else ever acquires a Queue lock
    /// while already holding this one, so there is no cycle even though
    /// the protocol calls `Queue.finish()` internally — see DESIGN.md.
    binding_gate: Mutex<()>,
}

/// An immutable compiled binary plus its Kernels and DeviceVars (spec.md
/// §3 Module).
#[derive(Clone)]
pub struct Module(Arc<ModuleInner>);

fn info_kernel_name(var: &str) -> String {
    format!("{}{}", INFO_KERNEL_PREFIX, var)
}

fn bind_kernel_name(var: &str) -> String {
    format!("{}{}", BIND_KERNEL_PREFIX, var)
}

fn init_kernel_name(var: &str) -> String {
    format!("{}{}", INIT_KERNEL_PREFIX, var)
}

impl Module {
    pub(crate) fn new(ctx: Context, device: DeviceHandle, driver: Arc<dyn Driver>, spirv: Vec<u8>, jit_flags: Option<String>) -> Self {
        Module(Arc::new(ModuleInner {
            id: gpurt_core::handle::next_id(),
            ctx,
            device,
            driver,
            spirv,
            jit_flags,
            compile: Mutex::new(CompileState::Uncompiled),
            kernels: Mutex::new(HashMap::new()),
            device_vars: Mutex::new(HashMap::new()),
            variables_allocated: AtomicBool::new(false),
            variables_initialized: AtomicBool::new(false),
            binding_gate: Mutex::new(()),
        }))
    }

    /// An identity usable before native compilation has happened (the
    /// real `ModuleHandle` doesn't exist yet).
    pub(crate) fn handle_hint(&self) -> u64 {
        self.0.id
    }

    pub fn variables_allocated(&self) -> bool {
        self.0.variables_allocated.load(Ordering::Acquire)
    }

    pub fn variables_initialized(&self) -> bool {
        self.0.variables_initialized.load(Ordering::Acquire)
    }

    /// `compileOnce` (spec.md §4.3): first caller drives native
    /// compilation; concurrent callers block on the same gate and observe
    /// the same outcome, since the lock is held for the whole call.
    fn compile_once(&self) -> Result<ModuleInfo> {
        let mut st = self.0.compile.lock().unwrap();
        if let CompileState::Compiled { info, .. } = &*st {
            return Ok(info.clone());
        }
        let (handle, info) = self.0.driver.load_module(self.0.ctx.handle(), self.0.device, &self.0.spirv, self.0.jit_flags.as_deref())?;
        *st = CompileState::Compiled { handle, info: info.clone() };
        Ok(info)
    }

    fn native_handle(&self) -> ModuleHandle {
        match &*self.0.compile.lock().unwrap() {
            CompileState::Compiled { handle, .. } => *handle,
            CompileState::Uncompiled => unreachable!("native_handle called before compile_once"),
        }
    }

    pub fn kernel(&self, name: &str) -> Result<Kernel> {
        let info = self.compile_once()?;
        let mut kernels = self.0.kernels.lock().unwrap();
        if let Some(k) = kernels.get(name) {
            return Ok(k.clone());
        }
        let func_info = info
            .kernels
            .iter()
            .find(|f| f.name == name)
            .cloned()
            .ok_or_else(|| Error::from(gpurt_core::error::ErrorKind::InvalidSymbol(name.to_string())))?;
        let handle = self.0.driver.create_kernel(self.native_handle(), name)?;
        let kernel = Kernel(Arc::new(KernelInner { handle, info: func_info }));
        kernels.insert(name.to_string(), kernel.clone());
        Ok(kernel)
    }

    pub fn device_var(&self, name: &str) -> Result<DeviceVar> {
        let info = self.compile_once()?;
        let mut vars = self.0.device_vars.lock().unwrap();
        if let Some(v) = vars.get(name) {
            return Ok(v.clone());
        }
        let decl = info
            .device_vars
            .iter()
            .find(|v| v.name == name)
            .cloned()
            .ok_or_else(|| Error::from(gpurt_core::error::ErrorKind::InvalidSymbol(name.to_string())))?;
        let var = DeviceVar(Arc::new(DeviceVarState {
            name: decl.name,
            size: decl.size,
            alignment: decl.alignment,
            has_initializer: decl.has_initializer,
            dev_ptr: Mutex::new(None),
        }));
        vars.insert(name.to_string(), var.clone());
        Ok(var)
    }

    /// Runs the device-variable lifecycle protocol (spec.md §4.3 steps
    /// 1–7) using `queue` to dispatch the compiler-generated shadow
    /// kernels. Idempotent: a module with no device variables or one
    /// already fully allocated and initialized returns immediately.
    pub fn initialize_device_variables(&self, queue: &Queue) -> Result<()> {
        let _gate = self.0.binding_gate.lock().unwrap();
        let info = self.compile_once()?;

        if info.device_vars.is_empty() {
            self.0.variables_allocated.store(true, Ordering::Release);
            self.0.variables_initialized.store(true, Ordering::Release);
            return Ok(());
        }

        let vars: Vec<DeviceVar> = info.device_vars.iter().map(|d| self.device_var(&d.name)).collect::<Result<_>>()?;

        if !self.0.variables_allocated.load(Ordering::Acquire) {
            let scratch_size = vars.len() * VAR_INFO_RECORD_SIZE;
            let scratch = self.0.driver.alloc(self.0.ctx.handle(), self.0.device, scratch_size, 8, MemSpace::Shared)?;

            for (i, var) in vars.iter().enumerate() {
                let kernel = self.kernel(&info_kernel_name(var.name()))?;
                queue.launch_raw(
                    kernel.handle(),
                    gpurt_core::types::Dim3::one(),
                    gpurt_core::types::Dim3::one(),
                    0,
                    vec![KernelArgValue::Pointer { ptr: Some(scratch), offset: i * VAR_INFO_RECORD_SIZE }],
                )?;
            }
            queue.finish()?;

            let mut record = [0u8; VAR_INFO_RECORD_SIZE];
            for (i, var) in vars.iter().enumerate() {
                self.0.driver.read(scratch, i * VAR_INFO_RECORD_SIZE, &mut record)?;

                let dev_ptr = self.0.driver.alloc(self.0.ctx.handle(), self.0.device, var.size(), var.alignment(), MemSpace::Shared)?;
                *var.0.dev_ptr.lock().unwrap() = Some(dev_ptr);

                let kernel = self.kernel(&bind_kernel_name(var.name()))?;
                queue.launch_raw(
                    kernel.handle(),
                    gpurt_core::types::Dim3::one(),
                    gpurt_core::types::Dim3::one(),
                    0,
                    vec![KernelArgValue::Pointer { ptr: Some(dev_ptr), offset: 0 }],
                )?;
            }
            queue.finish()?;
            let _ = self.0.driver.free(scratch);
            self.0.variables_allocated.store(true, Ordering::Release);
        }

        if !self.0.variables_initialized.load(Ordering::Acquire) {
            let mut queued_any = false;
            for var in &vars {
                if var.has_initializer() {
                    let kernel = self.kernel(&init_kernel_name(var.name()))?;
                    queue.launch_raw(kernel.handle(), gpurt_core::types::Dim3::one(), gpurt_core::types::Dim3::one(), 0, Vec::new())?;
                    queued_any = true;
                }
            }
            if queued_any {
                queue.finish()?;
            }
            self.0.variables_initialized.store(true, Ordering::Release);
        }

        Ok(())
    }

    /// Sets `VariablesInitialized` back to false without freeing storage
    /// (spec.md §4.3 Invalidation).
    pub fn invalidate_device_variables(&self) {
        self.0.variables_initialized.store(false, Ordering::Release);
    }

    /// Frees device-variable storage and clears both flags (spec.md §4.3
    /// Invalidation: deallocation).
    pub fn deallocate_device_variables(&self) -> Result<()> {
        let _gate = self.0.binding_gate.lock().unwrap();
        for var in self.0.device_vars.lock().unwrap().values() {
            if let Some(ptr) = var.0.dev_ptr.lock().unwrap().take() {
                self.0.driver.free(ptr)?;
            }
        }
        self.0.variables_allocated.store(false, Ordering::Release);
        self.0.variables_initialized.store(false, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Module").field("id", &self.0.id).field("allocated", &self.variables_allocated()).finish()
    }
}
