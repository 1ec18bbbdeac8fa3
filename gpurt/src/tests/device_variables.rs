use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use gpurt_core::handle::DevicePtr;
use gpurt_core::sim::{ModuleBlob, SimMemView};
use gpurt_core::types::{ArgInfo, DeviceVarInfo, Dim3, FunctionInfo, KernelArgValue};

use super::harness::Harness;

/// A module with one device variable `counter` (4 bytes, 4-byte aligned,
/// with an initializer), plus the three compiler-generated shadow
/// kernels the binding protocol drives (spec.md §4.3).
fn counter_var_blob(bound_to: Arc<Mutex<Option<DevicePtr>>>, init_ran: Arc<AtomicBool>) -> ModuleBlob {
    let info_kernel = FunctionInfo {
        name: "__gpurt_info_counter".into(),
        args: vec![ArgInfo { index: 0, size: 8, is_pointer: true, is_image: false, is_sampler: false }],
        max_workgroup_size: 1,
        private_mem_size: 0,
        static_local_mem_size: 0,
    };
    let info_body = Arc::new(|view: &SimMemView, _g: Dim3, _b: Dim3, _s: u32, args: &[KernelArgValue]| {
        if let KernelArgValue::Pointer { ptr: Some(ptr), offset } = &args[0] {
            view.write_from(*ptr, *offset, &4u32.to_le_bytes());
            view.write_from(*ptr, *offset + 4, &4u32.to_le_bytes());
            view.write_from(*ptr, *offset + 8, &1u32.to_le_bytes());
        }
    });

    let bind_kernel = FunctionInfo {
        name: "__gpurt_bind_counter".into(),
        args: vec![ArgInfo { index: 0, size: 8, is_pointer: true, is_image: false, is_sampler: false }],
        max_workgroup_size: 1,
        private_mem_size: 0,
        static_local_mem_size: 0,
    };
    let bind_body = {
        let bound_to = Arc::clone(&bound_to);
        Arc::new(move |_view: &SimMemView, _g: Dim3, _b: Dim3, _s: u32, args: &[KernelArgValue]| {
            if let KernelArgValue::Pointer { ptr: Some(ptr), .. } = &args[0] {
                *bound_to.lock().unwrap() = Some(*ptr);
            }
        })
    };

    let init_kernel = FunctionInfo {
        name: "__gpurt_init_counter".into(),
        args: vec![],
        max_workgroup_size: 1,
        private_mem_size: 0,
        static_local_mem_size: 0,
    };
    let init_body = {
        let init_ran = Arc::clone(&init_ran);
        Arc::new(move |_view: &SimMemView, _g: Dim3, _b: Dim3, _s: u32, _args: &[KernelArgValue]| {
            init_ran.store(true, Ordering::SeqCst);
        })
    };

    ModuleBlob::new()
        .with_kernel(info_kernel, Some(info_body))
        .with_kernel(bind_kernel, Some(bind_body))
        .with_kernel(init_kernel, Some(init_body))
        .with_device_var(DeviceVarInfo { name: "counter".into(), size: 4, alignment: 4, has_initializer: true }, Some(4u32.to_le_bytes().to_vec()))
}

#[test]
fn device_variable_protocol_allocates_binds_and_initializes_in_order() {
    let h = Harness::new();
    let queue = h.device().new_queue(gpurt_core::caps::QueueGroupKind::Compute, false, 0).unwrap();

    let bound_to = Arc::new(Mutex::new(None));
    let init_ran = Arc::new(AtomicBool::new(false));
    let module = h.register_module(counter_var_blob(Arc::clone(&bound_to), Arc::clone(&init_ran)));

    assert!(!module.variables_allocated());
    assert!(!module.variables_initialized());

    module.initialize_device_variables(&queue).unwrap();

    assert!(module.variables_allocated());
    assert!(module.variables_initialized());
    assert!(init_ran.load(Ordering::SeqCst), "the init shadow kernel must run for a variable with an initializer");

    let var = module.device_var("counter").unwrap();
    let addr = var.dev_addr().expect("binding must assign a device address");
    assert_eq!(bound_to.lock().unwrap().unwrap(), addr, "the bind shadow kernel must have received the same address device_var() now reports");
}

#[test]
fn device_variable_protocol_is_idempotent() {
    let h = Harness::new();
    let queue = h.device().new_queue(gpurt_core::caps::QueueGroupKind::Compute, false, 0).unwrap();

    let bound_to = Arc::new(Mutex::new(None));
    let init_ran = Arc::new(AtomicBool::new(false));
    let module = h.register_module(counter_var_blob(Arc::clone(&bound_to), Arc::clone(&init_ran)));

    module.initialize_device_variables(&queue).unwrap();
    let first_addr = module.device_var("counter").unwrap().dev_addr();

    init_ran.store(false, Ordering::SeqCst);
    module.initialize_device_variables(&queue).unwrap();
    let second_addr = module.device_var("counter").unwrap().dev_addr();

    assert_eq!(first_addr, second_addr, "a second call must not re-allocate storage");
    assert!(!init_ran.load(Ordering::SeqCst), "a second call must not re-run the init kernel");
}

#[test]
fn invalidate_clears_initialized_flag_without_deallocating() {
    let h = Harness::new();
    let queue = h.device().new_queue(gpurt_core::caps::QueueGroupKind::Compute, false, 0).unwrap();

    let module = h.register_module(counter_var_blob(Arc::new(Mutex::new(None)), Arc::new(AtomicBool::new(false))));
    module.initialize_device_variables(&queue).unwrap();
    let addr_before = module.device_var("counter").unwrap().dev_addr();

    module.invalidate_device_variables();
    assert!(module.variables_allocated(), "invalidation must not deallocate");
    assert!(!module.variables_initialized());
    assert_eq!(module.device_var("counter").unwrap().dev_addr(), addr_before);
}

#[test]
fn deallocate_frees_storage_and_resets_both_flags() {
    let h = Harness::new();
    let queue = h.device().new_queue(gpurt_core::caps::QueueGroupKind::Compute, false, 0).unwrap();

    let module = h.register_module(counter_var_blob(Arc::new(Mutex::new(None)), Arc::new(AtomicBool::new(false))));
    module.initialize_device_variables(&queue).unwrap();

    module.deallocate_device_variables().unwrap();
    assert!(!module.variables_allocated());
    assert!(!module.variables_initialized());
    assert!(module.device_var("counter").unwrap().dev_addr().is_none());
}
