use std::sync::Arc;

use crate::driver::Driver;
use crate::sim::{ModuleBlob, SimDriver};
use crate::types::{ArgInfo, CommandOp, Dim3, EventStatus, FunctionInfo, KernelArgValue, MemSpace};

fn add_kernel_blob() -> ModuleBlob {
    let info = FunctionInfo {
        name: "add_one".into(),
        args: vec![ArgInfo { index: 0, size: 8, is_pointer: true, is_image: false, is_sampler: false }],
        max_workgroup_size: 256,
        private_mem_size: 0,
        static_local_mem_size: 0,
    };
    let body = Arc::new(|view: &crate::sim::SimMemView, _grid: Dim3, _block: Dim3, _shared: u32, args: &[KernelArgValue]| {
        if let KernelArgValue::Pointer { ptr: Some(ptr), .. } = &args[0] {
            let v = view.read_i32(*ptr, 0);
            view.write_i32(*ptr, 0, v + 1);
        }
    });
    ModuleBlob::new().with_kernel(info, Some(body))
}

#[test]
fn alloc_write_read_roundtrip() {
    let driver = SimDriver::new();
    let device = driver.add_default_device();
    let ctx = driver.create_context(device).unwrap();
    let ptr = driver.alloc(ctx, device, 16, 8, MemSpace::Device).unwrap();
    driver.write(ptr, 0, &[1, 2, 3, 4]).unwrap();
    let mut out = [0u8; 4];
    driver.read(ptr, 0, &mut out).unwrap();
    assert_eq!(out, [1, 2, 3, 4]);
    driver.free(ptr).unwrap();
    assert!(driver.read(ptr, 0, &mut out).is_err());
}

#[test]
fn command_list_executes_in_program_order_on_submit() {
    let driver = SimDriver::new();
    let device = driver.add_default_device();
    let ctx = driver.create_context(device).unwrap();
    let ptr = driver.alloc(ctx, device, 4, 4, MemSpace::Device).unwrap();
    driver.write(ptr, 0, &41i32.to_le_bytes()).unwrap();

    let blob = add_kernel_blob();
    let blob_bytes = driver.register_blob(blob);
    let (module, info) = driver.load_module(ctx, device, &blob_bytes, None).unwrap();
    assert_eq!(info.kernels.len(), 1);
    let kernel = driver.create_kernel(module, "add_one").unwrap();

    let pool = driver.create_event_pool(ctx, 4).unwrap();
    let done = driver.create_event(pool, 0).unwrap();

    let list = driver.create_command_list(ctx).unwrap();
    driver
        .append_op(
            list,
            CommandOp::Dispatch {
                kernel,
                grid: Dim3::one(),
                block: Dim3::one(),
                shared_mem_bytes: 0,
                args: vec![KernelArgValue::Pointer { ptr: Some(ptr), offset: 0 }],
            },
            Some(done),
        )
        .unwrap();

    let queue = driver.create_command_queue(ctx, device).unwrap();
    let fence = driver.submit_command_list(queue, list).unwrap();
    driver.wait_fence(fence).unwrap();

    assert_eq!(driver.query_event_status(done).unwrap(), EventStatus::Finished);
    let mut out = [0u8; 4];
    driver.read(ptr, 0, &mut out).unwrap();
    assert_eq!(i32::from_le_bytes(out), 42);
}

#[test]
fn null_pointer_argument_finishes_event_with_launch_failure_not_an_err() {
    let driver = SimDriver::new();
    let device = driver.add_default_device();
    let ctx = driver.create_context(device).unwrap();

    let blob = add_kernel_blob();
    let blob_bytes = driver.register_blob(blob);
    let (module, _info) = driver.load_module(ctx, device, &blob_bytes, None).unwrap();
    let kernel = driver.create_kernel(module, "add_one").unwrap();

    let pool = driver.create_event_pool(ctx, 4).unwrap();
    let done = driver.create_event(pool, 0).unwrap();
    let list = driver.create_command_list(ctx).unwrap();
    driver
        .append_op(
            list,
            CommandOp::Dispatch {
                kernel,
                grid: Dim3::one(),
                block: Dim3::one(),
                shared_mem_bytes: 0,
                args: vec![KernelArgValue::Pointer { ptr: None, offset: 0 }],
            },
            Some(done),
        )
        .unwrap();

    let queue = driver.create_command_queue(ctx, device).unwrap();
    // Submission itself must not fail: the failure belongs to the event.
    let fence = driver.submit_command_list(queue, list).unwrap();
    driver.wait_fence(fence).unwrap();

    assert_eq!(driver.query_event_status(done).unwrap(), EventStatus::Finished);
    match driver.event_error(done).unwrap() {
        Some(crate::error::ErrorKind::LaunchFailure(_)) => {}
        other => panic!("expected LaunchFailure, got {:?}", other),
    }
}

#[test]
fn immediate_list_waits_before_executing() {
    use std::thread;
    use std::time::Duration;

    let driver = Arc::new(SimDriver::new());
    let device = driver.add_default_device();
    let ctx = driver.create_context(device).unwrap();
    let src = driver.alloc(ctx, device, 4, 4, MemSpace::Device).unwrap();
    let dst = driver.alloc(ctx, device, 4, 4, MemSpace::Device).unwrap();
    driver.write(src, 0, &7u32.to_le_bytes()).unwrap();

    let pool = driver.create_event_pool(ctx, 4).unwrap();
    let gate = driver.create_event(pool, 0).unwrap();
    let imm = driver.create_immediate_command_list(ctx, device).unwrap();

    let signaler = {
        let driver = Arc::clone(&driver);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            driver.host_signal_event(gate).unwrap();
        })
    };

    // Blocks on `gate` until the spawned thread signals it.
    driver.append_op_immediate(imm, CommandOp::Copy { src, dst, len: 4 }, &[gate], None).unwrap();
    signaler.join().unwrap();

    let mut out = [0u8; 4];
    driver.read(dst, 0, &mut out).unwrap();
    assert_eq!(u32::from_le_bytes(out), 7);
}
