mod harness;

mod device_variables;
mod events;
mod queues;

use std::sync::Arc;

use gpurt_core::driver::Driver;
use gpurt_core::sim::ModuleBlob;
use gpurt_core::types::{ArgInfo, Dim3, FunctionInfo, KernelArgValue, MemSpace};

use crate::exec_item::ExecItem;

use self::harness::Harness;

/// `axpy(dst[i] = src[i] * alpha, i in 0..grid.volume())`, used across
/// this file's single-stream launch tests.
fn axpy_blob() -> ModuleBlob {
    let info = FunctionInfo {
        name: "axpy".into(),
        args: vec![
            ArgInfo { index: 0, size: 8, is_pointer: true, is_image: false, is_sampler: false },
            ArgInfo { index: 1, size: 8, is_pointer: true, is_image: false, is_sampler: false },
            ArgInfo { index: 2, size: 4, is_pointer: false, is_image: false, is_sampler: false },
        ],
        max_workgroup_size: 256,
        private_mem_size: 0,
        static_local_mem_size: 0,
    };
    let body = Arc::new(|view: &gpurt_core::sim::SimMemView, grid: Dim3, _block: Dim3, _shared: u32, args: &[KernelArgValue]| {
        let (src, src_off) = match &args[0] {
            KernelArgValue::Pointer { ptr: Some(p), offset } => (*p, *offset),
            _ => return,
        };
        let (dst, dst_off) = match &args[1] {
            KernelArgValue::Pointer { ptr: Some(p), offset } => (*p, *offset),
            _ => return,
        };
        let alpha = match &args[2] {
            KernelArgValue::Bytes(b) if b.len() == 4 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(b);
                f32::from_le_bytes(buf)
            }
            _ => return,
        };
        for i in 0..grid.volume() as usize {
            let mut buf = [0u8; 4];
            view.read_into(src, src_off + i * 4, &mut buf);
            let v = f32::from_le_bytes(buf) * alpha;
            view.write_from(dst, dst_off + i * 4, &v.to_le_bytes());
        }
    });
    ModuleBlob::new().with_kernel(info, Some(body))
}

fn write_f32s(h: &Harness, ptr: gpurt_core::handle::DevicePtr, values: &[f32]) {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    h.driver().write(ptr, 0, &bytes).unwrap();
}

fn read_f32s(h: &Harness, ptr: gpurt_core::handle::DevicePtr, n: usize) -> Vec<f32> {
    let mut bytes = vec![0u8; n * 4];
    h.driver().read(ptr, 0, &mut bytes).unwrap();
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

fn axpy_exec_item(h: &Harness, queue: crate::queue::Queue, src: gpurt_core::handle::DevicePtr, dst: gpurt_core::handle::DevicePtr, alpha: f32, n: u32) -> ExecItem {
    let module = h.register_module(axpy_blob());
    let kernel = module.kernel("axpy").unwrap();
    let mut item = ExecItem::new(queue, kernel, Dim3::new(n, 1, 1), Dim3::one(), 0);
    item.set_arg_ptr(0, 0, Some(src)).unwrap();
    item.set_arg_ptr(1, 8, Some(dst)).unwrap();
    item.set_arg(2, 16, &alpha.to_le_bytes()).unwrap();
    item
}

#[test]
fn single_stream_kernel_launch_produces_expected_output() {
    let h = Harness::new();
    let queue = h.device().new_queue(gpurt_core::caps::QueueGroupKind::Compute, false, 0).unwrap();

    let src = h.device().alloc(16, 4, MemSpace::Device).unwrap();
    let dst = h.device().alloc(16, 4, MemSpace::Device).unwrap();
    write_f32s(&h, src, &[1.0, 2.0, 3.0, 4.0]);

    let item = axpy_exec_item(&h, queue.clone(), src, dst, 2.0, 4);
    queue.launch(item).unwrap();
    queue.finish().unwrap();

    assert_eq!(read_f32s(&h, dst, 4), vec![2.0, 4.0, 6.0, 8.0]);
}

#[test]
fn launch_rejects_mismatched_argument_count_synchronously() {
    let h = Harness::new();
    let queue = h.device().new_queue(gpurt_core::caps::QueueGroupKind::Compute, false, 0).unwrap();
    let module = h.register_module(axpy_blob());
    let kernel = module.kernel("axpy").unwrap();

    let mut item = ExecItem::new(queue, kernel, Dim3::one(), Dim3::one(), 0);
    item.set_arg(0, 0, &1.0f32.to_le_bytes()).unwrap();

    let err = item.queue.clone().launch(item).unwrap_err();
    match err.kind() {
        gpurt_core::error::ErrorKind::LaunchFailure(_) => {}
        other => panic!("expected LaunchFailure, got {:?}", other),
    }
}

#[test]
fn null_device_pointer_fails_the_event_without_poisoning_the_queue() {
    let h = Harness::new();
    let queue = h.device().new_queue(gpurt_core::caps::QueueGroupKind::Compute, false, 0).unwrap();
    let dst = h.device().alloc(16, 4, MemSpace::Device).unwrap();

    let item = axpy_exec_item(&h, queue.clone(), gpurt_core::handle::DevicePtr(0), dst, 1.0, 4);
    let event = queue.launch(item).unwrap();
    assert!(event.wait().is_err() || matches!(event.error(), Ok(Some(_))));

    // The stream itself must still be usable for unrelated work.
    let a = h.device().alloc(4, 4, MemSpace::Device).unwrap();
    let b = h.device().alloc(4, 4, MemSpace::Device).unwrap();
    queue.mem_copy(a, b, 4).unwrap();
}
