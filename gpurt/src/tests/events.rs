use gpurt_core::types::MemSpace;

use super::harness::Harness;

#[test]
fn event_pool_reuses_freed_slots_instead_of_growing() {
    let h = Harness::new();
    let queue = h.device().new_queue(gpurt_core::caps::QueueGroupKind::Compute, false, 0).unwrap();
    let ptr = h.device().alloc(4, 4, MemSpace::Device).unwrap();

    for _ in 0..8 {
        queue.mem_fill(ptr, 4, vec![0]).unwrap();
    }

    let (_requested, _reused, generations) = h.ctx().event_pool_stats();
    assert_eq!(generations, 1, "8 short-lived events must fit in the base pool without growing it");
}

#[test]
fn event_pool_doubles_capacity_once_the_base_generation_is_exhausted() {
    let h = Harness::new();

    // Hold every event alive so none can be released back to the pool,
    // forcing a second (double-capacity) generation once the base pool's
    // 64 slots are exhausted.
    let mut held = Vec::new();
    for _ in 0..65 {
        held.push(h.ctx().acquire_event().unwrap());
    }

    let (requested, _reused, generations) = h.ctx().event_pool_stats();
    assert_eq!(requested, 65);
    assert_eq!(generations, 2, "the 65th acquisition must have grown a second, doubled-capacity pool");
}

#[test]
fn finish_waits_out_every_event_assigned_a_command_list() {
    let h = Harness::without_immediate_lists();
    let queue = h.device().new_queue(gpurt_core::caps::QueueGroupKind::Compute, false, 0).unwrap();
    let ptr = h.device().alloc(4, 4, MemSpace::Device).unwrap();

    for _ in 0..4 {
        queue.mem_fill_async(ptr, 4, vec![9]).unwrap();
    }
    queue.finish().unwrap();

    let (requested, reused) = h.ctx().command_list_stats();
    assert_eq!(requested, 4);
    assert!(reused >= 3, "the command-list pool should have recycled lists across finish() cycles, got {} reused of {}", reused, requested);
}

#[test]
fn callback_runs_on_monitor_thread_after_its_gpu_ready_point() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    let h = Harness::new();
    let queue = h.device().new_queue(gpurt_core::caps::QueueGroupKind::Compute, false, 0).unwrap();
    let ptr = h.device().alloc(4, 4, MemSpace::Device).unwrap();

    queue.mem_fill_async(ptr, 4, vec![1]).unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let ran_writer = Arc::clone(&ran);
    queue
        .add_callback(move |err| {
            assert!(err.is_none());
            ran_writer.store(true, Ordering::SeqCst);
        })
        .unwrap();

    queue.mem_fill_async(ptr, 4, vec![2]).unwrap();
    queue.finish().unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while !ran.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(ran.load(Ordering::SeqCst), "callback never ran within the deadline");
}

#[test]
fn elapsed_ms_uses_the_device_delta_when_the_counter_has_not_wrapped() {
    let h = Harness::with_timestamp_bits(1);
    let a = h.ctx().acquire_event().unwrap();
    a.host_signal().unwrap();
    let b = h.ctx().acquire_event().unwrap();
    b.host_signal().unwrap();

    // Two ticks of a 1GHz counter, one masked bit apart (0 -> 1): no
    // wraparound, so this must be the plain device-delta conversion.
    let elapsed = b.elapsed_ms(&a).unwrap();
    let expected = 1.0 * 1000.0 / 1_000_000_000.0;
    assert!((elapsed - expected).abs() < 1e-9, "expected {} got {}", expected, elapsed);
}

#[test]
fn elapsed_ms_falls_back_to_host_time_when_the_device_counter_wraps() {
    let h = Harness::with_timestamp_bits(1);

    // With only 1 valid bit the masked counter cycles 0, 1, 0, ...; the
    // third tick wraps relative to the second and must trip the
    // host-time fallback instead of underflowing.
    let a = h.ctx().acquire_event().unwrap();
    a.host_signal().unwrap();
    let b = h.ctx().acquire_event().unwrap();
    b.host_signal().unwrap();
    let c = h.ctx().acquire_event().unwrap();
    c.host_signal().unwrap();

    let elapsed = c.elapsed_ms(&b).unwrap();
    assert!(elapsed >= 0.0, "wraparound fallback must still be non-negative, got {}", elapsed);
}

#[test]
fn panicking_callback_still_releases_the_stream() {
    use std::panic;
    use std::time::Duration;

    let h = Harness::new();
    let queue = h.device().new_queue(gpurt_core::caps::QueueGroupKind::Compute, false, 0).unwrap();
    let ptr = h.device().alloc(4, 4, MemSpace::Device).unwrap();

    queue.add_callback(|_| panic!("intentional test panic, must not wedge the stream")).unwrap();
    queue.mem_fill_async(ptr, 4, vec![3]).unwrap();

    // `finish` must still complete even though the callback panicked;
    // suppress the panic hook's own stderr noise for this one test.
    let prev_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let result = queue.finish();
    panic::set_hook(prev_hook);

    // Give the monitor a moment in case finish() raced ahead of the
    // callback's cpu_done release.
    std::thread::sleep(Duration::from_millis(50));
    result.unwrap();
}
