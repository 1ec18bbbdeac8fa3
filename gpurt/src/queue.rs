//! Queue: the submission engine (spec.md §3, §4.4).
//!
//! Every enqueue follows the same stream-order dependency protocol: wait
//! on `LastEvent` (plus any caller-supplied waits), acquire a fresh event,
//! emit the operation signaling that event, then publish it as the new
//! `LastEvent`. This is the central state machine spec.md calls out as
//! ~25% of the system, and it is exercised identically whether the device
//! uses immediate command lists or falls back to regular ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use gpurt_core::caps::{DeviceProps, QueueGroupKind};
use gpurt_core::driver::Driver;
use gpurt_core::error::ErrorKind;
use gpurt_core::handle::{CommandQueueHandle, DeviceHandle, EventHandle, FenceHandle, ImmediateCommandListHandle, KernelHandle};
use gpurt_core::types::{CommandOp, Dim3, KernelArgValue};

use crate::callback::{CallbackQueue, CallbackRecord};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::exec_item::ExecItem;
use crate::monitor::EventTracker;

enum Native {
    Immediate(ImmediateCommandListHandle),
    Regular { queue: CommandQueueHandle, last_fence: Mutex<Option<FenceHandle>> },
}

struct QueueInner {
    ctx: Context,
    #[allow(dead_code)]
    device: DeviceHandle,
    driver: Arc<dyn Driver>,
    kind: QueueGroupKind,
    #[allow(dead_code)]
    index: u32,
    blocking: bool,
    #[allow(dead_code)]
    priority: i32,
    native: Native,
    last_event: Mutex<Option<Event>>,
    /// Events assigned a *regular* command list in this queue, retained
    /// until `finish()` waits them out (spec.md §4.4 `finish()`:
    /// "every event ever assigned a command list in this queue has
    /// released it").
    outstanding: Mutex<Vec<Event>>,
    tracker: EventTracker,
    callbacks: CallbackQueue,
    /// `default_queue_sync` feature hook (spec.md §5, SPEC_FULL.md §6).
    /// Set once by `Device::default_queue`/`attach_legacy_group`; read
    /// from `enqueue_with` only when the feature is enabled.
    #[allow(dead_code)]
    is_default: AtomicBool,
    #[cfg(feature = "default_queue_sync")]
    legacy: Mutex<Option<Arc<crate::legacy_sync::LegacySyncGroup>>>,
}

/// A stream (spec.md §3 Queue / glossary). Clone shares the same
/// underlying native resources.
#[derive(Clone)]
pub struct Queue(Arc<QueueInner>);

/// A non-owning reference to a `Queue`, held by `Device` so it can find
/// (and finish) queues a caller still holds without keeping them alive
/// itself (spec.md §9 "Design Notes" teardown).
#[derive(Clone)]
pub(crate) struct WeakQueue(Weak<QueueInner>);

impl WeakQueue {
    pub(crate) fn upgrade(&self) -> Option<Queue> {
        self.0.upgrade().map(Queue)
    }
}

impl Queue {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        ctx: Context,
        device: DeviceHandle,
        driver: Arc<dyn Driver>,
        props: &DeviceProps,
        immediate_override: Option<bool>,
        kind: QueueGroupKind,
        index: u32,
        blocking: bool,
        priority: i32,
        tracker: EventTracker,
        callbacks: CallbackQueue,
    ) -> Result<Self> {
        // `RuntimeConfig::immediate_command_lists` (spec.md §6 "Persisted
        // state"): `None` defers to device capability, `Some(_)` overrides
        // it outright.
        let use_immediate = immediate_override.unwrap_or_else(|| props.supports_immediate_command_lists());
        let native = if use_immediate {
            Native::Immediate(driver.create_immediate_command_list(ctx.handle(), device)?)
        } else {
            Native::Regular { queue: driver.create_command_queue(ctx.handle(), device)?, last_fence: Mutex::new(None) }
        };
        Ok(Queue(Arc::new(QueueInner {
            ctx,
            device,
            driver,
            kind,
            index,
            blocking,
            priority,
            native,
            last_event: Mutex::new(None),
            outstanding: Mutex::new(Vec::new()),
            tracker,
            callbacks,
            is_default: AtomicBool::new(false),
            #[cfg(feature = "default_queue_sync")]
            legacy: Mutex::new(None),
        })))
    }

    /// Wires this queue into a device's legacy default-stream sync group
    /// (spec.md §5 `syncQueues` open question). `as_default` marks this
    /// queue as the device's own default stream rather than one of the
    /// ordinary blocking streams it synchronizes against.
    #[cfg(feature = "default_queue_sync")]
    pub(crate) fn attach_legacy_group(&self, legacy: Arc<crate::legacy_sync::LegacySyncGroup>, as_default: bool) {
        *self.0.legacy.lock().unwrap() = Some(legacy);
        if as_default {
            self.0.is_default.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn downgrade(&self) -> WeakQueue {
        WeakQueue(Arc::downgrade(&self.0))
    }

    pub fn kind(&self) -> QueueGroupKind {
        self.0.kind
    }

    pub fn is_blocking(&self) -> bool {
        self.0.blocking
    }

    pub fn last_event(&self) -> Option<Event> {
        self.0.last_event.lock().unwrap().clone()
    }

    /// Implements spec.md §4.4 steps 1–6 for a single operation (or, with
    /// `op = None`, a bare barrier/marker). `event` is signaled by the
    /// emitted native operation and becomes the new `LastEvent`.
    fn enqueue_with(&self, op: Option<CommandOp>, extra_waits: &[EventHandle], event: Event) -> Result<Event> {
        let mut last = self.0.last_event.lock().unwrap();
        let mut wait_set: Vec<EventHandle> = Vec::with_capacity(extra_waits.len() + 1);
        if let Some(ev) = last.as_ref() {
            wait_set.push(ev.handle());
        }
        wait_set.extend_from_slice(extra_waits);

        #[cfg(feature = "default_queue_sync")]
        if let Some(legacy) = self.0.legacy.lock().unwrap().as_ref() {
            if self.0.is_default.load(Ordering::SeqCst) {
                wait_set.extend(legacy.blocking_last_events());
            } else if self.0.blocking {
                wait_set.extend(legacy.default_last_event());
            }
        }

        match &self.0.native {
            Native::Immediate(imm) => match op {
                Some(op) => self
                    .0
                    .driver
                    .append_op_immediate(*imm, op, &wait_set, Some(event.handle()))
                    .map_err(|e| {
                        log::error!("immediate dispatch failed: {}", e);
                        e
                    })?,
                None => self
                    .0
                    .driver
                    .append_barrier_immediate(*imm, &wait_set, Some(event.handle()))
                    .map_err(|e| {
                        log::error!("immediate barrier failed: {}", e);
                        e
                    })?,
            },
            Native::Regular { queue, last_fence } => {
                let list = self.0.ctx.acquire_command_list()?;
                match op {
                    Some(op) => {
                        self.0.driver.append_barrier(list, &wait_set, None).map_err(|e| {
                            log::error!("barrier append failed: {}", e);
                            e
                        })?;
                        self.0.driver.append_op(list, op, Some(event.handle())).map_err(|e| {
                            log::error!("op append failed: {}", e);
                            e
                        })?;
                    }
                    None => {
                        self.0.driver.append_barrier(list, &wait_set, Some(event.handle())).map_err(|e| {
                            log::error!("barrier append failed: {}", e);
                            e
                        })?;
                    }
                }
                let fence = self.0.driver.submit_command_list(*queue, list).map_err(|e| {
                    log::error!("command list submission failed: {}", e);
                    e
                })?;
                event.assign_cmd_list(list);
                *last_fence.lock().unwrap() = Some(fence);
                self.0.outstanding.lock().unwrap().push(event.clone());
            }
        }

        self.0.tracker.track(event.clone());
        *last = Some(event.clone());
        Ok(event)
    }

    fn enqueue(&self, op: Option<CommandOp>, extra_waits: &[EventHandle]) -> Result<Event> {
        let event = self.0.ctx.acquire_event()?;
        self.enqueue_with(op, extra_waits, event)
    }

    pub fn mem_copy_async(&self, src: gpurt_core::handle::DevicePtr, dst: gpurt_core::handle::DevicePtr, len: usize) -> Result<Event> {
        self.enqueue(Some(CommandOp::Copy { src, dst, len }), &[])
    }

    pub fn mem_copy(&self, src: gpurt_core::handle::DevicePtr, dst: gpurt_core::handle::DevicePtr, len: usize) -> Result<()> {
        self.mem_copy_async(src, dst, len)?.wait()
    }

    pub fn mem_fill_async(&self, dst: gpurt_core::handle::DevicePtr, len: usize, pattern: Vec<u8>) -> Result<Event> {
        self.enqueue(Some(CommandOp::Fill { dst, len, pattern }), &[])
    }

    pub fn mem_fill(&self, dst: gpurt_core::handle::DevicePtr, len: usize, pattern: Vec<u8>) -> Result<()> {
        self.mem_fill_async(dst, len, pattern)?.wait()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn mem_copy_2d_async(
        &self,
        src: gpurt_core::handle::DevicePtr,
        dst: gpurt_core::handle::DevicePtr,
        src_pitch: usize,
        dst_pitch: usize,
        width: usize,
        height: usize,
    ) -> Result<Event> {
        self.enqueue(Some(CommandOp::Copy2D { src, dst, src_pitch, dst_pitch, width, height }), &[])
    }

    #[allow(clippy::too_many_arguments)]
    pub fn mem_copy_3d_async(
        &self,
        src: gpurt_core::handle::DevicePtr,
        dst: gpurt_core::handle::DevicePtr,
        src_pitch: usize,
        dst_pitch: usize,
        src_slice_pitch: usize,
        dst_slice_pitch: usize,
        width: usize,
        height: usize,
        depth: usize,
    ) -> Result<Event> {
        self.enqueue(
            Some(CommandOp::Copy3D { src, dst, src_pitch, dst_pitch, src_slice_pitch, dst_slice_pitch, width, height, depth }),
            &[],
        )
    }

    pub fn mem_copy_to_texture(&self, src: gpurt_core::handle::DevicePtr, dst: gpurt_core::handle::ImageHandle, len: usize) -> Result<()> {
        self.enqueue(Some(CommandOp::CopyToTexture { src, dst, len }), &[])?.wait()
    }

    pub fn mem_prefetch_async(&self, ptr: gpurt_core::handle::DevicePtr, len: usize) -> Result<Event> {
        self.enqueue(Some(CommandOp::Prefetch { ptr, len }), &[])
    }

    pub fn mem_prefetch(&self, ptr: gpurt_core::handle::DevicePtr, len: usize) -> Result<()> {
        self.mem_prefetch_async(ptr, len)?.wait()
    }

    /// Dispatches a kernel with already-decoded arguments. Bypasses
    /// `ExecItem` entirely — used both by `launch` and internally by the
    /// device-variable binding protocol (spec.md §4.3), whose shadow-kernel
    /// calls address sub-regions of one shared scratch buffer via a
    /// nonzero `KernelArgValue::Pointer` offset that no `ExecItem`-driven
    /// launch ever produces.
    pub(crate) fn launch_raw(&self, kernel: KernelHandle, grid: Dim3, block: Dim3, shared_mem_bytes: u32, args: Vec<KernelArgValue>) -> Result<Event> {
        self.enqueue(Some(CommandOp::Dispatch { kernel, grid, block, shared_mem_bytes, args }), &[])
    }

    /// `launch(ExecItem)` (spec.md §4.4): decodes the packed argument
    /// buffer against the kernel's function-info record and emits a
    /// dispatch. The `ExecItem` is consumed.
    pub fn launch(&self, item: ExecItem) -> Result<Event> {
        let info = item.kernel.info();
        if item.arg_count() != info.args.len() {
            return Err(ErrorKind::LaunchFailure(format!(
                "kernel '{}' expects {} arguments, {} were set",
                info.name,
                info.args.len(),
                item.arg_count()
            ))
            .into());
        }

        let mut args = Vec::with_capacity(info.args.len());
        for (i, arg_info) in info.args.iter().enumerate() {
            let bytes = item
                .arg_bytes(i)
                .map_err(|_| Error::from(ErrorKind::LaunchFailure(format!("kernel '{}': malformed argument buffer at index {}", info.name, i))))?;
            if arg_info.is_pointer {
                if bytes.len() != 8 {
                    return Err(ErrorKind::LaunchFailure(format!("kernel '{}': pointer argument {} is not 8 bytes", info.name, i)).into());
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                let raw = u64::from_le_bytes(buf);
                let ptr = if raw == 0 { None } else { Some(gpurt_core::handle::DevicePtr(raw)) };
                args.push(KernelArgValue::Pointer { ptr, offset: 0 });
            } else {
                args.push(KernelArgValue::Bytes(bytes.to_vec()));
            }
        }

        let kernel = item.kernel.handle();
        self.launch_raw(kernel, item.grid, item.block, item.shared_mem_bytes, args)
    }

    /// A barrier is a marker with an externally supplied wait set
    /// (spec.md §4.4 "Barrier vs marker").
    pub fn enqueue_barrier(&self, waits: &[EventHandle]) -> Result<Event> {
        self.enqueue(None, waits)
    }

    /// A marker is a barrier with no additional waits beyond `LastEvent`.
    pub fn enqueue_marker(&self) -> Result<Event> {
        self.enqueue(None, &[])
    }

    /// Blocks until `LastEvent` is `Finished` and every event this queue
    /// ever assigned a command list to has released it (spec.md §4.4
    /// `finish()`). Propagates the first error observed (spec.md §7).
    pub fn finish(&self) -> Result<()> {
        let last = self.0.last_event.lock().unwrap().clone();
        let outstanding = std::mem::take(&mut *self.0.outstanding.lock().unwrap());

        let mut first_err: Option<Error> = None;
        let mut observe = |ev: &Event| match ev.wait() {
            Err(e) => {
                log::error!("finish: waiting on event failed: {}", e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            Ok(()) => {
                if let Ok(Some(kind)) = ev.error() {
                    // spec.md §7: a fatal launch/copy error still signals
                    // its event so the queue doesn't deadlock; finish() is
                    // where that error finally surfaces.
                    log::error!("finish: op finished with error: {}", kind);
                    if first_err.is_none() {
                        first_err = Some(Error::from(kind));
                    }
                }
            }
        };
        for ev in &outstanding {
            observe(ev);
        }
        if let Some(ev) = &last {
            observe(ev);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// `addCallback(fn, userdata)` (spec.md §4.4 steps 1–5): `f` runs on
    /// the `EventMonitor`'s thread once the stream reaches this point,
    /// with the stream blocked (via `cpu_done`) until `f` returns.
    pub fn add_callback<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(Option<ErrorKind>) + Send + 'static,
    {
        let gpu_ready = self.0.ctx.acquire_event()?;
        let cpu_done = self.0.ctx.acquire_event()?;
        let gpu_ack = self.0.ctx.acquire_event()?;

        self.enqueue_with(None, &[], gpu_ready.clone())?;
        self.enqueue(None, &[cpu_done.handle()])?;
        self.enqueue_with(None, &[], gpu_ack.clone())?;

        self.0.callbacks.push(CallbackRecord { run: Box::new(f), gpu_ready, cpu_done, gpu_ack });
        Ok(())
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Queue").field("kind", &self.0.kind).field("blocking", &self.0.blocking).finish()
    }
}

