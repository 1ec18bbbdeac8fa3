//! The host-callback FIFO (spec.md §4.4 "Host callback protocol", §2
//! `Backend ── owns ──▶ CallbackQueue`).
//!
//! Grounded on the `crossbeam-channel` dependency carried forward from the
//! teacher lineage's own `crossbeam` usage (see DESIGN.md): an MPSC queue
//! is exactly the right shape for "push a record from any queue, pop one
//! per monitor tick".

use gpurt_core::error::ErrorKind;

use crate::event::Event;

/// Run once by the monitor with the first error observed on `gpu_ready`,
/// if any (spec.md §7). A HIP-style `fn(userdata, status)` pair is
/// deliberately not modeled — the HIP API surface itself is out of scope
/// (spec.md §1) — so the "userdata" is whatever the closure captures.
pub type CallbackFn = Box<dyn FnOnce(Option<ErrorKind>) + Send>;

pub(crate) struct CallbackRecord {
    pub(crate) run: CallbackFn,
    pub(crate) gpu_ready: Event,
    pub(crate) cpu_done: Event,
    pub(crate) gpu_ack: Event,
}

/// The producer half, cloned into every `Queue`.
#[derive(Clone)]
pub(crate) struct CallbackQueue {
    sender: crossbeam_channel::Sender<CallbackRecord>,
}

impl CallbackQueue {
    pub(crate) fn push(&self, record: CallbackRecord) {
        // The receiver only goes away with the monitor thread, which
        // outlives every `Queue`; a send error here would mean the
        // process is already tearing down.
        let _ = self.sender.send(record);
    }
}

/// The consumer half, owned solely by the `EventMonitor`.
pub(crate) struct CallbackReceiver {
    receiver: crossbeam_channel::Receiver<CallbackRecord>,
}

impl CallbackReceiver {
    pub(crate) fn try_pop(&self) -> Option<CallbackRecord> {
        self.receiver.try_recv().ok()
    }
}

pub(crate) fn channel() -> (CallbackQueue, CallbackReceiver) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (CallbackQueue { sender }, CallbackReceiver { receiver })
}
