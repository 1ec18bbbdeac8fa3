//! EventMonitor: the background drain loop (spec.md §4.6).
//!
//! A single long-lived thread started at `Backend` init and joined at
//! uninitialize. Each tick it updates every tracked event's status
//! (reclaiming finished ones) and processes at most one pending callback
//! record, then sleeps.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gpurt_core::types::EventStatus;

use crate::callback::{CallbackReceiver, CallbackRecord};
use crate::event::Event;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Events the monitor holds a shared-ownership reference to, so pool
/// slots are reclaimed even if the application never calls `wait` on a
/// given event. Pruned as soon as an event is observed `Finished`.
#[derive(Clone)]
pub(crate) struct EventTracker(Arc<Mutex<Vec<Event>>>);

impl EventTracker {
    pub(crate) fn new() -> Self {
        EventTracker(Arc::new(Mutex::new(Vec::new())))
    }

    pub(crate) fn track(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// Drives `updateFinishStatus(throwIfNotReady=false)` for every
    /// tracked event (spec.md §4.6 step 2), dropping ones that transition
    /// to `Finished` so their pool slot can return once every other
    /// owner has also dropped its reference.
    fn drain_once(&self) {
        let mut tracked = self.0.lock().unwrap();
        tracked.retain(|ev| match ev.update_finish_status(false) {
            Ok(EventStatus::Finished) => false,
            _ => true,
        });
    }
}

fn process_callback(record: CallbackRecord) {
    if let Err(e) = record.gpu_ready.wait() {
        log::error!("callback's gpu_ready event failed: {}", e);
    }
    let err = record.gpu_ready.error().ok().flatten();

    let run = record.run;
    if catch_unwind(AssertUnwindSafe(|| run(err))).is_err() {
        log::error!("host callback panicked; swallowed so the stream can recover");
    }

    if let Err(e) = record.cpu_done.host_signal() {
        log::error!("failed to release stream after callback: {}", e);
    }
    if let Err(e) = record.gpu_ack.wait() {
        log::error!("callback's gpu_ack event failed: {}", e);
    }
}

/// Drains `tracker` to empty, bounded by a diagnostic timeout (spec.md
/// §4.6 "On stop-request it drains outstanding events to completion...
/// bounded by a diagnostic timeout").
fn drain_to_completion(tracker: &EventTracker) {
    let start = Instant::now();
    while tracker.len() > 0 {
        tracker.drain_once();
        if tracker.len() == 0 {
            break;
        }
        if start.elapsed() > DRAIN_TIMEOUT {
            log::warn!("event monitor shutdown: {} event(s) still outstanding after {:?}, giving up", tracker.len(), DRAIN_TIMEOUT);
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

pub(crate) struct EventMonitor {
    stop_tx: crossbeam_channel::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl EventMonitor {
    pub(crate) fn start(tracker: EventTracker, callbacks: CallbackReceiver) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("gpurt-event-monitor".into())
            .spawn(move || loop {
                tracker.drain_once();
                if let Some(record) = callbacks.try_pop() {
                    process_callback(record);
                }
                if stop_rx.recv_timeout(POLL_INTERVAL).is_ok() {
                    drain_to_completion(&tracker);
                    break;
                }
            })
            .expect("failed to spawn event monitor thread");
        EventMonitor { stop_tx, handle: Some(handle) }
    }

    pub(crate) fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
