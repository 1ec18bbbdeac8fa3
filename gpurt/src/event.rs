//! Event & EventPool (spec.md §3, §4.1).
//!
//! `Event` is a thin `Arc` handle, mirroring how `ocl::standard::Event`
//! wraps a reference-counted core object — except here the reference
//! count *is* the lifecycle the spec calls for: when the last `Event`
//! clone (held by the application, a `Queue`'s `LastEvent`, or the
//! `EventMonitor`'s tracked set) drops, the native handle resets and the
//! pool slot returns to its free stack.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use gpurt_core::caps::DeviceProps;
use gpurt_core::driver::Driver;
use gpurt_core::handle::{CommandListHandle, EventHandle, EventPoolHandle};
use gpurt_core::types::EventStatus;

use crate::context::ContextInner;
use crate::error::{Error, Result};

/// A deferred post-completion action (spec.md §4.1 `addAction`). Must not
/// panic — the monitor and `wait` both run these inline.
pub type Action = Box<dyn FnOnce() + Send>;

struct PoolState {
    free: Vec<u32>,
    next_unused: u32,
}

/// Backing store for one generation of events (spec.md §4.1 "EventPool
/// capacity policy"). Always reached through `Context`, which owns the
/// growing vector of generations.
pub(crate) struct EventPoolInner {
    pub(crate) handle: EventPoolHandle,
    pub(crate) capacity: u32,
    state: Mutex<PoolState>,
}

impl EventPoolInner {
    pub(crate) fn new(handle: EventPoolHandle, capacity: u32) -> Self {
        EventPoolInner { handle, capacity, state: Mutex::new(PoolState { free: Vec::new(), next_unused: 0 }) }
    }

    /// Returns `Some((slot, reused))`, `reused` marking whether this came
    /// off the free stack (a previously-returned event) rather than a
    /// never-before-used slot.
    fn try_acquire(&self) -> Option<(u32, bool)> {
        let mut st = self.state.lock().unwrap();
        if let Some(slot) = st.free.pop() {
            return Some((slot, true));
        }
        if st.next_unused < self.capacity {
            let slot = st.next_unused;
            st.next_unused += 1;
            return Some((slot, false));
        }
        None
    }

    fn release(&self, slot: u32) {
        self.state.lock().unwrap().free.push(slot);
    }
}

enum ActionState {
    Pending(Vec<Action>),
    Drained,
}

struct EventInner {
    handle: EventHandle,
    pool: Weak<EventPoolInner>,
    slot: u32,
    ctx: Weak<ContextInner>,
    driver: Arc<dyn Driver>,
    device_props: Arc<DeviceProps>,
    assigned_cmd_list: Mutex<Option<CommandListHandle>>,
    actions: Mutex<ActionState>,
}

/// A completion token (spec.md §3 Event). Clone shares ownership; the
/// native handle and pool slot are released when the last clone drops.
#[derive(Clone)]
pub struct Event(Arc<EventInner>);

impl Event {
    pub(crate) fn new(
        handle: EventHandle,
        pool: Weak<EventPoolInner>,
        slot: u32,
        ctx: Weak<ContextInner>,
        driver: Arc<dyn Driver>,
        device_props: Arc<DeviceProps>,
    ) -> Self {
        Event(Arc::new(EventInner {
            handle,
            pool,
            slot,
            ctx,
            driver,
            device_props,
            assigned_cmd_list: Mutex::new(None),
            actions: Mutex::new(ActionState::Pending(Vec::new())),
        }))
    }

    pub fn handle(&self) -> EventHandle {
        self.0.handle
    }

    pub fn status(&self) -> Result<EventStatus> {
        Ok(self.0.driver.query_event_status(self.0.handle)?)
    }

    /// Blocks the caller until `Finished`, then runs the one-shot
    /// finalization (spec.md §4.1 Lifecycle & actions).
    pub fn wait(&self) -> Result<()> {
        self.0.driver.wait_event(self.0.handle)?;
        self.finalize()
    }

    /// Probes status without blocking; fails with `NotReady` if
    /// `throw_if_not_ready` and the event has not finished.
    pub fn update_finish_status(&self, throw_if_not_ready: bool) -> Result<EventStatus> {
        let status = self.status()?;
        if status == EventStatus::Finished {
            self.finalize()?;
            Ok(status)
        } else if throw_if_not_ready {
            Err(gpurt_core::error::ErrorKind::NotReady.into())
        } else {
            Ok(status)
        }
    }

    /// Forces the event into `Finished`, as if a host-side signaler fired
    /// (spec.md §4.1 `hostSignal`).
    pub fn host_signal(&self) -> Result<()> {
        self.0.driver.host_signal_event(self.0.handle)?;
        self.finalize()
    }

    /// `Some(kind)` if the operation this event was attached to completed
    /// with an error (spec.md §7 failure semantics).
    pub fn error(&self) -> Result<Option<gpurt_core::error::ErrorKind>> {
        Ok(self.0.driver.event_error(self.0.handle)?)
    }

    /// Elapsed milliseconds between two finished events, correcting for
    /// device-counter wraparound (spec.md §4.1 "Timestamp semantics").
    pub fn elapsed_ms(&self, earlier: &Event) -> Result<f64> {
        if self.status()? != EventStatus::Finished || earlier.status()? != EventStatus::Finished {
            return Err(gpurt_core::error::ErrorKind::NotReady.into());
        }
        let a = self.0.driver.event_timestamps(earlier.0.handle)?;
        let b = self.0.driver.event_timestamps(self.0.handle)?;
        let mask_a = self.0.device_props.mask_timestamp(a.device_ticks);
        let mask_b = self.0.device_props.mask_timestamp(b.device_ticks);
        if mask_b >= mask_a {
            let ticks = mask_b - mask_a;
            Ok(ticks as f64 * 1000.0 / self.0.device_props.timestamp_frequency as f64)
        } else {
            Ok((b.host_nanos as f64 - a.host_nanos as f64) / 1_000_000.0)
        }
    }

    /// Appends a deferred action, run exactly once on the Init→Finished
    /// transition — immediately, if that transition already happened.
    pub fn add_action(&self, action: Action) {
        let mut st = self.0.actions.lock().unwrap();
        match &mut *st {
            ActionState::Pending(actions) => actions.push(action),
            ActionState::Drained => {
                drop(st);
                action();
            }
        }
    }

    /// Records a command list to return to `ctx`'s pool on finish
    /// (spec.md §4.4 step 5).
    pub fn assign_cmd_list(&self, cl: CommandListHandle) {
        *self.0.assigned_cmd_list.lock().unwrap() = Some(cl);
    }

    /// Runs the Init→Finished transition exactly once: returns the
    /// assigned command list (if any), then drains actions in order.
    /// Safe to call from both `wait` and the monitor's poll loop.
    fn finalize(&self) -> Result<()> {
        let mut st = self.0.actions.lock().unwrap();
        let actions = match std::mem::replace(&mut *st, ActionState::Drained) {
            ActionState::Pending(actions) => actions,
            ActionState::Drained => return Ok(()),
        };
        drop(st);

        if let Some(cl) = self.0.assigned_cmd_list.lock().unwrap().take() {
            if let Some(ctx) = self.0.ctx.upgrade() {
                ctx.return_command_list(cl);
            }
        }
        for action in actions {
            action();
        }
        Ok(())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Event").field("handle", &self.0.handle).field("slot", &self.0.slot).finish()
    }
}

impl Drop for EventInner {
    fn drop(&mut self) {
        let _ = self.driver.reset_event(self.handle);
        if let Some(pool) = self.pool.upgrade() {
            pool.release(self.slot);
        }
    }
}

pub(crate) fn try_acquire_from_pool(
    pool: &Arc<EventPoolInner>,
    ctx: &Weak<ContextInner>,
    driver: &Arc<dyn Driver>,
    device_props: &Arc<DeviceProps>,
) -> Option<Result<(Event, bool)>> {
    let (slot, reused) = pool.try_acquire()?;
    let result = driver.create_event(pool.handle, slot).map_err(Error::from).map(|handle| {
        (Event::new(handle, Arc::downgrade(pool), slot, ctx.clone(), Arc::clone(driver), Arc::clone(device_props)), reused)
    });
    Some(result)
}
