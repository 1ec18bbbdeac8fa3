//! Host-side GPU compute runtime: queues, events, modules, and the
//! process-wide `Backend` built on top of the `gpurt-core` native-driver
//! capability surface.
//!
//! For the capability objects themselves (`Driver`, device properties,
//! the simulated backend used both as the default and in this crate's own
//! tests) see [`gpurt_core`].

pub extern crate gpurt_core as core;

mod alloc_tracker;
mod backend;
mod callback;
mod config;
mod context;
mod device;
pub mod error;
mod event;
mod exec_item;
mod legacy_sync;
mod module;
mod monitor;
mod queue;

#[cfg(test)]
mod tests;

pub use crate::alloc_tracker::AllocRecord;
pub use crate::backend::{backend, Backend};
pub use crate::config::RuntimeConfig;
pub use crate::context::Context;
pub use crate::device::Device;
pub use crate::error::{Error, Result};
pub use crate::event::{Action, Event};
pub use crate::exec_item::ExecItem;
pub use crate::module::{DeviceVar, Kernel, Module};
pub use crate::queue::Queue;

#[doc(no_inline)]
pub use crate::core::caps::{DeviceProps, FeatureFlags, QueueGroupKind};
#[doc(no_inline)]
pub use crate::core::error::ErrorKind;
#[doc(no_inline)]
pub use crate::core::handle::{DeviceHandle, DevicePtr};
#[doc(no_inline)]
pub use crate::core::types::{CommandOp, Dim3, EventStatus, KernelArgValue, MemSpace};
