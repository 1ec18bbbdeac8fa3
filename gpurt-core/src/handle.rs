//! Opaque native-handle newtypes.
//!
//! Every handle is a thin, copyable wrapper around an identifier minted by
//! a `Driver` implementation. The runtime never dereferences or
//! interprets these values; it only threads them back through `Driver`
//! calls, the way `ocl_core`'s `*Core` wrapper types thread raw `cl_*`
//! pointers back through `cl-sys`.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Mints a process-unique id. Used by `Driver` implementations (in
/// particular `sim`) to hand out handle values without needing to know
/// about each other's allocation schemes.
pub fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            /// Mints a new, process-unique handle.
            pub fn new() -> Self {
                $name(next_id())
            }

            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::new()
            }
        }
    };
}

define_handle!(
    /// A native context.
    ContextHandle
);
define_handle!(
    /// A native device.
    DeviceHandle
);
define_handle!(
    /// A regular (non-immediate) command list.
    CommandListHandle
);
define_handle!(
    /// An immediate command list.
    ImmediateCommandListHandle
);
define_handle!(
    /// A native command queue (used to submit regular command lists).
    CommandQueueHandle
);
define_handle!(
    /// A fence signaled on submission completion of a regular command list.
    FenceHandle
);
define_handle!(
    /// An event pool.
    EventPoolHandle
);
define_handle!(
    /// A single event slot within an event pool.
    EventHandle
);
define_handle!(
    /// A compiled module.
    ModuleHandle
);
define_handle!(
    /// A kernel bound to a module and device.
    KernelHandle
);
define_handle!(
    /// A device memory allocation.
    DevicePtr
);
define_handle!(
    /// An image/texture object. Texture descriptors themselves are out of
    /// scope (spec.md Non-goals); this handle exists only so
    /// `memCopyToTexture` type-checks against something.
    ImageHandle
);
