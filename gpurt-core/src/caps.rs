//! Device property / capability records queried from a `Driver`.
//!
//! spec.md §6 names these as the subset of device-property queries the
//! core actually consumes; the rest (full attribute enumeration, texture
//! descriptors) is out of scope and not modeled here.

/// One queue group as exposed by a device (e.g. one "compute" group and
/// one "copy" group).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueGroupProps {
    pub kind: QueueGroupKind,
    /// Number of physical queues in this group; `Queue` construction
    /// round-robins across this count (spec.md §4.4 "Copy-queue
    /// round-robin").
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueGroupKind {
    Compute,
    Copy,
}

bitflags::bitflags! {
    /// Device feature flags consumed by the core (spec.md §6).
    pub struct FeatureFlags: u32 {
        const ON_DEMAND_PAGING       = 0b0001;
        const FLOAT_ATOMICS          = 0b0010;
        const EXPERIMENTAL_MODULE_PROGRAM = 0b0100;
        const IMMEDIATE_COMMAND_LISTS     = 0b1000;
    }
}

/// Device properties relevant to the core's scheduling and
/// timestamp-correction logic.
#[derive(Debug, Clone)]
pub struct DeviceProps {
    pub name: String,
    /// Device timer ticks per second; used to scale elapsed-time deltas.
    pub timestamp_frequency: u64,
    /// Number of low-order bits of the device timestamp counter that are
    /// actually valid; values are masked to this width before subtraction
    /// (spec.md §4.1 "Timestamp semantics").
    pub valid_timestamp_bits: u32,
    pub queue_groups: Vec<QueueGroupProps>,
    pub features: FeatureFlags,
    /// Total device memory available to the allocator, consumed as the
    /// `AllocationTracker`'s `global_capacity`.
    pub global_memory_bytes: u64,
}

impl DeviceProps {
    pub fn supports_immediate_command_lists(&self) -> bool {
        self.features.contains(FeatureFlags::IMMEDIATE_COMMAND_LISTS)
    }

    pub fn compute_group(&self) -> Option<QueueGroupProps> {
        self.queue_groups.iter().copied().find(|g| g.kind == QueueGroupKind::Compute)
    }

    pub fn copy_group(&self) -> Option<QueueGroupProps> {
        self.queue_groups.iter().copied().find(|g| g.kind == QueueGroupKind::Copy)
    }

    /// Masks a raw device timestamp down to the valid-bit width.
    pub fn mask_timestamp(&self, raw: u64) -> u64 {
        if self.valid_timestamp_bits >= 64 {
            raw
        } else {
            raw & ((1u64 << self.valid_timestamp_bits) - 1)
        }
    }
}
