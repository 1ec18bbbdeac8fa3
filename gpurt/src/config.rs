//! Process-lifetime configuration read once during `Backend::initialize`.
//!
//! spec.md §6 "Persisted state": no config file, no CLI — both are named
//! Non-goals. Two environment variables only.

use std::env;

const JIT_FLAGS_VAR: &str = "GPURT_JIT_FLAGS";
const IMMEDIATE_LISTS_VAR: &str = "GPURT_IMMEDIATE_COMMAND_LISTS";

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Extra flags passed to the (external) SPIR-V compiler toolchain.
    /// Opaque to this runtime; threaded through to `Driver::load_module`
    /// verbatim at module-compile time.
    pub jit_flags: Option<String>,
    /// Overrides whether immediate command lists are used even when the
    /// device reports support for them. `None` means "defer to device
    /// capability".
    pub immediate_command_lists: Option<bool>,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let jit_flags = env::var(JIT_FLAGS_VAR).ok();
        let immediate_command_lists = env::var(IMMEDIATE_LISTS_VAR).ok().map(|v| v != "0" && !v.eq_ignore_ascii_case("false"));
        RuntimeConfig { jit_flags, immediate_command_lists }
    }
}
