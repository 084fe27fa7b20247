// SPDX-License-Identifier: MPL-2.0

//! Architecture dispatch.
//!
//! Exactly one backend is compiled in. Both provide the common surface:
//! `disable_interrupts`/[`IrqGuard`], the NVIC hooks, and the raw monotonic
//! clock. The hosted backend additionally provides [`hosted::Parker`] and
//! host-thread spawning used by the scheduler's hosted personality.

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        mod armv7m;
        pub use armv7m::*;
    } else {
        mod hosted;
        pub use hosted::*;
    }
}
