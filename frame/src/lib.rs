// SPDX-License-Identifier: MPL-2.0

//! The architecture frame of the PadOS kernel.
//!
//! This crate carries everything the kernel needs from the machine it runs
//! on: interrupt masking, spinlocks, thread parking and raw clock sources.
//! On `target_os = "none"` builds these are the real Cortex-M paths (PRIMASK
//! masking, PendSV context switching, SysTick time). On hosted builds the
//! same API is backed by `std` threads and a process-global critical section,
//! which on a single core gives the same exclusion guarantees, so the kernel
//! above can be exercised by `cargo test` on the development host.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod arch;
pub mod sync;
pub mod time;
