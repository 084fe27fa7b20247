// SPDX-License-Identifier: MPL-2.0

//! Build-time tunables.
//!
//! Pool sizes reflect the small-RAM target profile; larger targets raise
//! them here and nowhere else.

/// Maximum object/volume/driver name length, including the terminator the
/// C-side ABI reserves.
pub const OS_NAME_LENGTH: usize = 32;

/// Number of external interrupt vectors the dispatcher manages.
pub const IRQ_COUNT: usize = 150;

/// Kernel thread priorities span 32 bands.
pub const THREAD_PRIORITY_MIN: i32 = -16;
pub const THREAD_PRIORITY_MAX: i32 = 15;
pub const THREAD_PRIORITY_LEVELS: usize =
    (THREAD_PRIORITY_MAX - THREAD_PRIORITY_MIN + 1) as usize;

pub const THREAD_DEFAULT_STACK_SIZE: usize = 4096;

/// Size of one block-cache buffer. Filesystem blocks of 512-4096 bytes are
/// packed into buffers of this size.
pub const BUFFER_BLOCK_SIZE: usize = 4096;

/// Number of buffers in the shared block-cache pool.
pub const BLOCK_CACHE_BUFFER_COUNT: usize = 32;

/// How many dirty buffers the flusher writes back per wakeup.
pub const BC_FLUSH_COUNT: usize = 4;

/// Cap on inodes kept alive in the cache after their last reference drops.
pub const MAX_INODE_CACHE_COUNT: usize = 128;

/// How long an unreferenced inode may linger before the sweep discards it.
pub const INODE_CACHE_IDLE_SECS: i64 = 1;

/// Message payloads up to this size are served from the pooled free list.
pub const MAX_CACHED_MESSAGE_SIZE: usize = 64;

/// Upper bound on pooled message buffers kept around.
pub const MAX_CACHED_MESSAGE_COUNT: usize = 100;
