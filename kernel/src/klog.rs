// SPDX-License-Identifier: MPL-2.0

//! Per-category kernel log filtering in front of the `log` facade.
//!
//! Subsystems register a category once at init and gate their high-volume
//! logging on it, so a single noisy subsystem can be silenced at runtime
//! without rebuilding.

use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KLogSeverity {
    InfoHighVol,
    Info,
    Warning,
    Error,
    Critical,
    None,
}

pub const LOG_CAT_GENERAL: &str = "kernel";
pub const LOG_CAT_SCHEDULER: &str = "scheduler";
pub const LOG_CAT_VFS: &str = "vfs";
pub const LOG_CAT_BLOCK_CACHE: &str = "block_cache";
pub const LOG_CAT_IRQ: &str = "irq";

static LOG_LEVELS: SpinLock<BTreeMap<&'static str, KLogSeverity>> =
    SpinLock::new(BTreeMap::new());

pub fn register_category(category: &'static str, initial_level: KLogSeverity) {
    LOG_LEVELS.lock().insert(category, initial_level);
}

pub fn set_category_log_level(category: &'static str, level: KLogSeverity) {
    let mut levels = LOG_LEVELS.lock();
    if let Some(entry) = levels.get_mut(category) {
        *entry = level;
    } else {
        error!("klog: unknown log category {:?}", category);
    }
}

pub fn is_category_active(category: &str, level: KLogSeverity) -> bool {
    match LOG_LEVELS.lock().get(category) {
        Some(current) => level >= *current,
        None => true,
    }
}

pub(crate) fn register_default_categories() {
    register_category(LOG_CAT_GENERAL, KLogSeverity::Info);
    register_category(LOG_CAT_SCHEDULER, KLogSeverity::Warning);
    register_category(LOG_CAT_VFS, KLogSeverity::Warning);
    register_category(LOG_CAT_BLOCK_CACHE, KLogSeverity::Warning);
    register_category(LOG_CAT_IRQ, KLogSeverity::Warning);
}

/// Log through the facade if `category` is enabled at `severity`.
macro_rules! klog {
    ($category:expr, $severity:expr, $($arg:tt)+) => {{
        if $crate::klog::is_category_active($category, $severity) {
            match $severity {
                $crate::klog::KLogSeverity::InfoHighVol => {
                    log::debug!(target: $category, $($arg)+)
                }
                $crate::klog::KLogSeverity::Info => log::info!(target: $category, $($arg)+),
                $crate::klog::KLogSeverity::Warning => log::warn!(target: $category, $($arg)+),
                _ => log::error!(target: $category, $($arg)+),
            }
        }
    }};
}

pub(crate) use klog;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_filtering() {
        register_category("klog_test", KLogSeverity::Warning);
        assert!(!is_category_active("klog_test", KLogSeverity::Info));
        assert!(is_category_active("klog_test", KLogSeverity::Error));
        set_category_log_level("klog_test", KLogSeverity::InfoHighVol);
        assert!(is_category_active("klog_test", KLogSeverity::Info));
    }
}
