// SPDX-License-Identifier: MPL-2.0

//! The IRQ dispatcher.
//!
//! One handler chain per vector. The first registration on a vector
//! programs its NVIC priority to the normal-latency band and enables it;
//! the last removal disables it. On entry, handlers run in registration
//! order until one reports [`IrqResult::Handled`]. Handlers run with
//! interrupts masked at their own priority: they must not block and may
//! only use the IRQ-safe forms of the wait primitives.

use core::sync::atomic::{AtomicI32, Ordering};

use pados_frame::arch;

use crate::config::IRQ_COUNT;
use crate::klog::{klog, KLogSeverity, LOG_CAT_IRQ};
use crate::prelude::*;
use crate::time;

/// NVIC priority programmed for dispatched vectors. Lower-latency bands are
/// reserved for handlers installed outside the dispatcher.
pub const IRQ_PRI_NORMAL_LATENCY: u8 = 0x80;

/// What a handler did with the interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqResult {
    Handled,
    Unhandled,
}

pub type IrqHandler = dyn Fn() -> IrqResult + Send + Sync;

struct IrqAction {
    handle: i32,
    handler: Box<IrqHandler>,
    /// Wall time spent in this handler.
    run_time: i64,
}

static IRQ_TABLE: SpinLock<BTreeMap<i32, Vec<IrqAction>>> = SpinLock::new(BTreeMap::new());
static NEXT_HANDLE: AtomicI32 = AtomicI32::new(1);
static TOTAL_IRQ_TIME: SpinLock<i64> = SpinLock::new(0);

/// Register `handler` on `irq`. Returns a handle for unregistration;
/// handles never repeat while the process runs.
pub fn register_irq_handler<F>(irq: i32, handler: F) -> Result<i32>
where
    F: Fn() -> IrqResult + Send + Sync + 'static,
{
    if !(0..IRQ_COUNT as i32).contains(&irq) {
        return Err(Error::with_message(
            ErrorCode::InvalidArgument,
            "irq number out of range",
        ));
    }
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    let mut table = IRQ_TABLE.lock_irq_disabled();
    let actions = table.entry(irq).or_insert_with(Vec::new);
    let first = actions.is_empty();
    actions.push(IrqAction {
        handle,
        handler: Box::new(handler),
        run_time: 0,
    });
    if first {
        arch::nvic_set_priority(irq as u32, IRQ_PRI_NORMAL_LATENCY);
        arch::nvic_enable_irq(irq as u32);
    }
    Ok(handle)
}

/// Remove the registration behind `handle`. Disables the vector when its
/// chain becomes empty.
pub fn unregister_irq_handler(irq: i32, handle: i32) -> Result<()> {
    if !(0..IRQ_COUNT as i32).contains(&irq) {
        return Err(Error::new(ErrorCode::InvalidArgument));
    }
    let mut table = IRQ_TABLE.lock_irq_disabled();
    let actions = table.get_mut(&irq).ok_or(Error::new(ErrorCode::NotFound))?;
    let pos = actions
        .iter()
        .position(|action| action.handle == handle)
        .ok_or(Error::new(ErrorCode::NotFound))?;
    actions.remove(pos);
    if actions.is_empty() {
        table.remove(&irq);
        arch::nvic_disable_irq(irq as u32);
    }
    Ok(())
}

/// Dispatch `irq`: invoke its handlers in registration order, stopping at
/// the first that handles it. Called from the vector entry stub; callable
/// directly to simulate an interrupt.
pub fn handle_irq(irq: i32) {
    let start = time::get_monotonic_time();
    let mut handled = false;
    {
        let mut table = IRQ_TABLE.lock_irq_disabled();
        let Some(actions) = table.get_mut(&irq) else {
            klog!(
                LOG_CAT_IRQ,
                KLogSeverity::Warning,
                "irq {}: no handler registered",
                irq
            );
            return;
        };
        for action in actions.iter_mut() {
            let action_start = time::get_monotonic_time();
            let result = (action.handler)();
            action.run_time += (time::get_monotonic_time() - action_start).nanos();
            if result == IrqResult::Handled {
                handled = true;
                break;
            }
        }
    }
    if !handled {
        klog!(
            LOG_CAT_IRQ,
            KLogSeverity::InfoHighVol,
            "irq {}: unhandled",
            irq
        );
    }
    *TOTAL_IRQ_TIME.lock_irq_disabled() += (time::get_monotonic_time() - start).nanos();
}

/// Wall time spent in IRQ handlers since boot.
pub fn total_irq_time() -> TimeValNanos {
    TimeValNanos::from_nanos(*TOTAL_IRQ_TIME.lock_irq_disabled())
}

/// Accumulated run time of one registration, for diagnostics.
pub fn irq_handler_run_time(irq: i32, handle: i32) -> Result<TimeValNanos> {
    let table = IRQ_TABLE.lock_irq_disabled();
    let actions = table.get(&irq).ok_or(Error::new(ErrorCode::NotFound))?;
    actions
        .iter()
        .find(|action| action.handle == handle)
        .map(|action| TimeValNanos::from_nanos(action.run_time))
        .ok_or(Error::new(ErrorCode::NotFound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;

    #[test]
    fn rejects_bad_vectors() {
        assert!(register_irq_handler(-1, || IrqResult::Handled).is_err());
        assert!(register_irq_handler(IRQ_COUNT as i32, || IrqResult::Handled).is_err());
        assert!(unregister_irq_handler(3, 123456).is_err());
    }

    #[test]
    fn dispatch_stops_at_the_first_handled() {
        const IRQ: i32 = 40;
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let observed = first.clone();
        let h1 = register_irq_handler(IRQ, move || {
            observed.fetch_add(1, Ordering::AcqRel);
            IrqResult::Handled
        })
        .unwrap();
        let observed = second.clone();
        let h2 = register_irq_handler(IRQ, move || {
            observed.fetch_add(1, Ordering::AcqRel);
            IrqResult::Handled
        })
        .unwrap();

        handle_irq(IRQ);
        assert_eq!(first.load(Ordering::Acquire), 1);
        assert_eq!(second.load(Ordering::Acquire), 0);

        unregister_irq_handler(IRQ, h1).unwrap();
        handle_irq(IRQ);
        assert_eq!(second.load(Ordering::Acquire), 1);
        unregister_irq_handler(IRQ, h2).unwrap();
    }

    #[test]
    fn unhandled_results_fall_through_the_chain() {
        const IRQ: i32 = 41;
        let hits = Arc::new(AtomicU32::new(0));
        let observed = hits.clone();
        let h1 = register_irq_handler(IRQ, move || {
            observed.fetch_add(1, Ordering::AcqRel);
            IrqResult::Unhandled
        })
        .unwrap();
        let observed = hits.clone();
        let h2 = register_irq_handler(IRQ, move || {
            observed.fetch_add(1, Ordering::AcqRel);
            IrqResult::Handled
        })
        .unwrap();

        handle_irq(IRQ);
        assert_eq!(hits.load(Ordering::Acquire), 2);
        unregister_irq_handler(IRQ, h1).unwrap();
        unregister_irq_handler(IRQ, h2).unwrap();
    }

    #[test]
    fn vector_enable_follows_first_and_last_registration() {
        const IRQ: i32 = 42;
        assert!(!pados_frame::arch::nvic_irq_enabled(IRQ as u32));
        let h1 = register_irq_handler(IRQ, || IrqResult::Unhandled).unwrap();
        let h2 = register_irq_handler(IRQ, || IrqResult::Unhandled).unwrap();
        assert!(pados_frame::arch::nvic_irq_enabled(IRQ as u32));
        unregister_irq_handler(IRQ, h1).unwrap();
        assert!(pados_frame::arch::nvic_irq_enabled(IRQ as u32));
        unregister_irq_handler(IRQ, h2).unwrap();
        assert!(!pados_frame::arch::nvic_irq_enabled(IRQ as u32));
    }

    #[test]
    fn handler_time_is_accounted() {
        const IRQ: i32 = 43;
        let handle = register_irq_handler(IRQ, || IrqResult::Handled).unwrap();
        handle_irq(IRQ);
        assert!(irq_handler_run_time(IRQ, handle).unwrap() >= TimeValNanos::zero());
        unregister_irq_handler(IRQ, handle).unwrap();
        assert!(irq_handler_run_time(IRQ, handle).is_err());
    }
}
