// SPDX-License-Identifier: MPL-2.0

//! ARMv7-M (Cortex-M4/M7) backend.
//!
//! Interrupts are masked through PRIMASK, context switches run in the PendSV
//! handler at the lowest exception priority, and the monotonic clock is
//! advanced by the SysTick tick. The PendSV handler saves the outgoing
//! thread's high registers on its process stack and asks the kernel for the
//! next stack pointer through `pados_switch_context`.

use core::arch::{asm, global_asm};
use core::marker::PhantomData;
use core::sync::atomic::{compiler_fence, Ordering};

const SCB_ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
const ICSR_PENDSVSET: u32 = 1 << 28;

const NVIC_ISER: *mut u32 = 0xE000_E100 as *mut u32;
const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
const NVIC_IPR: *mut u8 = 0xE000_E400 as *mut u8;

/// A guard for disabled local IRQs. Nestable; the outermost guard restores
/// the previous PRIMASK state.
pub struct IrqGuard {
    was_enabled: bool,
    _not_send: PhantomData<*mut ()>,
}

#[must_use]
pub fn disable_interrupts() -> IrqGuard {
    let primask: u32;
    unsafe {
        asm!("mrs {}, PRIMASK", out(reg) primask, options(nomem, nostack));
        asm!("cpsid i", options(nomem, nostack));
    }
    compiler_fence(Ordering::SeqCst);
    IrqGuard {
        was_enabled: primask & 1 == 0,
        _not_send: PhantomData,
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        compiler_fence(Ordering::SeqCst);
        if self.was_enabled {
            unsafe { asm!("cpsie i", options(nomem, nostack)) };
        }
    }
}

pub fn interrupts_disabled() -> bool {
    let primask: u32;
    unsafe { asm!("mrs {}, PRIMASK", out(reg) primask, options(nomem, nostack)) };
    primask & 1 != 0
}

pub fn nvic_enable_irq(irq: u32) {
    unsafe {
        NVIC_ISER
            .add((irq / 32) as usize)
            .write_volatile(1 << (irq % 32));
    }
}

pub fn nvic_disable_irq(irq: u32) {
    unsafe {
        NVIC_ICER
            .add((irq / 32) as usize)
            .write_volatile(1 << (irq % 32));
    }
}

pub fn nvic_set_priority(irq: u32, priority: u8) {
    unsafe { NVIC_IPR.add(irq as usize).write_volatile(priority) };
}

pub fn nvic_irq_enabled(irq: u32) -> bool {
    unsafe { NVIC_ISER.add((irq / 32) as usize).read_volatile() & (1 << (irq % 32)) != 0 }
}

/// Request a context switch. Takes effect when the current exception (if
/// any) returns and interrupts are enabled.
pub fn trigger_reschedule() {
    unsafe { SCB_ICSR.write_volatile(ICSR_PENDSVSET) };
}

/// Sleep until the next interrupt.
pub fn wait_for_interrupt() {
    unsafe { asm!("wfi", options(nomem, nostack)) };
}

/// The part of a thread's register state that the PendSV handler saves and
/// restores manually; the rest is stacked by exception entry.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskContext {
    /// Process stack pointer after the r4-r11 frame has been pushed.
    pub sp: usize,
}

extern "C" {
    /// Provided by the kernel scheduler: given the outgoing thread's saved
    /// stack pointer, account the switch and return the incoming thread's.
    fn pados_switch_context(current_sp: usize) -> usize;
}

global_asm!(
    r#"
    .syntax unified
    .section .text.PendSV_Handler
    .global PendSV_Handler
    .type PendSV_Handler, %function
    .thumb_func
PendSV_Handler:
    mrs r0, psp
    tst lr, #0x10
    it eq
    vstmdbeq r0!, {{s16-s31}}
    stmdb r0!, {{r4-r11, lr}}
    bl pados_switch_context
    ldmia r0!, {{r4-r11, lr}}
    tst lr, #0x10
    it eq
    vldmiaeq r0!, {{s16-s31}}
    msr psp, r0
    bx lr
    .size PendSV_Handler, . - PendSV_Handler
"#
);

/// Lay out the initial exception frame on a fresh stack so that the first
/// switch "returns" into `entry` in thread mode using the process stack.
///
/// # Safety
///
/// `stack_top` must point one-past-the-end of a writable stack region of at
/// least 32 words.
pub unsafe fn init_task_stack(stack_top: *mut usize, entry: usize, arg: usize) -> TaskContext {
    let mut sp = stack_top;
    // Hardware-stacked frame: xPSR, PC, LR, R12, R3-R0.
    sp = sp.sub(8);
    sp.add(7).write(0x0100_0000); // xPSR: Thumb bit
    sp.add(6).write(entry | 1);
    sp.add(5).write(0); // LR: threads never return past their entry
    sp.write(arg); // R0
    // Software-stacked frame: LR(exception), R4-R11.
    sp = sp.sub(9);
    sp.write(0xFFFF_FFFD); // EXC_RETURN: thread mode, PSP, no FP state
    TaskContext { sp: sp as usize }
}

static TICKS: spin::Mutex<i64> = spin::Mutex::new(0);

/// Advance the monotonic clock. Called from the SysTick handler.
pub fn tick_advance(ns: i64) {
    *TICKS.lock() += ns;
}

/// Nanoseconds on the monotonic clock since boot.
pub fn monotonic_ns() -> i64 {
    *TICKS.lock()
}
