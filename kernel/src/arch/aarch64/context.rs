//! AArch64 task context.
//!
//! Every process owns a private kernel stack (`process::KERNEL_STACK_SIZE`
//! bytes). A process that is not currently running has a `Context` frame
//! sitting at the top of that stack -- either because it was preempted
//! (pushed there by `exceptions.S`'s `SAVE_FRAME`) or because it has never
//! run yet and [`Context::init_stack`] built one by hand. `saved_sp` always
//! points at that frame. Switching tasks is therefore just "change which
//! stack `sp` points into" -- see `kikios_irq_handler` below and
//! `sched::schedule`.

use core::arch::global_asm;

use crate::error::KernelResult;

global_asm!(include_str!("exceptions.S"));

extern "C" {
    static vector_table_el1: u8;
}

/// Saved register frame, laid out to match `exceptions.S`'s `SAVE_FRAME` /
/// `RESTORE_FRAME` macros exactly: x0-x30 (31 regs), elr_el1, the
/// interrupted sp, spsr_el1.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub x: [u64; 31],
    pub elr: u64,
    pub sp: u64,
    pub spsr: u64,
}

/// EL1h, all DAIF bits clear (interrupts enabled). KikiOS never runs at EL0.
const SPSR_EL1H_IRQS_ON: u64 = 0x3c5;

impl Context {
    /// Build the initial frame for a process that has never run, at the top
    /// of `stack`. Returns the resulting stack pointer to store as the
    /// process's `saved_sp`.
    ///
    /// `entry` is called with `arg` in `x0`, matching the AAPCS64 first
    /// integer argument register, so a freshly scheduled process starts in
    /// its entry function with its argument already in place.
    pub fn init_stack(stack: &mut [u8], entry: usize, arg: u64) -> usize {
        let frame_addr = (stack.as_mut_ptr() as usize + stack.len() - core::mem::size_of::<Self>())
            & !0xf;
        // SAFETY: frame_addr is within `stack` (stack.len() >= size_of::<Context>()
        // is an invariant of the fixed-size stack arrays in `process`), 16-byte
        // aligned, and not aliased -- the stack belongs to a process that has
        // not started running.
        let frame = unsafe { &mut *(frame_addr as *mut Context) };
        frame.x = [0; 31];
        frame.x[0] = arg;
        frame.elr = entry as u64;
        frame.sp = frame_addr as u64 + core::mem::size_of::<Self>() as u64;
        frame.spsr = SPSR_EL1H_IRQS_ON;
        frame_addr
    }
}

/// Install the exception vector table. Must run once per CPU before
/// enabling IRQs.
pub fn init_vectors() {
    // SAFETY: vector_table_el1 is a 2KiB-aligned symbol defined in
    // exceptions.S; VBAR_EL1 requires exactly that alignment. Writing it is
    // only valid at EL1, which is where this kernel always runs.
    unsafe {
        let addr = &vector_table_el1 as *const u8 as u64;
        core::arch::asm!("msr vbar_el1, {0}", "isb", in(reg) addr);
    }
}

/// Called from `exceptions.S` on every IRQ. `frame` points at the just-saved
/// register state of whatever was running. Returns the frame to resume --
/// the same one if no reschedule is needed, or a different task's saved
/// frame if the scheduler switched.
#[no_mangle]
extern "C" fn kikios_irq_handler(frame: *mut Context) -> *mut Context {
    if let Some(irq) = crate::arch::aarch64::gic::handle_irq() {
        crate::irq::dispatch(irq);
        crate::arch::aarch64::gic::eoi(irq);
    }

    match crate::sched::on_timer_tick(frame as u64) {
        Some(next_sp) => next_sp as *mut Context,
        None => frame,
    }
}

#[no_mangle]
extern "C" fn kikios_sync_handler(frame: *mut Context) -> *mut Context {
    // SAFETY: frame was just built by SAVE_FRAME and is a valid Context.
    let f = unsafe { &*frame };
    log::error!(
        "unhandled synchronous exception at elr=0x{:x} spsr=0x{:x}",
        f.elr,
        f.spsr
    );
    frame
}

/// Read the exception syndrome register, useful for diagnosing a
/// synchronous exception before it is handled.
#[allow(dead_code)]
pub fn read_esr() -> u64 {
    let esr: u64;
    // SAFETY: reading ESR_EL1 has no side effects and is valid at EL1.
    unsafe {
        core::arch::asm!("mrs {0}, esr_el1", out(reg) esr);
    }
    esr
}

pub fn init_fpu() -> KernelResult<()> {
    // SAFETY: CPACR_EL1 FPEN=0b11 enables FP/SIMD access from EL1 without
    // trapping. No concurrent access: called once during per-CPU init.
    unsafe {
        core::arch::asm!(
            "mrs {tmp}, CPACR_EL1",
            "orr {tmp}, {tmp}, #(0x3 << 20)",
            "msr CPACR_EL1, {tmp}",
            "isb",
            tmp = out(reg) _,
        );
    }
    Ok(())
}
