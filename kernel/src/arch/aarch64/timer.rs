//! AArch64 generic timer, configured for a 10ms tick.

use core::sync::atomic::{AtomicU64, Ordering};

static TICKS: AtomicU64 = AtomicU64::new(0);

pub const TICK_INTERVAL_MS: u32 = 10;

pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Wall-clock seconds since boot, derived from the tick counter. There is no
/// RTC on the QEMU `virt` machine this kernel targets, so this is the only
/// notion of "time" filesystem metadata can record.
pub fn get_timestamp_secs() -> u64 {
    (get_ticks() * TICK_INTERVAL_MS as u64) / 1000
}

/// Re-arm the timer for the next tick and bump the tick counter. Called from
/// `irq::dispatch` when the physical timer PPI fires.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    rearm();
}

fn rearm() {
    // SAFETY: CNTP_TVAL_EL0/CNTP_CTL_EL0 are the EL1-accessible generic timer
    // registers; writing them only affects this CPU's timer.
    unsafe {
        let cntfrq: u64;
        core::arch::asm!("mrs {0}, CNTFRQ_EL0", out(reg) cntfrq);
        let tval = (cntfrq * TICK_INTERVAL_MS as u64) / 1000;
        core::arch::asm!("msr CNTP_TVAL_EL0, {0}", in(reg) tval);
    }
}

/// Arm the generic timer for periodic `TICK_INTERVAL_MS` interrupts and
/// enable it. The timer PPI (id 30) must already be enabled at the GIC.
pub fn setup() {
    rearm();
    // SAFETY: enables the physical timer comparator (bit 0 of CNTP_CTL_EL0).
    unsafe {
        core::arch::asm!("msr CNTP_CTL_EL0, {0}", in(reg) 1u64);
    }
    log::info!("generic timer armed for {}ms ticks", TICK_INTERVAL_MS);
}
