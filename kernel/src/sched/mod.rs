//! Round-robin scheduler.
//!
//! Every [`TICK_QUANTUM`] timer ticks (200ms at the 10ms tick rate the
//! generic timer is armed for), [`on_timer_tick`] picks the next runnable
//! process after the current one in table order and hands back its saved
//! stack pointer. [`crate::arch::aarch64::context::kikios_irq_handler`]
//! switches to it by returning that pointer as the frame to `eret` from.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::process::{table, ProcessId, ProcessState};

/// Ticks a process runs before being preempted.
pub const TICK_QUANTUM: u64 = 20;

static TICKS_IN_QUANTUM: AtomicU64 = AtomicU64::new(0);
static CURRENT: AtomicUsize = AtomicUsize::new(0);

pub fn init() {
    TICKS_IN_QUANTUM.store(0, Ordering::Relaxed);
    CURRENT.store(0, Ordering::Relaxed);
    log::info!("scheduler initialized: round-robin, {TICK_QUANTUM}-tick quantum");
}

/// The process the timer IRQ path last switched to. Used by
/// [`crate::process::table::kill`] to refuse killing the running process.
pub fn current_pid() -> ProcessId {
    ProcessId(CURRENT.load(Ordering::Relaxed) as u64)
}

/// Called on every timer tick with the interrupted process's just-saved
/// frame pointer. Returns `Some(next_sp)` when a different process should
/// run, `None` to resume whatever was running.
pub fn on_timer_tick(current_sp: u64) -> Option<u64> {
    let cur = current_pid();
    if table::exists(cur) {
        table::set_saved_sp(cur, current_sp);
        table::bump_cpu_time(cur);
    }

    if TICKS_IN_QUANTUM.fetch_add(1, Ordering::Relaxed) + 1 < TICK_QUANTUM {
        return None;
    }
    TICKS_IN_QUANTUM.store(0, Ordering::Relaxed);

    reap_and_pick(cur)
}

fn reap_and_pick(cur: ProcessId) -> Option<u64> {
    table::reap_zombies();

    let candidates = table::ready_pids_after(cur);
    let next = candidates.first().copied()?;

    if next == cur {
        return None;
    }

    if table::exists(cur) {
        table::set_state(cur, ProcessState::Ready);
    }
    table::set_state(next, ProcessState::Running);
    CURRENT.store(next.0 as usize, Ordering::Relaxed);

    table::saved_sp(next)
}

/// Voluntarily give up the remainder of the current quantum.
pub fn yield_now() {
    TICKS_IN_QUANTUM.store(TICK_QUANTUM, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy() {}

    #[test]
    fn round_robins_between_two_processes() {
        crate::process::table::init();
        init();
        let a = table::spawn("a", dummy as usize, 0, None).unwrap();
        let b = table::spawn("b", dummy as usize, 0, None).unwrap();
        CURRENT.store(a.0 as usize, Ordering::Relaxed);
        table::set_state(a, ProcessState::Running);

        let mut switched = false;
        for _ in 0..TICK_QUANTUM {
            if on_timer_tick(0).is_some() {
                switched = true;
            }
        }
        assert!(switched);
        assert_eq!(current_pid(), b);
    }
}
