//! Process management.
//!
//! A process here is nothing more than a kernel stack, a saved register
//! frame, and some bookkeeping -- no threads, no private address space, no
//! capability space. The table is fixed-size ([`table::MAX_PROCESSES`]
//! slots); [`crate::sched`] round-robins across whatever is runnable in it.

pub mod pcb;
pub mod table;

pub use pcb::{Process, ProcessId, ProcessState};
pub use table::MAX_PROCESSES;

pub fn init() {
    table::init();
    log::info!("process table initialized ({} slots)", MAX_PROCESSES);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy() {}

    #[test]
    fn spawned_process_is_ready() {
        table::init();
        let pid = table::spawn("t", dummy as usize, 0, None).unwrap();
        assert!(table::exists(pid));
    }
}
