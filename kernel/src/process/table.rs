//! Fixed-size process table and lifecycle operations.

extern crate alloc;

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::pcb::{Process, ProcessId, ProcessState};
use crate::{
    error::{KernelError, KernelResult},
    sync::once_lock::GlobalState,
};

pub const MAX_PROCESSES: usize = 16;

struct ProcessTable {
    slots: [Option<Box<Process>>; MAX_PROCESSES],
}

impl ProcessTable {
    fn new() -> Self {
        Self {
            slots: [const { None }; MAX_PROCESSES],
        }
    }

    fn find_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn index_of(&self, pid: ProcessId) -> Option<usize> {
        self.slots
            .iter()
            .position(|p| p.as_ref().is_some_and(|p| p.pid == pid))
    }
}

static TABLE: GlobalState<Mutex<ProcessTable>> = GlobalState::new();
static NEXT_PID: AtomicU64 = AtomicU64::new(1);

pub fn init() {
    TABLE.init(Mutex::new(ProcessTable::new())).ok();
}

/// Create a process with `entry` as its first instruction and `arg` passed
/// in `x0`. Returns the new process's id.
pub fn spawn(
    name: &'static str,
    entry: usize,
    arg: u64,
    parent: Option<ProcessId>,
) -> KernelResult<ProcessId> {
    TABLE
        .with_mut(|mtx| {
            let mut table = mtx.lock();
            let slot = table.find_free_slot().ok_or(KernelError::ResourceExhausted {
                resource: "process table",
            })?;

            let pid = ProcessId(NEXT_PID.fetch_add(1, Ordering::Relaxed));
            let now = crate::arch::get_ticks();
            table.slots[slot] = Some(Box::new(Process::new(pid, parent, name, entry, arg, now)));

            if let Some(parent_pid) = parent {
                if let Some(idx) = table.index_of(parent_pid) {
                    table.slots[idx].as_ref().unwrap().add_child(pid);
                }
            }

            log::info!("process {} ({}) created", pid, name);
            Ok(pid)
        })
        .unwrap_or(Err(KernelError::NotInitialized {
            subsystem: "process table",
        }))
}

/// Mark every living descendant of `pid` (children, grandchildren, ...)
/// Zombie with `code`. Walks the whole subtree, not just direct children.
fn zombify_descendants(table: &ProcessTable, pid: ProcessId, code: u32) {
    let Some(idx) = table.index_of(pid) else {
        return;
    };
    let children = table.slots[idx].as_ref().unwrap().children();
    for child in children {
        if let Some(child_idx) = table.index_of(child) {
            let child_proc = table.slots[child_idx].as_ref().unwrap();
            if !matches!(child_proc.state(), ProcessState::Zombie | ProcessState::Dead) {
                child_proc.set_exit_code(code);
                child_proc.set_state(ProcessState::Zombie);
            }
        }
        zombify_descendants(table, child, code);
    }
}

/// Mark `pid` a zombie with `code`, then cascade the same exit through
/// every descendant -- children, grandchildren, and so on.
pub fn exit(pid: ProcessId, code: u32) -> KernelResult<()> {
    TABLE
        .with_mut(|mtx| {
            let mut table = mtx.lock();
            let idx = table
                .index_of(pid)
                .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;

            table.slots[idx].as_ref().unwrap().set_exit_code(code);
            table.slots[idx]
                .as_ref()
                .unwrap()
                .set_state(ProcessState::Zombie);

            zombify_descendants(&table, pid, code);
            Ok(())
        })
        .unwrap_or(Err(KernelError::NotInitialized {
            subsystem: "process table",
        }))
}

/// Free `pid`'s slot and the slot of every living descendant, recursively.
/// Unlike [`exit`], this frees immediately rather than leaving a Zombie for
/// [`reap_zombies`] to collect later.
fn free_subtree(table: &mut ProcessTable, pid: ProcessId) {
    let Some(idx) = table.index_of(pid) else {
        return;
    };
    let children = table.slots[idx].as_ref().unwrap().children();
    for child in children {
        free_subtree(table, child);
    }
    if let Some(idx) = table.index_of(pid) {
        table.slots[idx] = None;
    }
}

/// Kill `pid` outright: refuses to kill the currently running process (use
/// [`exit`] instead) and refuses non-existent identifiers. Otherwise
/// cascade-kills every descendant, freeing each one's stack and marking its
/// slot FREE immediately.
pub fn kill(pid: ProcessId) -> KernelResult<()> {
    TABLE
        .with_mut(|mtx| {
            let mut table = mtx.lock();
            table
                .index_of(pid)
                .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;

            if pid == crate::sched::current_pid() {
                return Err(KernelError::InvalidState {
                    expected: "not the currently running process",
                    actual: "currently running process",
                });
            }

            free_subtree(&mut table, pid);
            Ok(())
        })
        .unwrap_or(Err(KernelError::NotInitialized {
            subsystem: "process table",
        }))
}

/// Free the table slots of every zombie process. Returns the number reaped.
pub fn reap_zombies() -> usize {
    TABLE
        .with_mut(|mtx| {
            let mut table = mtx.lock();
            let mut reaped = 0;
            for slot in table.slots.iter_mut() {
                if slot.as_ref().is_some_and(|p| p.state() == ProcessState::Zombie) {
                    *slot = None;
                    reaped += 1;
                }
            }
            reaped
        })
        .unwrap_or(0)
}

pub fn set_state(pid: ProcessId, state: ProcessState) {
    TABLE.with_mut(|mtx| {
        let table = mtx.lock();
        if let Some(idx) = table.index_of(pid) {
            table.slots[idx].as_ref().unwrap().set_state(state);
        }
    });
}

pub fn saved_sp(pid: ProcessId) -> Option<u64> {
    TABLE
        .with(|mtx| {
            let table = mtx.lock();
            table
                .index_of(pid)
                .map(|idx| table.slots[idx].as_ref().unwrap().saved_sp())
        })
        .flatten()
}

pub fn set_saved_sp(pid: ProcessId, sp: u64) {
    TABLE.with_mut(|mtx| {
        let table = mtx.lock();
        if let Some(idx) = table.index_of(pid) {
            table.slots[idx].as_ref().unwrap().set_saved_sp(sp);
        }
    });
}

pub fn bump_cpu_time(pid: ProcessId) {
    TABLE.with_mut(|mtx| {
        let table = mtx.lock();
        if let Some(idx) = table.index_of(pid) {
            table.slots[idx].as_ref().unwrap().bump_cpu_time();
        }
    });
}

/// Ids of every runnable process, in table order, starting just after
/// `after` and wrapping around -- the order [`crate::sched`] round-robins
/// through.
pub fn ready_pids_after(after: ProcessId) -> alloc::vec::Vec<ProcessId> {
    TABLE
        .with(|mtx| {
            let table = mtx.lock();
            let start = table.index_of(after).map(|i| i + 1).unwrap_or(0);
            let mut out = alloc::vec::Vec::new();
            for offset in 0..MAX_PROCESSES {
                let idx = (start + offset) % MAX_PROCESSES;
                if let Some(p) = table.slots[idx].as_ref() {
                    if matches!(p.state(), ProcessState::Ready | ProcessState::Running) {
                        out.push(p.pid);
                    }
                }
            }
            out
        })
        .unwrap_or_default()
}

pub fn count() -> usize {
    TABLE
        .with(|mtx| mtx.lock().slots.iter().filter(|s| s.is_some()).count())
        .unwrap_or(0)
}

pub fn exists(pid: ProcessId) -> bool {
    TABLE
        .with(|mtx| mtx.lock().index_of(pid).is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_entry() {}

    #[test]
    fn spawn_and_exit_cascades_to_children() {
        init();
        let parent = spawn("parent", dummy_entry as usize, 0, None).unwrap();
        let child = spawn("child", dummy_entry as usize, 0, Some(parent)).unwrap();

        exit(parent, 7).unwrap();

        assert!(saved_sp(parent).is_some());
        assert!(saved_sp(child).is_some());
        assert!(reap_zombies() >= 1);
    }

    #[test]
    fn table_rejects_beyond_capacity() {
        init();
        for _ in 0..MAX_PROCESSES {
            let _ = spawn("p", dummy_entry as usize, 0, None);
        }
        assert!(spawn("overflow", dummy_entry as usize, 0, None).is_err());
    }

    #[test]
    fn exit_cascades_through_grandchildren() {
        init();
        let a = spawn("a", dummy_entry as usize, 0, None).unwrap();
        let b = spawn("b", dummy_entry as usize, 0, Some(a)).unwrap();
        let c = spawn("c", dummy_entry as usize, 0, Some(a)).unwrap();
        let d = spawn("d", dummy_entry as usize, 0, Some(b)).unwrap();

        exit(a, 0).unwrap();

        // All four are Zombie (still present, not yet reaped) immediately
        // after exit -- the cascade must have reached d, a's grandchild.
        for pid in [a, b, c, d] {
            assert!(exists(pid));
        }
        assert_eq!(reap_zombies(), 4);
        for pid in [a, b, c, d] {
            assert!(!exists(pid));
        }
    }

    #[test]
    fn kill_refuses_running_process() {
        init();
        crate::sched::init();
        let pid = spawn("p", dummy_entry as usize, 0, None).unwrap();

        // Drive the scheduler's "current" pointer onto `pid` the same way
        // the timer IRQ path would, rather than poking scheduler internals.
        crate::sched::yield_now();
        crate::sched::on_timer_tick(0);
        assert_eq!(crate::sched::current_pid(), pid);

        assert!(kill(pid).is_err());
    }

    #[test]
    fn kill_refuses_nonexistent_pid() {
        init();
        assert!(kill(ProcessId(0xdead)).is_err());
    }

    #[test]
    fn kill_cascades_and_frees_immediately() {
        init();
        let a = spawn("a", dummy_entry as usize, 0, None).unwrap();
        let b = spawn("b", dummy_entry as usize, 0, Some(a)).unwrap();
        let c = spawn("c", dummy_entry as usize, 0, Some(a)).unwrap();
        let d = spawn("d", dummy_entry as usize, 0, Some(b)).unwrap();

        kill(a).unwrap();

        assert!(!exists(a));
        assert!(!exists(b));
        assert!(!exists(c));
        assert!(!exists(d));
    }
}
