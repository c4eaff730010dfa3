//! Process Control Block.

extern crate alloc;

use alloc::{boxed::Box, vec::Vec};
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use spin::Mutex;

use crate::arch::aarch64::context::Context;

/// Each process gets a private kernel stack; its saved register frame lives
/// at the top of it whenever the process isn't the one currently running.
pub const KERNEL_STACK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready = 0,
    Running = 1,
    Blocked = 2,
    Zombie = 3,
    Dead = 4,
}

impl ProcessState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Blocked,
            3 => Self::Zombie,
            _ => Self::Dead,
        }
    }
}

/// A process. KikiOS has no threads, no per-process address space, and no
/// capability space of its own -- every process shares the kernel's single
/// address space and calls into [`crate::kapi`] directly.
pub struct Process {
    pub pid: ProcessId,
    pub parent: Option<ProcessId>,
    pub name: &'static str,
    state: AtomicU8,
    children: Mutex<Vec<ProcessId>>,
    exit_code: AtomicU32,
    cpu_time_ticks: AtomicU64,
    created_at: u64,
    stack: Box<[u8; KERNEL_STACK_SIZE]>,
    /// Stack pointer to resume from -- points at a [`Context`] frame sitting
    /// at the top of `stack`.
    saved_sp: AtomicU64,
}

impl Process {
    pub fn new(pid: ProcessId, parent: Option<ProcessId>, name: &'static str, entry: usize, arg: u64, now: u64) -> Self {
        let mut stack = Box::new([0u8; KERNEL_STACK_SIZE]);
        let saved_sp = Context::init_stack(stack.as_mut_slice(), entry, arg) as u64;

        Self {
            pid,
            parent,
            name,
            state: AtomicU8::new(ProcessState::Ready as u8),
            children: Mutex::new(Vec::new()),
            exit_code: AtomicU32::new(0),
            cpu_time_ticks: AtomicU64::new(0),
            created_at: now,
            stack,
            saved_sp: AtomicU64::new(saved_sp),
        }
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn saved_sp(&self) -> u64 {
        self.saved_sp.load(Ordering::Acquire)
    }

    pub fn set_saved_sp(&self, sp: u64) {
        self.saved_sp.store(sp, Ordering::Release);
    }

    pub fn exit_code(&self) -> u32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub fn set_exit_code(&self, code: u32) {
        self.exit_code.store(code, Ordering::Release);
    }

    pub fn bump_cpu_time(&self) {
        self.cpu_time_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cpu_time_ticks(&self) -> u64 {
        self.cpu_time_ticks.load(Ordering::Relaxed)
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn add_child(&self, pid: ProcessId) {
        self.children.lock().push(pid);
    }

    pub fn children(&self) -> Vec<ProcessId> {
        self.children.lock().clone()
    }

    /// True if `self`'s stack still contains `sp` -- used to sanity-check a
    /// frame pointer handed back from an interrupt before trusting it.
    pub fn owns_sp(&self, sp: u64) -> bool {
        let base = self.stack.as_ptr() as u64;
        sp >= base && sp < base + KERNEL_STACK_SIZE as u64
    }
}
