//! Kernel boot sequence.
//!
//! Brings every subsystem up in dependency order, loads the boot target
//! named in `/etc/boot.cfg` as the first process, then hands off to the
//! scheduler. There is no userspace transition in the x86/ring sense --
//! the first process runs at the same privilege level as this code, so
//! "transition" here just means arming the timer and returning to an idle
//! loop that the timer IRQ preempts out of.

extern crate alloc;

use alloc::string::String;

use crate::{arch, boot_cfg::BootConfig, console, drivers, elf, error::KernelResult, fs, irq, kapi, mm, net, process, sched};

/// Path read at boot for the `root=`/`init=` pair. Absence of the file
/// itself isn't fatal -- [`default_init_path`] is used instead.
const BOOT_CFG_PATH: &str = "/etc/boot.cfg";
const DEFAULT_INIT_PATH: &str = "/bin/splash";

/// Bring every subsystem up in the order each one's `init` depends on:
/// the heap before anything that allocates, the VFS before boot.cfg can be
/// read, the capability table only after the pieces it publishes pointers
/// to (`console`, `fs`) are already up.
pub fn kernel_init() -> KernelResult<()> {
    crate::println!("[BOOTSTRAP] stage 1: architecture init");
    arch::init();

    crate::println!("[BOOTSTRAP] stage 2: memory management");
    mm::init();

    crate::println!("[BOOTSTRAP] stage 3: interrupts and drivers");
    irq::init()?;
    drivers::init();

    crate::println!("[BOOTSTRAP] stage 4: filesystem and network");
    fs::init();
    net::init()?;

    crate::println!("[BOOTSTRAP] stage 5: console and capability table");
    console::init();
    kapi::init();

    crate::println!("[BOOTSTRAP] stage 6: process table and scheduler");
    process::init();
    sched::init();

    crate::println!("[BOOTSTRAP] boot sequence complete");
    Ok(())
}

/// Read `/etc/boot.cfg`'s `init=` entry, falling back to
/// [`DEFAULT_INIT_PATH`] if the file is missing or silent on it.
fn init_path() -> String {
    match fs::read_file(BOOT_CFG_PATH) {
        Ok(bytes) => match core::str::from_utf8(&bytes) {
            Ok(text) => match BootConfig::parse(text) {
                Ok(cfg) => cfg.get("init").map(String::from).unwrap_or_else(|| DEFAULT_INIT_PATH.into()),
                Err(_) => DEFAULT_INIT_PATH.into(),
            },
            Err(_) => DEFAULT_INIT_PATH.into(),
        },
        Err(_) => DEFAULT_INIT_PATH.into(),
    }
}

/// Load the boot target and spawn it as the first process. `ET_EXEC`
/// binaries load at their own absolute addresses; a leaked heap buffer
/// stands in for a real loader-reserved region since there's no frame
/// allocator to ask for one.
fn create_init_process() -> KernelResult<()> {
    let path = init_path();
    let image = fs::read_file(&path)?;
    let loaded = elf::load(&image, 0)?;

    process::table::spawn("init", loaded.entry as usize, 0, None)?;
    crate::println!("[BOOTSTRAP] init process spawned: {path} (entry {:#x})", loaded.entry);
    Ok(())
}

/// Bring the kernel up and start the first process, then fall into the
/// idle loop: every iteration drains the network RX ring and reaps exited
/// processes, and the timer IRQ is what actually switches between
/// processes (see [`crate::sched::on_timer_tick`]).
pub fn run() -> ! {
    kernel_init().expect("kernel_init must succeed");

    if let Err(e) = create_init_process() {
        log::warn!("no init process started: {e}");
    }

    loop {
        net::poll();
        process::table::reap_zombies();
        arch::aarch64::wait_for_event();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_boot_cfg_falls_back_to_default_init() {
        fs::init();
        assert_eq!(init_path(), DEFAULT_INIT_PATH);
    }

    #[test]
    fn boot_cfg_init_entry_overrides_default() {
        fs::init();
        fs::write_file("/etc/boot.cfg", b"init=/bin/shell\n").unwrap();
        assert_eq!(init_path(), "/bin/shell");
    }

    #[test]
    fn create_init_process_reports_missing_binary() {
        fs::init();
        assert!(create_init_process().is_err());
    }
}
