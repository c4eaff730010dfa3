//! KikiOS kernel library.
//!
//! Single-address-space AArch64 kernel: no MMU, no syscall boundary,
//! userspace calls straight into kernel code through the [`kapi`]
//! capability table.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
// Custom test runner only for bare-metal; host target uses standard #[test] harness.
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

extern crate alloc;

// On bare metal the global allocator is `mm::heap::ALLOCATOR`, gated there
// behind `cfg(target_os = "none")`. On host (used for `cargo test`) delegate
// to the system allocator so Vec/String/Box work in ordinary unit tests.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

mod intrinsics;

pub mod arch;
pub mod boot_cfg;
pub mod bootstrap;
pub mod console;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fs;
pub mod ftp;
pub mod irq;
pub mod kapi;
pub mod klog;
pub mod mm;
pub mod net;
pub mod process;
pub mod sched;
pub mod sync;

mod test_framework;

pub use test_framework::{
    cycles_to_ns, exit_qemu, read_timestamp, test_panic_handler, BenchmarkRunner, QemuExitCode,
    Testable,
};
#[cfg(test)]
pub use test_framework::test_runner;

/// Called by `arch::aarch64::boot::_start_rust` once BSS is zeroed -- the
/// one place the assembly entry point hands off to Rust, for both a normal
/// boot and a bare-metal test run.
#[cfg(not(test))]
pub fn kernel_main() -> ! {
    bootstrap::run()
}

#[cfg(all(test, target_os = "none"))]
pub fn kernel_main() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation error handler.
///
/// Panic is intentional: heap allocation failure in a no_std kernel is
/// unrecoverable. The alloc_error_handler ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("Allocation error: {:?}", layout);
}
