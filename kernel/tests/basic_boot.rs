//! Smoke test: the full boot sequence runs to completion and the pieces it
//! wires up (heap, VFS, capability table) are usable afterward.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use kikios_kernel::{
    exit_qemu, fs, kapi, kernel_assert, serial_println, test_panic_handler, QemuExitCode,
};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("=== basic_boot ===");

    kikios_kernel::bootstrap::kernel_init().expect("kernel_init must succeed");

    kernel_assert!(fs::file_exists("/bin"));
    kernel_assert!(fs::file_exists("/etc"));
    kernel_assert!(fs::file_exists("/tmp"));

    fs::write_file("/tmp/boot_marker", b"ok").expect("write_file");
    let read_back = fs::read_file("/tmp/boot_marker").expect("read_file");
    kernel_assert!(read_back == b"ok");

    kernel_assert!(!kapi::table_ptr().is_null());

    serial_println!("basic_boot: all checks passed");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}
