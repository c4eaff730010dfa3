//! Process table and scheduler integration: spawn, preempt, exit-cascade,
//! reap, exercised as a bare-metal binary rather than a unit test so the
//! real timer/GIC drive `sched::on_timer_tick`.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use kikios_kernel::{
    exit_qemu, kernel_assert, kernel_assert_eq,
    process::{table, ProcessState},
    sched, serial_println, test_panic_handler, QemuExitCode,
};

fn child_entry() {}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("=== process_tests ===");

    kikios_kernel::arch::init();
    kikios_kernel::mm::init();
    table::init();
    sched::init();

    let parent = table::spawn("parent", child_entry as usize, 0, None).expect("spawn parent");
    let child = table::spawn("child", child_entry as usize, 0, Some(parent)).expect("spawn child");
    kernel_assert!(table::exists(parent));
    kernel_assert!(table::exists(child));

    table::set_state(parent, ProcessState::Running);
    for _ in 0..sched::TICK_QUANTUM {
        sched::on_timer_tick(0);
    }

    table::exit(parent, 0).expect("exit parent");
    let reaped = table::reap_zombies();
    kernel_assert!(reaped >= 1);

    kernel_assert_eq!(table::exists(parent), false);

    serial_println!("process_tests: all checks passed");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}
