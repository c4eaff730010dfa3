//! Network stack integration: bring the protocol layers up over the real
//! virtio-net device and exercise a TCP listen/UDP listen round trip
//! through the stack's own state (no loopback frame is actually
//! delivered here -- that needs a peer on the far end of QEMU's
//! user-mode networking).

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use kikios_kernel::{
    exit_qemu, kernel_assert, net,
    net::{tcp, udp, Ipv4Address, SocketAddr},
    serial_println, test_panic_handler, QemuExitCode,
};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("=== net_tests ===");

    kikios_kernel::arch::init();
    kikios_kernel::mm::init();
    kikios_kernel::irq::init().expect("irq init");
    kikios_kernel::drivers::init();
    net::init().expect("net init");

    let listener = tcp::listen(SocketAddr::new(net::OUR_IP, 8080)).expect("tcp listen");
    kernel_assert!(tcp::send(listener, b"hello").is_err());

    udp::listen(5353, |_src, _src_port, _dst_port, _data| {}).expect("udp listen");

    let stats = net::get_stats();
    kernel_assert!(stats.packets_sent == 0);
    let _ = Ipv4Address::LOCALHOST;

    serial_println!("net_tests: all checks passed");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}
