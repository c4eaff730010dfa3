//! Device drivers. The only bus this kernel speaks is virtio-mmio; everything
//! it drives hangs off [`virtio`].

pub mod virtio;

pub fn init() {
    crate::println!("[DRIVERS] Initializing device drivers...");
    virtio::init();
    crate::println!("[DRIVERS] Device drivers initialized");
}
