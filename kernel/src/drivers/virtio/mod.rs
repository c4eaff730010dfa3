//! Virtio subsystem -- MMIO transport and device drivers.
//!
//! QEMU's `virt` machine (the only target this kernel boots on) exposes
//! virtio devices as memory-mapped register blocks starting at
//! `0x0A00_0000`, probed in [`mmio::DEFAULT_BASES`]. There is no PCI bus and
//! no second transport to unify against.
//!
//! ```text
//!   VirtioMmioTransport (mmio.rs)
//!     +-- VirtQueue (queue.rs)      -- split virtqueue, heap-backed
//!     +-- VirtioBlkDevice (blk.rs)  -- virtio-blk (device id 2)
//!     +-- VirtioNetDevice (net.rs)  -- virtio-net (device id 1)
//! ```

pub mod blk;
pub mod mmio;
pub mod net;
pub mod queue;
pub mod sound;

/// Virtio-mmio device ids (virtio spec 5, `Device ID` field).
pub mod device_id {
    pub const NET: u32 = 1;
    pub const BLK: u32 = 2;
    pub const SOUND: u32 = 25;
}

pub fn init() {
    blk::init();
    net::init();
    sound::init();
}
