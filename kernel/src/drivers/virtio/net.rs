//! virtio-net driver (device id 1, virtio spec section 5.1).
//!
//! Queue 0 is the receive queue, queue 1 is transmit. The receive queue is
//! pre-populated with a fixed pool of device-writable buffers at init time;
//! [`VirtioNetDevice::poll_rx`] drains completed ones and re-queues their
//! buffer once the caller is done with the frame. Transmit uses a single
//! reusable buffer per call and blocks until the device acknowledges it --
//! there is no transmit ring to pipeline, matching the one-packet-at-a-time
//! use [`crate::net`] makes of this driver.

#![allow(dead_code)]

extern crate alloc;

use alloc::alloc::{alloc_zeroed, dealloc, Layout};

use spin::Mutex;

use super::{
    mmio::VirtioMmioTransport,
    queue::{VirtQueue, VIRTQ_DESC_F_WRITE},
};
use crate::{error::KernelError, sync::once_lock::OnceLock};

/// virtio-net feature bits (virtio spec 5.1.3).
pub mod features {
    pub const VIRTIO_NET_F_MAC: u32 = 1 << 5;
}

/// Basic `virtio_net_hdr` (virtio spec 5.1.6.1), without `num_buffers`
/// (we don't negotiate VIRTIO_NET_F_MRG_RXBUF).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct VirtioNetHdr {
    flags: u8,
    gso_type: u8,
    hdr_len: u16,
    gso_size: u16,
    csum_start: u16,
    csum_offset: u16,
}

const HDR_SIZE: usize = core::mem::size_of::<VirtioNetHdr>();
const FRAME_BUF_SIZE: usize = 2048;
const RX_RING_SIZE: usize = 8;

pub struct VirtioNetDevice {
    transport: VirtioMmioTransport,
    rx_queue: VirtQueue,
    tx_queue: VirtQueue,
    mac: [u8; 6],
}

impl VirtioNetDevice {
    /// Populate the receive queue with [`RX_RING_SIZE`] device-writable
    /// buffers before DRIVER_OK is set, per the virtio spec's recommended
    /// sequence. The buffers are never individually freed -- they cycle
    /// forever between the device and [`Self::poll_rx`], and their
    /// addresses live on in the descriptor table, so no tracking Vec is
    /// needed.
    pub(super) fn prime_rx(rx_queue: &mut VirtQueue) -> Result<(), KernelError> {
        for _ in 0..RX_RING_SIZE {
            let layout = Layout::from_size_align(FRAME_BUF_SIZE, 16).unwrap();
            // SAFETY: layout has non-zero size.
            let base = unsafe { alloc_zeroed(layout) };
            if base.is_null() {
                return Err(KernelError::OutOfMemory {
                    requested: FRAME_BUF_SIZE,
                    available: 0,
                });
            }
            let desc = rx_queue.alloc_desc().ok_or(KernelError::ResourceExhausted {
                resource: "virtio-net rx descriptors",
            })?;
            // SAFETY: desc just allocated; base owned for FRAME_BUF_SIZE bytes
            // and stays alive for the process lifetime, recycled by poll_rx.
            unsafe {
                rx_queue.write_desc(desc, base as u64, FRAME_BUF_SIZE as u32, VIRTQ_DESC_F_WRITE, 0);
            }
            rx_queue.push_avail(desc);
        }
        Ok(())
    }

    pub(super) fn from_mmio(
        transport: VirtioMmioTransport,
        rx_queue: VirtQueue,
        tx_queue: VirtQueue,
        mac: [u8; 6],
    ) -> Self {
        Self {
            transport,
            rx_queue,
            tx_queue,
            mac,
        }
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    /// Drain one completed receive buffer into `out`, if any is ready.
    /// Returns the number of ethernet-frame bytes written (header stripped).
    /// The buffer is immediately re-queued for the device to reuse.
    pub fn poll_rx(&mut self, out: &mut [u8]) -> Option<usize> {
        let (desc, len) = self.rx_queue.poll_used()?;
        // SAFETY: desc was written by prime_rx with a live FRAME_BUF_SIZE
        // allocation at this address; the device just returned it to us
        // exclusively via the used ring.
        let addr = unsafe { self.rx_queue_desc_addr(desc) };
        let payload_len = (len as usize).saturating_sub(HDR_SIZE).min(out.len());
        // SAFETY: addr + HDR_SIZE .. +payload_len is within the FRAME_BUF_SIZE
        // buffer the device wrote into.
        unsafe {
            core::ptr::copy_nonoverlapping((addr + HDR_SIZE as u64) as *const u8, out.as_mut_ptr(), payload_len);
        }
        self.rx_queue.free_desc(desc);
        // SAFETY: desc was just freed and addr/len describe the same
        // untouched buffer; re-post it as device-writable.
        unsafe {
            self.rx_queue.write_desc(desc, addr, FRAME_BUF_SIZE as u32, VIRTQ_DESC_F_WRITE, 0);
        }
        self.rx_queue.push_avail(desc);
        Some(payload_len)
    }

    /// # Safety
    ///
    /// `desc` must be a descriptor index the caller just received via
    /// `poll_used`, still holding the address written at prime time.
    unsafe fn rx_queue_desc_addr(&self, desc: u16) -> u64 {
        // The descriptor table entry still carries `addr` until free_desc
        // clears it; read it before freeing.
        self.rx_queue.desc_addr(desc)
    }

    /// Send a single ethernet frame. Blocks until the device acknowledges
    /// transmission.
    pub fn send(&mut self, frame: &[u8]) -> Result<(), KernelError> {
        let total = HDR_SIZE + frame.len();
        let layout = Layout::from_size_align(total, 16).map_err(|_| KernelError::InvalidArgument {
            name: "frame",
            value: "frame too large",
        })?;
        // SAFETY: layout has non-zero size.
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            return Err(KernelError::OutOfMemory {
                requested: total,
                available: 0,
            });
        }
        // SAFETY: base is freshly allocated and owned exclusively here; the
        // header occupies the first HDR_SIZE bytes, the frame follows.
        unsafe {
            core::ptr::write_bytes(base, 0, HDR_SIZE);
            core::ptr::copy_nonoverlapping(frame.as_ptr(), base.add(HDR_SIZE), frame.len());
        }

        let desc = match self.tx_queue.alloc_desc() {
            Some(d) => d,
            None => {
                // SAFETY: base/layout are exactly what alloc_zeroed returned.
                unsafe { dealloc(base, layout) };
                return Err(KernelError::ResourceExhausted {
                    resource: "virtio-net tx descriptors",
                });
            }
        };
        // SAFETY: desc just allocated; base is device-readable and stays
        // alive until this function frees it below.
        unsafe {
            self.tx_queue.write_desc(desc, base as u64, total as u32, 0, 0);
        }
        self.tx_queue.push_avail(desc);
        self.transport.notify_queue(1);

        let mut spins: u32 = 0;
        const MAX_SPINS: u32 = 10_000_000;
        while !self.tx_queue.has_used() {
            core::hint::spin_loop();
            spins += 1;
            if spins >= MAX_SPINS {
                self.tx_queue.free_chain(desc);
                // SAFETY: base/layout are exactly what alloc_zeroed returned.
                unsafe { dealloc(base, layout) };
                return Err(KernelError::Timeout {
                    operation: "virtio-net send",
                    duration_ms: 0,
                });
            }
        }
        self.tx_queue.poll_used();
        self.tx_queue.free_chain(desc);
        // SAFETY: base/layout are exactly what alloc_zeroed returned.
        unsafe { dealloc(base, layout) };
        Ok(())
    }
}

static VIRTIO_NET: OnceLock<Mutex<VirtioNetDevice>> = OnceLock::new();

pub fn init() {
    use super::mmio::{try_init_mmio_net, DEFAULT_BASES};

    for base in DEFAULT_BASES {
        match try_init_mmio_net(base) {
            Ok(dev) => {
                if VIRTIO_NET.set(Mutex::new(dev)).is_ok() {
                    crate::println!("[VIRTIO-NET] device registered at {:#x}", base);
                    return;
                }
            }
            Err(_) => continue,
        }
    }
    crate::println!("[VIRTIO-NET] no device found");
}

pub fn get_device() -> Option<&'static Mutex<VirtioNetDevice>> {
    VIRTIO_NET.get()
}

pub fn is_initialized() -> bool {
    VIRTIO_NET.get().is_some()
}
