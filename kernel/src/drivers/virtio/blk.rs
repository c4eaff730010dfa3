//! virtio-blk driver (device id 2, virtio spec section 5.2).
//!
//! Each request is a three-descriptor chain: a device-readable header, a
//! data buffer (device-writable on read, device-readable on write), and a
//! device-writable status byte. Requests are synchronous: `do_request`
//! notifies the queue and spins until the used ring reports completion.

#![allow(dead_code)]

extern crate alloc;

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::sync::atomic::{self, Ordering};

use spin::Mutex;

use super::{
    mmio::VirtioMmioTransport,
    queue::{VirtQueue, VIRTQ_DESC_F_NEXT, VIRTQ_DESC_F_WRITE},
};
use crate::{error::KernelError, sync::once_lock::OnceLock};

pub const BLOCK_SIZE: usize = 512;

/// virtio-blk feature bits (virtio spec 5.2.3).
pub mod features {
    pub const VIRTIO_BLK_F_SIZE_MAX: u32 = 1 << 1;
    pub const VIRTIO_BLK_F_SEG_MAX: u32 = 1 << 2;
    pub const VIRTIO_BLK_F_GEOMETRY: u32 = 1 << 4;
    pub const VIRTIO_BLK_F_RO: u32 = 1 << 5;
    pub const VIRTIO_BLK_F_BLK_SIZE: u32 = 1 << 6;
    pub const VIRTIO_BLK_F_FLUSH: u32 = 1 << 9;
}

mod req_type {
    pub const VIRTIO_BLK_T_IN: u32 = 0;
    pub const VIRTIO_BLK_T_OUT: u32 = 1;
}

mod blk_status {
    pub const VIRTIO_BLK_S_OK: u8 = 0;
    pub const VIRTIO_BLK_S_IOERR: u8 = 1;
    pub const VIRTIO_BLK_S_UNSUPP: u8 = 2;
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct VirtioBlkReqHeader {
    type_: u32,
    reserved: u32,
    sector: u64,
}

/// A heap-backed DMA buffer holding one request's header, data and status
/// byte. Physical address equals virtual address in this kernel, so the
/// pointer itself is what goes on the descriptor.
struct RequestBuffer {
    base: *mut u8,
    layout: Layout,
    header_off: usize,
    data_off: usize,
    status_off: usize,
}

impl RequestBuffer {
    fn new(data_len: usize) -> Result<Self, KernelError> {
        let header_off = 0;
        let data_off = core::mem::size_of::<VirtioBlkReqHeader>();
        let status_off = data_off + data_len;
        let total = status_off + 1;

        let layout = Layout::from_size_align(total, 16).map_err(|_| KernelError::InvalidArgument {
            name: "data_len",
            value: "request buffer layout overflow",
        })?;
        // SAFETY: layout has non-zero size.
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            return Err(KernelError::OutOfMemory {
                requested: total,
                available: 0,
            });
        }

        Ok(Self {
            base,
            layout,
            header_off,
            data_off,
            status_off,
        })
    }

    fn header_phys(&self) -> u64 {
        self.base as u64 + self.header_off as u64
    }

    fn data_phys(&self) -> u64 {
        self.base as u64 + self.data_off as u64
    }

    fn status_phys(&self) -> u64 {
        self.base as u64 + self.status_off as u64
    }

    fn write_header(&self, type_: u32, sector: u64) {
        let header = VirtioBlkReqHeader {
            type_,
            reserved: 0,
            sector,
        };
        // SAFETY: header_off is within this buffer's allocation.
        unsafe {
            core::ptr::write_volatile(self.base.add(self.header_off) as *mut VirtioBlkReqHeader, header);
        }
    }

    fn write_data(&self, data: &[u8]) {
        // SAFETY: data_off..data_off+data.len() is within this buffer's
        // allocation (checked at construction by the caller's data_len).
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(self.data_off), data.len());
        }
    }

    fn read_data(&self, buf: &mut [u8]) {
        // SAFETY: same bound as write_data.
        unsafe {
            core::ptr::copy_nonoverlapping(self.base.add(self.data_off), buf.as_mut_ptr(), buf.len());
        }
    }

    fn read_status(&self) -> u8 {
        // SAFETY: status_off is within this buffer's allocation.
        unsafe { core::ptr::read_volatile(self.base.add(self.status_off)) }
    }
}

impl Drop for RequestBuffer {
    fn drop(&mut self) {
        // SAFETY: base/layout are exactly what alloc_zeroed returned.
        unsafe { dealloc(self.base, self.layout) };
    }
}

pub struct VirtioBlkDevice {
    transport: VirtioMmioTransport,
    queue: VirtQueue,
    capacity_sectors: u64,
    read_only: bool,
}

impl VirtioBlkDevice {
    pub(super) fn from_mmio(
        transport: VirtioMmioTransport,
        queue: VirtQueue,
        capacity_sectors: u64,
        read_only: bool,
    ) -> Self {
        Self {
            transport,
            queue,
            capacity_sectors,
            read_only,
        }
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_sectors * BLOCK_SIZE as u64
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn read_block(&mut self, block_num: u64, buf: &mut [u8]) -> Result<(), KernelError> {
        if buf.len() < BLOCK_SIZE {
            return Err(KernelError::InvalidArgument {
                name: "buf",
                value: "buffer must be at least 512 bytes",
            });
        }
        if block_num >= self.capacity_sectors {
            return Err(KernelError::InvalidArgument {
                name: "block_num",
                value: "block number exceeds device capacity",
            });
        }
        self.do_request(req_type::VIRTIO_BLK_T_IN, block_num, Some(buf), None)
    }

    pub fn write_block(&mut self, block_num: u64, data: &[u8]) -> Result<(), KernelError> {
        if self.read_only {
            return Err(KernelError::PermissionDenied {
                operation: "write to read-only virtio-blk device",
            });
        }
        if data.len() < BLOCK_SIZE {
            return Err(KernelError::InvalidArgument {
                name: "data",
                value: "data must be at least 512 bytes",
            });
        }
        if block_num >= self.capacity_sectors {
            return Err(KernelError::InvalidArgument {
                name: "block_num",
                value: "block number exceeds device capacity",
            });
        }
        self.do_request(req_type::VIRTIO_BLK_T_OUT, block_num, None, Some(data))
    }

    fn do_request(
        &mut self,
        type_: u32,
        sector: u64,
        read_buf: Option<&mut [u8]>,
        write_data: Option<&[u8]>,
    ) -> Result<(), KernelError> {
        let data_len = BLOCK_SIZE;
        let req_buf = RequestBuffer::new(data_len)?;
        req_buf.write_header(type_, sector);
        if let Some(data) = write_data {
            req_buf.write_data(&data[..data_len]);
        }

        let desc_header = self.queue.alloc_desc().ok_or(KernelError::ResourceExhausted {
            resource: "virtio-blk descriptors",
        })?;
        let desc_data = match self.queue.alloc_desc() {
            Some(d) => d,
            None => {
                self.queue.free_desc(desc_header);
                return Err(KernelError::ResourceExhausted {
                    resource: "virtio-blk descriptors",
                });
            }
        };
        let desc_status = match self.queue.alloc_desc() {
            Some(d) => d,
            None => {
                self.queue.free_desc(desc_header);
                self.queue.free_desc(desc_data);
                return Err(KernelError::ResourceExhausted {
                    resource: "virtio-blk descriptors",
                });
            }
        };

        // SAFETY: desc_header/desc_data/desc_status are freshly allocated
        // indices; the phys addresses point into req_buf, which outlives
        // this call until the chain is freed below.
        unsafe {
            self.queue.write_desc(
                desc_header,
                req_buf.header_phys(),
                core::mem::size_of::<VirtioBlkReqHeader>() as u32,
                VIRTQ_DESC_F_NEXT,
                desc_data,
            );
        }

        let data_flags = if type_ == req_type::VIRTIO_BLK_T_IN {
            VIRTQ_DESC_F_WRITE | VIRTQ_DESC_F_NEXT
        } else {
            VIRTQ_DESC_F_NEXT
        };
        // SAFETY: see above.
        unsafe {
            self.queue
                .write_desc(desc_data, req_buf.data_phys(), data_len as u32, data_flags, desc_status);
        }
        // SAFETY: see above.
        unsafe {
            self.queue
                .write_desc(desc_status, req_buf.status_phys(), 1, VIRTQ_DESC_F_WRITE, 0);
        }

        atomic::fence(Ordering::Release);
        self.queue.push_avail(desc_header);
        self.transport.notify_queue(0);

        let mut spins: u32 = 0;
        const MAX_SPINS: u32 = 10_000_000;
        while !self.queue.has_used() {
            core::hint::spin_loop();
            spins += 1;
            if spins >= MAX_SPINS {
                self.queue.free_chain(desc_header);
                return Err(KernelError::Timeout {
                    operation: "virtio-blk request",
                    duration_ms: 0,
                });
            }
        }

        self.queue.poll_used().ok_or(KernelError::HardwareError {
            device: "virtio-blk",
            code: 0x02,
        })?;

        let status = req_buf.read_status();
        match status {
            blk_status::VIRTIO_BLK_S_OK => {}
            blk_status::VIRTIO_BLK_S_IOERR => {
                self.queue.free_chain(desc_header);
                return Err(KernelError::HardwareError {
                    device: "virtio-blk",
                    code: 0x10,
                });
            }
            blk_status::VIRTIO_BLK_S_UNSUPP => {
                self.queue.free_chain(desc_header);
                return Err(KernelError::OperationNotSupported {
                    operation: "virtio-blk unsupported request type",
                });
            }
            other => {
                self.queue.free_chain(desc_header);
                return Err(KernelError::HardwareError {
                    device: "virtio-blk",
                    code: other as u32,
                });
            }
        }

        if let Some(buf) = read_buf {
            req_buf.read_data(&mut buf[..data_len]);
        }

        self.queue.free_chain(desc_header);
        Ok(())
    }
}

pub trait BlockDevice: Send + Sync {
    fn read_block(&mut self, block_num: u64, buf: &mut [u8]) -> Result<(), KernelError>;
    fn write_block(&mut self, block_num: u64, data: &[u8]) -> Result<(), KernelError>;
    fn capacity_sectors(&self) -> u64;
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }
    fn is_read_only(&self) -> bool;
}

impl BlockDevice for VirtioBlkDevice {
    fn read_block(&mut self, block_num: u64, buf: &mut [u8]) -> Result<(), KernelError> {
        VirtioBlkDevice::read_block(self, block_num, buf)
    }

    fn write_block(&mut self, block_num: u64, data: &[u8]) -> Result<(), KernelError> {
        VirtioBlkDevice::write_block(self, block_num, data)
    }

    fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

static VIRTIO_BLK: OnceLock<Mutex<VirtioBlkDevice>> = OnceLock::new();

/// Probe the standard virtio-mmio base addresses for a virtio-blk device and
/// register the first one found.
pub fn init() {
    use super::mmio::DEFAULT_BASES;

    for base in DEFAULT_BASES {
        match super::mmio::try_init_mmio_blk(base) {
            Ok(dev) => {
                if VIRTIO_BLK.set(Mutex::new(dev)).is_ok() {
                    crate::println!("[VIRTIO-BLK] device registered at {:#x}", base);
                    return;
                }
            }
            Err(_) => continue,
        }
    }
    crate::println!("[VIRTIO-BLK] no device found");
}

pub fn get_device() -> Option<&'static Mutex<VirtioBlkDevice>> {
    VIRTIO_BLK.get()
}

pub fn is_initialized() -> bool {
    VIRTIO_BLK.get().is_some()
}
