//! Split virtqueue implementation.
//!
//! A virtqueue is three contiguous regions -- descriptor table, available
//! ring, used ring -- laid out per the virtio spec (section 2.6). KikiOS has
//! no MMU and no separate physical frame allocator: physical address equals
//! virtual address everywhere, so the queue's backing memory is just a heap
//! allocation and the "physical" addresses handed to the device are the
//! pointers themselves.

#![allow(dead_code)]

extern crate alloc;

use core::{
    alloc::Layout,
    sync::atomic::{self, Ordering},
};

use crate::error::KernelError;

/// Default queue size (power of 2). QEMU's virtio-mmio devices report their
/// own maximum via QUEUE_NUM_MAX; we clamp to this.
pub const DEFAULT_QUEUE_SIZE: u16 = 256;

pub const VIRTQ_DESC_F_NEXT: u16 = 1;
pub const VIRTQ_DESC_F_WRITE: u16 = 2;
pub const VIRTQ_DESC_F_INDIRECT: u16 = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtqDesc {
    pub addr: u64,
    pub len: u32,
    pub flags: u16,
    pub next: u16,
}

#[repr(C)]
pub struct VirtqAvail {
    pub flags: u16,
    pub idx: u16,
    pub ring: [u16; DEFAULT_QUEUE_SIZE as usize],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtqUsedElem {
    pub id: u32,
    pub len: u32,
}

#[repr(C)]
pub struct VirtqUsed {
    pub flags: u16,
    pub idx: u16,
    pub ring: [VirtqUsedElem; DEFAULT_QUEUE_SIZE as usize],
}

/// A split virtqueue. Owns its backing heap allocation; the descriptor
/// table, available ring and used ring all live inside it.
pub struct VirtQueue {
    size: u16,
    desc: *mut VirtqDesc,
    avail: *mut VirtqAvail,
    used: *mut VirtqUsed,
    free_head: u16,
    num_free: u16,
    last_used_idx: u16,
    base: *mut u8,
    layout: Layout,
    desc_offset: usize,
    avail_offset: usize,
    used_offset: usize,
}

impl VirtQueue {
    /// Allocate and initialize a new virtqueue of `size` entries (clamped to
    /// [`DEFAULT_QUEUE_SIZE`]).
    pub fn new(size: u16) -> Result<Self, KernelError> {
        let size = if size == 0 || size > DEFAULT_QUEUE_SIZE {
            DEFAULT_QUEUE_SIZE
        } else {
            size
        };

        let desc_size = 16 * size as usize;
        let avail_size = 4 + 2 * size as usize;
        let used_offset = align_up(desc_size + avail_size, 16);
        let used_size = 4 + 8 * size as usize;
        let total_size = used_offset + used_size;

        let layout = Layout::from_size_align(total_size, 16).map_err(|_| KernelError::InvalidArgument {
            name: "queue size",
            value: "virtqueue layout overflow",
        })?;

        // SAFETY: layout has a non-zero size.
        let base = unsafe { alloc::alloc::alloc_zeroed(layout) };
        if base.is_null() {
            return Err(KernelError::OutOfMemory {
                requested: total_size,
                available: 0,
            });
        }

        let desc_ptr = base as *mut VirtqDesc;
        // SAFETY: base is a fresh, zeroed allocation of at least total_size
        // bytes; offsets below are all within that allocation.
        let avail_ptr = unsafe { base.add(desc_size) as *mut VirtqAvail };
        let used_ptr = unsafe { base.add(used_offset) as *mut VirtqUsed };

        // SAFETY: desc_ptr points at `size` zeroed VirtqDesc slots we just
        // allocated exclusively.
        unsafe {
            for i in 0..size {
                let desc = &mut *desc_ptr.add(i as usize);
                desc.next = if i + 1 < size { i + 1 } else { 0 };
            }
        }

        Ok(Self {
            size,
            desc: desc_ptr,
            avail: avail_ptr,
            used: used_ptr,
            free_head: 0,
            num_free: size,
            last_used_idx: 0,
            base,
            layout,
            desc_offset: 0,
            avail_offset: desc_size,
            used_offset,
        })
    }

    pub fn phys_desc(&self) -> u64 {
        self.base as u64 + self.desc_offset as u64
    }

    pub fn phys_avail(&self) -> u64 {
        self.base as u64 + self.avail_offset as u64
    }

    pub fn phys_used(&self) -> u64 {
        self.base as u64 + self.used_offset as u64
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn alloc_desc(&mut self) -> Option<u16> {
        if self.num_free == 0 {
            return None;
        }
        let idx = self.free_head;
        // SAFETY: idx is within [0, size) by the free-list invariant.
        let desc = unsafe { &*self.desc.add(idx as usize) };
        self.free_head = desc.next;
        self.num_free -= 1;
        Some(idx)
    }

    pub fn free_desc(&mut self, idx: u16) {
        debug_assert!((idx as usize) < self.size as usize);
        // SAFETY: idx checked in bounds above.
        unsafe {
            let desc = &mut *self.desc.add(idx as usize);
            desc.next = self.free_head;
            desc.flags = 0;
            desc.addr = 0;
            desc.len = 0;
        }
        self.free_head = idx;
        self.num_free += 1;
    }

    pub fn free_chain(&mut self, head: u16) {
        let mut idx = head;
        loop {
            debug_assert!((idx as usize) < self.size as usize);
            // SAFETY: idx in bounds (asserted).
            let (flags, next) = unsafe {
                let desc = &*self.desc.add(idx as usize);
                (desc.flags, desc.next)
            };
            self.free_desc(idx);
            if flags & VIRTQ_DESC_F_NEXT == 0 {
                break;
            }
            idx = next;
        }
    }

    /// # Safety
    ///
    /// `idx` must be a valid descriptor index. `phys_addr` must point at a
    /// buffer of at least `len` bytes that stays alive until the device
    /// returns the descriptor via the used ring.
    pub unsafe fn write_desc(&mut self, idx: u16, phys_addr: u64, len: u32, flags: u16, next: u16) {
        debug_assert!((idx as usize) < self.size as usize);
        let desc = unsafe { &mut *self.desc.add(idx as usize) };
        desc.addr = phys_addr;
        desc.len = len;
        desc.flags = flags;
        desc.next = next;
    }

    pub fn push_avail(&mut self, desc_head: u16) {
        // SAFETY: self.avail is a valid VirtqAvail we own exclusively.
        unsafe {
            let avail = &mut *self.avail;
            let ring_idx = avail.idx as usize % self.size as usize;
            avail.ring[ring_idx] = desc_head;
            atomic::fence(Ordering::Release);
            avail.idx = avail.idx.wrapping_add(1);
        }
    }

    pub fn poll_used(&mut self) -> Option<(u16, u32)> {
        atomic::fence(Ordering::Acquire);
        // SAFETY: self.used is valid.
        let used_idx = unsafe { (*self.used).idx };
        if self.last_used_idx == used_idx {
            return None;
        }
        let ring_idx = self.last_used_idx as usize % self.size as usize;
        // SAFETY: ring_idx is reduced modulo size.
        let elem = unsafe { (*self.used).ring[ring_idx] };
        self.last_used_idx = self.last_used_idx.wrapping_add(1);
        Some((elem.id as u16, elem.len))
    }

    pub fn has_used(&self) -> bool {
        atomic::fence(Ordering::Acquire);
        // SAFETY: self.used is valid.
        let used_idx = unsafe { (*self.used).idx };
        self.last_used_idx != used_idx
    }

    /// Read back the buffer address stored in descriptor `idx`.
    pub fn desc_addr(&self, idx: u16) -> u64 {
        debug_assert!((idx as usize) < self.size as usize);
        // SAFETY: idx checked in bounds above.
        unsafe { (*self.desc.add(idx as usize)).addr }
    }
}

impl Drop for VirtQueue {
    fn drop(&mut self) {
        // SAFETY: base/layout are exactly what we passed to alloc_zeroed.
        unsafe { alloc::alloc::dealloc(self.base, self.layout) };
    }
}

// SAFETY: the raw pointers only ever address memory this VirtQueue owns
// exclusively; callers serialize access behind a Mutex.
unsafe impl Send for VirtQueue {}
unsafe impl Sync for VirtQueue {}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_chain_round_trips() {
        let mut q = VirtQueue::new(8).unwrap();
        let a = q.alloc_desc().unwrap();
        let b = q.alloc_desc().unwrap();
        // SAFETY: a, b are valid descriptor indices just allocated above.
        unsafe {
            q.write_desc(a, 0x1000, 16, VIRTQ_DESC_F_NEXT, b);
            q.write_desc(b, 0x2000, 16, 0, 0);
        }
        q.free_chain(a);
        assert_eq!(q.num_free, 8);
    }
}
