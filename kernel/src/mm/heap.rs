//! Kernel heap, backed by a static array and `linked_list_allocator`.

use linked_list_allocator::LockedHeap;

/// 8 MiB is generous for a kernel that never runs user processes out of its
/// own heap -- process kernel stacks, PCBs, network buffers, and the virtio
/// queues all come out of here.
pub const HEAP_SIZE: usize = 8 * 1024 * 1024;

static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

#[cfg_attr(target_os = "none", global_allocator)]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Hand the static heap array to the global allocator. Must run once, before
/// any code that allocates (`alloc::vec::Vec`, `Box`, the process table,
/// ...).
pub fn init() {
    // SAFETY: HEAP_MEMORY is a private static never referenced anywhere else
    // and this function runs exactly once, before any allocation, so there is
    // no concurrent access to it or to the allocator's internal state.
    unsafe {
        let start = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
        ALLOCATOR.lock().init(start, HEAP_SIZE);
    }
    log::info!("kernel heap initialized: {} KiB", HEAP_SIZE / 1024);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    extern crate alloc;

    use alloc::{boxed::Box, vec::Vec};

    #[test]
    fn allocates_after_init() {
        super::init();
        let x = Box::new(42u32);
        assert_eq!(*x, 42);
        let mut v = Vec::new();
        for i in 0..100 {
            v.push(i);
        }
        assert_eq!(v.len(), 100);
    }
}
