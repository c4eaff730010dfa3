//! AArch64 boot entry. `boot.S` parks secondary cores and jumps to
//! `_start_rust`, which clears BSS before handing off to `crate::kernel_main`.

use core::arch::global_asm;

global_asm!(include_str!("boot.S"));

#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn _start_rust() -> ! {
    extern "C" {
        static mut __bss_start: u8;
        static mut __bss_end: u8;
    }

    // SAFETY: __bss_start/__bss_end are linker-provided symbols bounding the
    // .bss section. At this point no Rust code has run yet, so no reference
    // into .bss exists for this write to race with.
    unsafe {
        let bss_start = &raw mut __bss_start;
        let bss_end = &raw const __bss_end;
        let bss_size = bss_end as usize - bss_start as usize;
        core::ptr::write_bytes(bss_start, 0, bss_size);
    }

    crate::kernel_main()
}
