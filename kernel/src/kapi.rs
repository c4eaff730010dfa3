//! Kernel capability table.
//!
//! A flat, install-once record of function pointers and a few read-only
//! globals, handed by address to every userspace `main`. There is no
//! syscall boundary: user code calls straight through these pointers while
//! running at the same privilege level as the kernel. A slot nobody ever
//! populated stays null; callers are expected to check before calling
//! through it.

use core::ffi::c_void;

use crate::{console, fs, klog, sync::once_lock::GlobalState};

/// `(path_ptr, path_len) -> bytes_read, or negative errno`. Signature
/// mirrors the other ABI entries: plain scalars and raw pointers, no Rust
/// types cross the table.
pub type ReadFileFn = extern "C" fn(path: *const u8, path_len: usize, out: *mut u8, out_len: usize) -> isize;
pub type WriteFileFn = extern "C" fn(path: *const u8, path_len: usize, data: *const u8, data_len: usize) -> isize;
pub type KlogReadFn = extern "C" fn(out: *mut u8, out_len: usize) -> usize;
pub type KlogSizeFn = extern "C" fn() -> usize;
pub type YieldFn = extern "C" fn();

/// The table itself. Every field is `Copy`able and install-once: once
/// [`init`] runs, no field is ever reassigned.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KapiTable {
    pub version: u32,

    pub framebuffer: *mut c_void,
    pub framebuffer_width: u32,
    pub framebuffer_height: u32,
    pub framebuffer_stride: u32,

    pub font: *const u8,
    pub font_glyph_width: u32,
    pub font_glyph_height: u32,

    pub console_cols: u32,
    pub console_rows: u32,

    pub read_file: Option<ReadFileFn>,
    pub write_file: Option<WriteFileFn>,
    pub klog_read: Option<KlogReadFn>,
    pub klog_size: Option<KlogSizeFn>,
    pub yield_now: Option<YieldFn>,
}

// SAFETY: every pointer field is either null or points at static/leaked
// data that outlives the kernel; the table is populated once before any
// userspace code runs and never mutated afterward.
unsafe impl Send for KapiTable {}
unsafe impl Sync for KapiTable {}

impl KapiTable {
    const fn empty() -> Self {
        Self {
            version: KAPI_VERSION,
            framebuffer: core::ptr::null_mut(),
            framebuffer_width: 0,
            framebuffer_height: 0,
            framebuffer_stride: 0,
            font: core::ptr::null(),
            font_glyph_width: 0,
            font_glyph_height: 0,
            console_cols: 0,
            console_rows: 0,
            read_file: None,
            write_file: None,
            klog_read: None,
            klog_size: None,
            yield_now: None,
        }
    }
}

/// Bumped whenever a field is added or reinterpreted; userspace checks this
/// before trusting new fields.
pub const KAPI_VERSION: u32 = 1;

extern "C" fn kapi_read_file(path: *const u8, path_len: usize, out: *mut u8, out_len: usize) -> isize {
    // SAFETY: caller guarantees `path`/`out` point at valid buffers of the
    // given lengths; that's the ABI contract for every kapi_t entry point.
    let path_bytes = unsafe { core::slice::from_raw_parts(path, path_len) };
    let Ok(path) = core::str::from_utf8(path_bytes) else {
        return -1;
    };
    match fs::read_file(path) {
        Ok(data) => {
            let n = data.len().min(out_len);
            let out_slice = unsafe { core::slice::from_raw_parts_mut(out, n) };
            out_slice.copy_from_slice(&data[..n]);
            n as isize
        }
        Err(_) => -1,
    }
}

extern "C" fn kapi_write_file(path: *const u8, path_len: usize, data: *const u8, data_len: usize) -> isize {
    let path_bytes = unsafe { core::slice::from_raw_parts(path, path_len) };
    let Ok(path) = core::str::from_utf8(path_bytes) else {
        return -1;
    };
    let data = unsafe { core::slice::from_raw_parts(data, data_len) };
    match fs::write_file(path, data) {
        Ok(n) => n as isize,
        Err(_) => -1,
    }
}

extern "C" fn kapi_klog_read(out: *mut u8, out_len: usize) -> usize {
    let out_slice = unsafe { core::slice::from_raw_parts_mut(out, out_len) };
    klog::read(out_slice)
}

extern "C" fn kapi_klog_size() -> usize {
    klog::size()
}

extern "C" fn kapi_yield() {
    // Cooperative suspension: resumed the next time this process is picked
    // by the round-robin scheduler.
}

static TABLE: GlobalState<KapiTable> = GlobalState::new();

/// Populate the capability table. Must run once, after [`fs::init`] and
/// [`console::init`], before the first user process is created.
pub fn init() {
    let mut table = KapiTable::empty();
    table.read_file = Some(kapi_read_file);
    table.write_file = Some(kapi_write_file);
    table.klog_read = Some(kapi_klog_read);
    table.klog_size = Some(kapi_klog_size);
    table.yield_now = Some(kapi_yield);

    if let Some(fb) = console::framebuffer() {
        table.framebuffer = fb.base;
        table.framebuffer_width = fb.width;
        table.framebuffer_height = fb.height;
        table.framebuffer_stride = fb.stride;
    }
    if let Some(font) = console::font() {
        table.font = font.glyphs.as_ptr();
        table.font_glyph_width = font.glyph_width;
        table.font_glyph_height = font.glyph_height;
    }
    let (cols, rows) = console::dimensions();
    table.console_cols = cols;
    table.console_rows = rows;

    TABLE.init(table).ok();
    log::info!("capability table populated, version {KAPI_VERSION}");
}

/// Address of the installed table, to hand to a newly created process. Only
/// valid after [`init`] has run.
pub fn table_ptr() -> *const KapiTable {
    TABLE.with(|t| t as *const KapiTable).unwrap_or(core::ptr::null())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_has_null_slots() {
        let table = KapiTable::empty();
        assert!(table.read_file.is_none());
        assert!(table.framebuffer.is_null());
        assert_eq!(table.version, KAPI_VERSION);
    }
}
