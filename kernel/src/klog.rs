//! Kernel log ring buffer.
//!
//! Backs both the `log` facade (via [`KlogLogger`]) and the `klog_read`/
//! `klog_size` entries of the capability table, so every kernel log line a
//! user-space diagnostic tool can fetch is the same stream a developer sees
//! on the UART.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

pub const KLOG_CAPACITY: usize = 64 * 1024;

struct RingBuffer {
    buf: [u8; KLOG_CAPACITY],
    /// Total bytes ever written; `write_pos % KLOG_CAPACITY` is where the
    /// next byte lands. Once this exceeds KLOG_CAPACITY the buffer has
    /// wrapped and the oldest bytes are being overwritten.
    write_pos: usize,
}

impl RingBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; KLOG_CAPACITY],
            write_pos: 0,
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            let idx = self.write_pos % KLOG_CAPACITY;
            self.buf[idx] = b;
            self.write_pos += 1;
        }
    }
}

static RING: Mutex<RingBuffer> = Mutex::new(RingBuffer::new());
static TOTAL_WRITTEN: AtomicUsize = AtomicUsize::new(0);

pub fn write(bytes: &[u8]) {
    RING.lock().write(bytes);
    TOTAL_WRITTEN.fetch_add(bytes.len(), Ordering::Relaxed);
}

/// Number of valid bytes currently held (saturates at [`KLOG_CAPACITY`]).
pub fn size() -> usize {
    TOTAL_WRITTEN.load(Ordering::Relaxed).min(KLOG_CAPACITY)
}

/// Copy up to `out.len()` of the oldest-to-newest currently buffered bytes
/// into `out`. Returns the number of bytes copied.
pub fn read(out: &mut [u8]) -> usize {
    let ring = RING.lock();
    let available = size();
    let n = out.len().min(available);
    if n == 0 {
        return 0;
    }
    let start = ring.write_pos - available;
    for i in 0..n {
        out[i] = ring.buf[(start + i) % KLOG_CAPACITY];
    }
    n
}

/// `log::Log` implementation writing formatted lines to the UART console
/// and the klog ring buffer.
pub struct KlogLogger;

impl log::Log for KlogLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        use core::fmt::Write;

        let mut line: heapless_line::LineBuf = heapless_line::LineBuf::new();
        let _ = write!(line, "[{:<5}] {}\n", record.level(), record.args());
        write(line.as_bytes());
        crate::arch::aarch64::direct_uart::direct_print_str(line.as_str());
    }

    fn flush(&self) {}
}

/// A tiny fixed-capacity `core::fmt::Write` sink, since the kernel logger
/// must not allocate (it may be called before the heap is initialized).
mod heapless_line {
    use core::fmt;

    const CAP: usize = 256;

    pub struct LineBuf {
        buf: [u8; CAP],
        len: usize,
    }

    impl LineBuf {
        pub const fn new() -> Self {
            Self { buf: [0; CAP], len: 0 }
        }

        pub fn as_bytes(&self) -> &[u8] {
            &self.buf[..self.len]
        }

        pub fn as_str(&self) -> &str {
            core::str::from_utf8(self.as_bytes()).unwrap_or("")
        }
    }

    impl fmt::Write for LineBuf {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let remaining = CAP - self.len;
            let take = s.len().min(remaining);
            self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
            self.len += take;
            Ok(())
        }
    }
}

static LOGGER: KlogLogger = KlogLogger;

pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Trace))
        .ok();
}
