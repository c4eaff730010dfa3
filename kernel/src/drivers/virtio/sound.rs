//! virtio-sound driver (device id 25, virtio spec section 5.14) -- PCM
//! output only.
//!
//! virtio-sound exposes four virtqueues (control, event, tx, rx); this
//! kernel only plays audio, so only the control queue (stream setup) and tx
//! queue (PCM data) are used. The event and rx queues are left unconfigured.

#![allow(dead_code)]

extern crate alloc;

use alloc::alloc::{alloc_zeroed, dealloc, Layout};

use spin::Mutex;

use super::{mmio::VirtioMmioTransport, queue::VirtQueue};
use crate::{error::KernelError, sync::once_lock::OnceLock};

pub mod code {
    pub const VIRTIO_SND_R_PCM_INFO: u32 = 0x0100;
    pub const VIRTIO_SND_R_PCM_SET_PARAMS: u32 = 0x0101;
    pub const VIRTIO_SND_R_PCM_PREPARE: u32 = 0x0102;
    pub const VIRTIO_SND_R_PCM_START: u32 = 0x0104;
    pub const VIRTIO_SND_R_PCM_STOP: u32 = 0x0105;
    pub const VIRTIO_SND_S_OK: u32 = 0x8000;
}

/// `virtio_snd_hdr` control-queue request header.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct SndHdr {
    code: u32,
}

/// `virtio_snd_pcm_hdr` -- control-queue PCM request header.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct PcmHdr {
    hdr: SndHdr,
    stream_id: u32,
}

/// `virtio_snd_pcm_set_params`, trimmed to the fields we drive: 44.1kHz
/// stereo 16-bit PCM, the one format this driver emits.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct PcmSetParams {
    hdr: PcmHdr,
    buffer_bytes: u32,
    period_bytes: u32,
    features: u32,
    channels: u8,
    format: u8,
    rate: u8,
    padding: u8,
}

mod fmt {
    pub const VIRTIO_SND_PCM_FMT_S16: u8 = 6;
    pub const VIRTIO_SND_PCM_RATE_44100: u8 = 10;
}

const CONTROL_MSG_SIZE: usize = 64;

pub struct VirtioSoundDevice {
    transport: VirtioMmioTransport,
    control_queue: VirtQueue,
    tx_queue: VirtQueue,
    stream_id: u32,
}

impl VirtioSoundDevice {
    pub(super) fn from_mmio(transport: VirtioMmioTransport, control_queue: VirtQueue, tx_queue: VirtQueue) -> Self {
        Self {
            transport,
            control_queue,
            tx_queue,
            stream_id: 0,
        }
    }

    /// Send a control request and wait for the device's status reply.
    /// `req` is copied into a device-readable buffer; a device-writable
    /// status buffer follows it in the same chain.
    fn control_request(&mut self, req: &[u8]) -> Result<(), KernelError> {
        let total = req.len() + 8;
        let layout = Layout::from_size_align(total, 8).map_err(|_| KernelError::InvalidArgument {
            name: "req",
            value: "control request too large",
        })?;
        // SAFETY: layout has non-zero size.
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            return Err(KernelError::OutOfMemory {
                requested: total,
                available: 0,
            });
        }
        // SAFETY: base is freshly allocated with req.len() + 8 bytes owned
        // exclusively here.
        unsafe {
            core::ptr::copy_nonoverlapping(req.as_ptr(), base, req.len());
        }

        let desc_req = self.control_queue.alloc_desc().ok_or(KernelError::ResourceExhausted {
            resource: "virtio-sound control descriptors",
        })?;
        let desc_status = match self.control_queue.alloc_desc() {
            Some(d) => d,
            None => {
                self.control_queue.free_desc(desc_req);
                // SAFETY: base/layout are exactly what alloc_zeroed returned.
                unsafe { dealloc(base, layout) };
                return Err(KernelError::ResourceExhausted {
                    resource: "virtio-sound control descriptors",
                });
            }
        };

        // SAFETY: desc_req/desc_status just allocated; base stays alive
        // until freed below, after the device has consumed the chain.
        unsafe {
            self.control_queue
                .write_desc(desc_req, base as u64, req.len() as u32, super::queue::VIRTQ_DESC_F_NEXT, desc_status);
            self.control_queue.write_desc(
                desc_status,
                base as u64 + req.len() as u64,
                8,
                super::queue::VIRTQ_DESC_F_WRITE,
                0,
            );
        }
        self.control_queue.push_avail(desc_req);
        self.transport.notify_queue(0);

        let mut spins: u32 = 0;
        const MAX_SPINS: u32 = 10_000_000;
        while !self.control_queue.has_used() {
            core::hint::spin_loop();
            spins += 1;
            if spins >= MAX_SPINS {
                self.control_queue.free_chain(desc_req);
                // SAFETY: base/layout are exactly what alloc_zeroed returned.
                unsafe { dealloc(base, layout) };
                return Err(KernelError::Timeout {
                    operation: "virtio-sound control request",
                    duration_ms: 0,
                });
            }
        }
        self.control_queue.poll_used();

        // SAFETY: status word lives at base + req.len(), written by the
        // device before returning the chain via the used ring.
        let status = unsafe { core::ptr::read_volatile((base as u64 + req.len() as u64) as *const u32) };
        self.control_queue.free_chain(desc_req);
        // SAFETY: base/layout are exactly what alloc_zeroed returned.
        unsafe { dealloc(base, layout) };

        if status != code::VIRTIO_SND_S_OK {
            return Err(KernelError::HardwareError {
                device: "virtio-sound",
                code: status,
            });
        }
        Ok(())
    }

    /// Configure stream 0 for 44.1kHz stereo S16 PCM and start it.
    pub fn open_default_stream(&mut self) -> Result<(), KernelError> {
        let params = PcmSetParams {
            hdr: PcmHdr {
                hdr: SndHdr {
                    code: code::VIRTIO_SND_R_PCM_SET_PARAMS,
                },
                stream_id: self.stream_id,
            },
            buffer_bytes: 4096,
            period_bytes: 1024,
            features: 0,
            channels: 2,
            format: fmt::VIRTIO_SND_PCM_FMT_S16,
            rate: fmt::VIRTIO_SND_PCM_RATE_44100,
            padding: 0,
        };
        // SAFETY: PcmSetParams is repr(C) and plain-old-data; viewing it as
        // bytes for the duration of this call is sound.
        let bytes = unsafe {
            core::slice::from_raw_parts(&params as *const _ as *const u8, core::mem::size_of::<PcmSetParams>())
        };
        self.control_request(bytes)?;

        let prepare = PcmHdr {
            hdr: SndHdr {
                code: code::VIRTIO_SND_R_PCM_PREPARE,
            },
            stream_id: self.stream_id,
        };
        // SAFETY: same as above.
        let bytes =
            unsafe { core::slice::from_raw_parts(&prepare as *const _ as *const u8, core::mem::size_of::<PcmHdr>()) };
        self.control_request(bytes)?;

        let start = PcmHdr {
            hdr: SndHdr {
                code: code::VIRTIO_SND_R_PCM_START,
            },
            stream_id: self.stream_id,
        };
        // SAFETY: same as above.
        let bytes =
            unsafe { core::slice::from_raw_parts(&start as *const _ as *const u8, core::mem::size_of::<PcmHdr>()) };
        self.control_request(bytes)
    }

    /// Submit one period of PCM data to the tx queue and wait for playback
    /// acknowledgement.
    pub fn write_pcm(&mut self, samples: &[u8]) -> Result<(), KernelError> {
        let header_len = core::mem::size_of::<u32>(); // stream_id
        let total = header_len + samples.len();
        let layout = Layout::from_size_align(total, 8).map_err(|_| KernelError::InvalidArgument {
            name: "samples",
            value: "pcm buffer too large",
        })?;
        // SAFETY: layout has non-zero size.
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            return Err(KernelError::OutOfMemory {
                requested: total,
                available: 0,
            });
        }
        // SAFETY: base owns `total` bytes exclusively; writes stay in bounds.
        unsafe {
            core::ptr::write_volatile(base as *mut u32, self.stream_id);
            core::ptr::copy_nonoverlapping(samples.as_ptr(), base.add(header_len), samples.len());
        }

        let desc = self.tx_queue.alloc_desc().ok_or(KernelError::ResourceExhausted {
            resource: "virtio-sound tx descriptors",
        })?;
        // SAFETY: desc just allocated; base stays alive until freed below.
        unsafe {
            self.tx_queue.write_desc(desc, base as u64, total as u32, 0, 0);
        }
        self.tx_queue.push_avail(desc);
        self.transport.notify_queue(2);

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
                    operation: "virtio-sound pcm write",
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

static VIRTIO_SOUND: OnceLock<Mutex<VirtioSoundDevice>> = OnceLock::new();

pub fn init() {
    use super::mmio::{try_init_mmio_sound, DEFAULT_BASES};

    for base in DEFAULT_BASES {
        match try_init_mmio_sound(base) {
            Ok(dev) => {
                if VIRTIO_SOUND.set(Mutex::new(dev)).is_ok() {
                    crate::println!("[VIRTIO-SOUND] device registered at {:#x}", base);
                    return;
                }
            }
            Err(_) => continue,
        }
    }
    crate::println!("[VIRTIO-SOUND] no device found");
}

pub fn get_device() -> Option<&'static Mutex<VirtioSoundDevice>> {
    VIRTIO_SOUND.get()
}

pub fn is_initialized() -> bool {
    VIRTIO_SOUND.get().is_some()
}
