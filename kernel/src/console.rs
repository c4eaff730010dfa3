//! Framebuffer/font contract.
//!
//! Actual pixel drawing is out of scope: this module only pins down the
//! shapes [`kapi`](crate::kapi) hands to userspace -- a framebuffer
//! descriptor, a fixed-width bitmap font, and a character-cell geometry --
//! and a typed stub for probing a virtio-gpu (or ramfb) device that a real
//! implementation would fill in.

use crate::sync::once_lock::GlobalState;

/// Linear RGB framebuffer, as found via virtio-gpu/ramfb device config.
#[derive(Debug, Clone, Copy)]
pub struct Framebuffer {
    pub base: *mut core::ffi::c_void,
    pub width: u32,
    pub height: u32,
    /// Bytes per scanline; may exceed `width * bytes_per_pixel` for padding.
    pub stride: u32,
    pub bytes_per_pixel: u32,
}

// SAFETY: `base` is a device-mapped region that outlives the kernel; this
// descriptor is copied, never used to synchronize access to the pixels.
unsafe impl Send for Framebuffer {}
unsafe impl Sync for Framebuffer {}

/// A fixed-width bitmap font: `glyphs` is `glyph_width * glyph_height` bits
/// per character, one character after another starting at codepoint 0x20.
#[derive(Debug, Clone, Copy)]
pub struct Font {
    pub glyphs: &'static [u8],
    pub glyph_width: u32,
    pub glyph_height: u32,
}

struct ConsoleState {
    framebuffer: Option<Framebuffer>,
    font: Option<Font>,
    cols: u32,
    rows: u32,
}

static STATE: GlobalState<ConsoleState> = GlobalState::new();

/// Probe for a framebuffer device and install the built-in font. A missing
/// device is not an error here -- callers see `framebuffer() == None` and
/// fall back to the serial console, same as a headless boot.
pub fn init() {
    let framebuffer = probe_framebuffer();
    let font = Some(builtin_font());
    let (cols, rows) = match (&framebuffer, &font) {
        (Some(fb), Some(f)) => (fb.width / f.glyph_width, fb.height / f.glyph_height),
        _ => (0, 0),
    };

    STATE.init(ConsoleState {
        framebuffer,
        font,
        cols,
        rows,
    })
    .ok();
    log::info!("console initialized: framebuffer={}", framebuffer.is_some());
}

/// Look for a virtio-gpu or ramfb device and read its config space for a
/// base address and geometry. Not implemented: no device probing, drawing,
/// or mode-setting logic lives in this kernel.
fn probe_framebuffer() -> Option<Framebuffer> {
    None
}

const BUILTIN_GLYPH_WIDTH: u32 = 8;
const BUILTIN_GLYPH_HEIGHT: u32 = 16;

fn builtin_font() -> Font {
    static GLYPHS: [u8; 0] = [];
    Font {
        glyphs: &GLYPHS,
        glyph_width: BUILTIN_GLYPH_WIDTH,
        glyph_height: BUILTIN_GLYPH_HEIGHT,
    }
}

pub fn framebuffer() -> Option<Framebuffer> {
    STATE.with(|s| s.framebuffer).flatten()
}

pub fn font() -> Option<Font> {
    STATE.with(|s| s.font).flatten()
}

pub fn dimensions() -> (u32, u32) {
    STATE.with(|s| (s.cols, s.rows)).unwrap_or((0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_probe_yields_no_framebuffer() {
        assert!(probe_framebuffer().is_none());
    }

    #[test]
    fn builtin_font_has_nonzero_glyph_geometry() {
        let font = builtin_font();
        assert_eq!(font.glyph_width, BUILTIN_GLYPH_WIDTH);
        assert_eq!(font.glyph_height, BUILTIN_GLYPH_HEIGHT);
    }
}
