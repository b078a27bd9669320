//! Render side of the capture state machine.
//!
//! Sync allocates a [`PixelBuffer`] and marks the capture pending; the next
//! rendered frame reads the source back into it and clears pending; the
//! following sync hands the buffer to the producer. A source whose size no
//! longer matches the buffer is captured as black.

use crate::delayed::DelayedFree;
use crate::errors::RenderError;
use crate::render::mirror::MirrorKey;
use crate::render::window::WindowKey;
use crate::render::world::RenderWorld;
use crate::texture::ImageData;
use crate::types::PixelFormat;
use tiny_skia::Pixmap;
use tracing::{debug, warn};

slotmap::new_key_type! {
    pub struct CaptureKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// Offscreen render target of a mirrored view.
    View(MirrorKey),
    /// Back buffer of a window, read in window-system row order.
    Window(WindowKey),
}

/// Largest pixel buffer a single capture may allocate.
pub const MAX_CAPTURE_BYTES: usize = 1 << 30;

/// Bytes needed for `width` x `height` pixels of `format`, if within
/// [`MAX_CAPTURE_BYTES`].
pub fn capture_byte_len(width: u32, height: u32, format: PixelFormat) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(format.bytes_per_pixel())
        .filter(|&len| len <= MAX_CAPTURE_BYTES)
}

/// CPU-readable pixel storage for one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, RenderError> {
        let len = capture_byte_len(width, height, format).ok_or_else(|| {
            RenderError::invalid(format!(
                "capture of {width}x{height} exceeds {MAX_CAPTURE_BYTES} bytes"
            ))
        })?;
        Ok(Self {
            width,
            height,
            format,
            data: vec![0; len],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Opaque black in every pixel.
    pub fn fill_black(&mut self) {
        self.data.clear();
        for _ in 0..self.width as usize * self.height as usize {
            self.format.encode_pixel([0, 0, 0, 255], &mut self.data);
        }
    }

    /// Converts top-down straight RGBA8 rows into this buffer's format.
    pub(crate) fn write_rgba8(&mut self, rgba: &[u8]) {
        self.data.clear();
        for px in rgba.chunks_exact(4) {
            self.format
                .encode_pixel([px[0], px[1], px[2], px[3]], &mut self.data);
        }
    }

    pub fn into_image_data(self) -> Result<ImageData, RenderError> {
        ImageData::from_pixels(self.width, self.height, self.format, self.data)
    }
}

#[derive(Debug, Default)]
pub struct RenderCapture {
    pub(crate) source: Option<CaptureSource>,
    pub(crate) buffer: Option<PixelBuffer>,
    pub(crate) pending: bool,
}

impl RenderCapture {
    pub fn source(&self) -> Option<CaptureSource> {
        self.source
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn buffer(&self) -> Option<&PixelBuffer> {
        self.buffer.as_ref()
    }
}

/// Straight-alpha RGBA8 copy of a premultiplied pixmap, top row first.
pub(crate) fn pixmap_to_rgba8(pixmap: &Pixmap) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixmap.pixels().len() * 4);
    for px in pixmap.pixels() {
        let c = px.demultiply();
        out.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    out
}

/// Reverses row order of tightly packed RGBA8 rows.
pub(crate) fn flip_rows(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
    let stride = width as usize * 4;
    let mut out = Vec::with_capacity(rgba.len());
    for row in (0..height as usize).rev() {
        out.extend_from_slice(&rgba[row * stride..(row + 1) * stride]);
    }
    out
}

impl RenderWorld {
    pub(crate) fn create_capture(&mut self) -> CaptureKey {
        self.captures.insert(RenderCapture::default())
    }

    pub fn capture(&self, key: CaptureKey) -> Option<&RenderCapture> {
        self.captures.get(key)
    }

    pub fn contains_capture(&self, key: CaptureKey) -> bool {
        self.captures.contains_key(key)
    }

    pub(crate) fn remove_capture(&mut self, key: CaptureKey) {
        let Some(capture) = self.captures.remove(key) else {
            return;
        };
        if let Some(CaptureSource::View(view)) = capture.source {
            self.release_node(view);
        }
        if let Some(buffer) = capture.buffer {
            self.delayed.add_free(DelayedFree::Buffer(buffer));
        }
    }

    /// Points the capture at a new source, moving the view reference.
    pub(crate) fn set_capture_source(
        &mut self,
        key: CaptureKey,
        source: Option<CaptureSource>,
    ) -> Result<(), RenderError> {
        let previous = self
            .captures
            .get(key)
            .ok_or_else(|| RenderError::invalid("unknown capture"))?
            .source;
        if previous == source {
            return Ok(());
        }
        if let Some(CaptureSource::View(view)) = source {
            self.retain_node(view);
        }
        if let Some(CaptureSource::View(view)) = previous {
            self.release_node(view);
        }
        if let Some(capture) = self.captures.get_mut(key) {
            capture.source = source;
        }
        Ok(())
    }

    /// Allocates the buffer for a requested capture and marks it pending.
    pub(crate) fn begin_capture(
        &mut self,
        key: CaptureKey,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(), RenderError> {
        let capture = self
            .captures
            .get_mut(key)
            .ok_or_else(|| RenderError::invalid("unknown capture"))?;
        if capture.pending {
            return Ok(());
        }
        capture.buffer = Some(PixelBuffer::new(width, height, format)?);
        capture.pending = true;
        debug!(width, height, "Capture pending");
        Ok(())
    }

    /// Hands a finished buffer to the producer.
    pub(crate) fn take_capture_buffer(&mut self, key: CaptureKey) -> Option<PixelBuffer> {
        let capture = self.captures.get_mut(key)?;
        if capture.pending {
            return None;
        }
        capture.buffer.take()
    }

    /// Reads back every pending capture. Runs after the windows rendered.
    pub(crate) fn process_captures(&mut self) {
        let pending: Vec<CaptureKey> = self
            .captures
            .iter()
            .filter(|(_, c)| c.pending)
            .map(|(k, _)| k)
            .collect();

        for key in pending {
            let source = self.captures.get(key).and_then(|c| c.source);
            let pixels = match source {
                Some(CaptureSource::View(view)) => self.read_view(view),
                Some(CaptureSource::Window(window)) => self.read_window(window),
                None => None,
            };

            let Some(capture) = self.captures.get_mut(key) else {
                continue;
            };
            if let Some(buffer) = capture.buffer.as_mut() {
                match pixels {
                    Some((w, h, rgba)) if w == buffer.width && h == buffer.height => {
                        buffer.write_rgba8(&rgba);
                    }
                    Some((w, h, _)) => {
                        debug!(
                            source_width = w,
                            source_height = h,
                            capture_width = buffer.width,
                            capture_height = buffer.height,
                            "Capture size mismatch, filling black"
                        );
                        buffer.fill_black();
                    }
                    None => buffer.fill_black(),
                }
            }
            capture.pending = false;
            self.stats.captures_completed += 1;
        }
    }

    fn read_view(&mut self, view: MirrorKey) -> Option<(u32, u32, Vec<u8>)> {
        if let Err(e) = self.prepare_render_target(view) {
            warn!(error = %e, "Preparing capture source failed");
            return None;
        }
        let texture = self.nodes.get(view)?.render_target()?.texture();
        Some((texture.width(), texture.height(), pixmap_to_rgba8(texture)))
    }

    fn read_window(&self, window: WindowKey) -> Option<(u32, u32, Vec<u8>)> {
        let state = self.windows.get(window)?;
        let frame = state.frame.as_ref()?;
        // Window readback arrives bottom row first.
        let bottom_up = state.surface.read_pixels(frame);
        Some((
            frame.width(),
            frame.height(),
            flip_rows(&bottom_up, frame.width(), frame.height()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_rows_reverses_rows_only() {
        let rows = [1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
        let flipped = flip_rows(&rows, 2, 2);
        assert_eq!(flipped, vec![3, 3, 3, 3, 4, 4, 4, 4, 1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn black_fill_keeps_alpha_opaque() {
        let mut buffer = PixelBuffer::new(2, 1, PixelFormat::RGBA8).unwrap();
        buffer.fill_black();
        assert_eq!(buffer.data(), &[0, 0, 0, 255, 0, 0, 0, 255]);

        let mut rgb = PixelBuffer::new(1, 1, PixelFormat::RGB8).unwrap();
        rgb.fill_black();
        assert_eq!(rgb.data(), &[0, 0, 0]);
    }

    #[test]
    fn buffer_size_is_bounded() {
        assert!(PixelBuffer::new(u32::MAX, u32::MAX, PixelFormat::RGBA8).is_err());
        assert!(PixelBuffer::new(32_768, 32_768, PixelFormat::RGBA8).is_err());
        assert_eq!(capture_byte_len(16_384, 16_384, PixelFormat::RGBA8), Some(MAX_CAPTURE_BYTES));
    }
}
