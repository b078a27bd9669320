//! # Texture Module
//!
//! CPU pixel data and the shared textures built from it.
//!
//! `ImageData` is what the producer owns: capture results land here and
//! image nodes are created from it. `ImageTexture` is the shared handle an
//! image node hands to the render world; its pixmap is built lazily by the
//! render thread's delayed-init step, never by the producer.

use crate::errors::RenderError;
use crate::types::{Color, PixelFormat};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tiny_skia::{ColorU8, Pixmap};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl ImageData {
    /// Zero-filled image.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            pixels: vec![0; len],
        }
    }

    pub fn from_pixels(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Result<Self, RenderError> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(RenderError::invalid(format!(
                "image {width}x{height} needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            pixels,
        })
    }

    pub fn solid(width: u32, height: u32, color: Color) -> Self {
        let rgba = color.to_rgba8();
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width as usize * height as usize {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            format: PixelFormat::RGBA8,
            pixels,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RenderError> {
        let decoded = image::open(path)?.to_rgba8();
        let (width, height) = decoded.dimensions();
        Self::from_pixels(width, height, PixelFormat::RGBA8, decoded.into_raw())
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

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Straight-alpha RGBA8 value at `(x, y)`, top row first.
    pub fn pixel_rgba(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let start = (y as usize * self.width as usize + x as usize) * bpp;
        Some(self.format.decode_pixel(&self.pixels[start..start + bpp]))
    }

    pub fn to_rgba8(&self) -> Vec<u8> {
        let bpp = self.format.bytes_per_pixel();
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for px in self.pixels.chunks_exact(bpp) {
            out.extend_from_slice(&self.format.decode_pixel(px));
        }
        out
    }

    pub fn to_rgba_image(&self) -> Result<image::RgbaImage, RenderError> {
        image::RgbaImage::from_raw(self.width, self.height, self.to_rgba8()).ok_or_else(|| {
            RenderError::invalid(format!(
                "image buffer does not match {}x{}",
                self.width, self.height
            ))
        })
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), RenderError> {
        let path = path.as_ref();
        self.to_rgba_image()?
            .save_with_format(path, image::ImageFormat::Png)?;
        debug!(path = %path.display(), width = self.width, height = self.height, "Saved image");
        Ok(())
    }
}

/// Image pixels shared between an image node and the render world.
///
/// A texture is identified by its allocation: two textures built from equal
/// pixels are still initialized and freed separately.
#[derive(Debug)]
pub struct ImageTexture {
    data: ImageData,
    pixmap: OnceLock<Pixmap>,
}

impl ImageTexture {
    pub fn new(data: ImageData) -> Arc<Self> {
        Arc::new(Self {
            data,
            pixmap: OnceLock::new(),
        })
    }

    pub fn data(&self) -> &ImageData {
        &self.data
    }

    pub fn is_initialized(&self) -> bool {
        self.pixmap.get().is_some()
    }

    /// The uploaded pixmap, once delayed initialization ran.
    pub fn pixmap(&self) -> Option<&Pixmap> {
        self.pixmap.get()
    }

    /// Builds the premultiplied pixmap. Runs on the render thread.
    pub(crate) fn initialize(&self) -> Result<(), RenderError> {
        if self.is_initialized() {
            return Ok(());
        }
        let (width, height) = (self.data.width.max(1), self.data.height.max(1));
        let mut pixmap = Pixmap::new(width, height)
            .ok_or(RenderError::TargetAllocation { width, height })?;
        let rgba = self.data.to_rgba8();
        for (dst, src) in pixmap.pixels_mut().iter_mut().zip(rgba.chunks_exact(4)) {
            *dst = ColorU8::from_rgba(src[0], src[1], src[2], src[3]).premultiply();
        }
        // A concurrent initializer losing the race is harmless.
        let _ = self.pixmap.set(pixmap);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pixels_checks_length() {
        let err = ImageData::from_pixels(2, 2, PixelFormat::RGBA8, vec![0; 15]).unwrap_err();
        assert!(matches!(err, RenderError::InvalidParam(_)));
    }

    #[test]
    fn texture_initializes_premultiplied() {
        let tex = ImageTexture::new(ImageData::solid(2, 1, Color::new(1.0, 0.0, 0.0, 0.5)));
        assert!(!tex.is_initialized());
        tex.initialize().unwrap();
        let px = tex.pixmap().unwrap().pixel(1, 0).unwrap();
        assert_eq!(px.alpha(), 128);
        assert_eq!(px.red(), 128);
    }

    #[test]
    fn gray_images_expand_to_rgba() {
        let format = PixelFormat::new(1, 8).unwrap();
        let data = ImageData::from_pixels(1, 1, format, vec![77]).unwrap();
        assert_eq!(data.pixel_rgba(0, 0), Some([77, 77, 77, 255]));
    }
}
