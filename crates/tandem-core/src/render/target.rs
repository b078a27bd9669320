//! Offscreen render targets and the device that hands them out.
//!
//! A `RenderTarget` keeps two pixmaps: the front texture other nodes sample
//! and a back buffer that re-renders draw into before being swapped in. A
//! view reaching its own target while re-rendering therefore samples the
//! previous frame's content.

use crate::errors::RenderError;
use glam::Vec2;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tiny_skia::Pixmap;

/// Smallest maximum texture edge the renderer can work with.
pub const MIN_TEXTURE_SIZE: u32 = 64;

/// Allocation counters shared by the device and every target it created.
#[derive(Debug, Default)]
pub struct DeviceCounters {
    targets_created: AtomicU64,
    targets_freed: AtomicU64,
    target_resizes: AtomicU64,
}

/// Capabilities and allocation bookkeeping of the rasterizer backend.
#[derive(Debug, Clone)]
pub struct GraphicsDevice {
    max_texture_size: u32,
    counters: Arc<DeviceCounters>,
}

impl GraphicsDevice {
    pub fn new(max_texture_size: u32) -> Self {
        Self {
            max_texture_size,
            counters: Arc::new(DeviceCounters::default()),
        }
    }

    /// Fails when the device cannot back the renderer at all.
    pub fn verify_capabilities(&self) -> Result<(), RenderError> {
        if self.max_texture_size < MIN_TEXTURE_SIZE {
            return Err(RenderError::MissingCapability(format!(
                "maximum texture size {} is below the required {}",
                self.max_texture_size, MIN_TEXTURE_SIZE
            )));
        }
        Ok(())
    }

    pub fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    pub fn targets_created(&self) -> u64 {
        self.counters.targets_created.load(Ordering::Relaxed)
    }

    pub fn targets_freed(&self) -> u64 {
        self.counters.targets_freed.load(Ordering::Relaxed)
    }

    pub fn target_resizes(&self) -> u64 {
        self.counters.target_resizes.load(Ordering::Relaxed)
    }

    pub fn live_targets(&self) -> u64 {
        self.targets_created() - self.targets_freed()
    }

    /// Rounds a node size to whole pixels within the device limits.
    pub fn pixel_size(&self, size: Vec2) -> (u32, u32) {
        let edge = |v: f32| {
            if v.is_finite() {
                (v.round().max(1.0) as u32).min(self.max_texture_size.max(1))
            } else {
                1
            }
        };
        (edge(size.x), edge(size.y))
    }

    pub(crate) fn create_target(&self, width: u32, height: u32) -> Result<RenderTarget, RenderError> {
        let front = allocate(width, height)?;
        self.counters.targets_created.fetch_add(1, Ordering::Relaxed);
        Ok(RenderTarget {
            front,
            back: None,
            renders: 0,
            counters: Arc::clone(&self.counters),
        })
    }
}

fn allocate(width: u32, height: u32) -> Result<Pixmap, RenderError> {
    Pixmap::new(width, height).ok_or(RenderError::TargetAllocation { width, height })
}

#[derive(Debug)]
pub struct RenderTarget {
    front: Pixmap,
    back: Option<Pixmap>,
    renders: u64,
    counters: Arc<DeviceCounters>,
}

impl RenderTarget {
    pub fn width(&self) -> u32 {
        self.front.width()
    }

    pub fn height(&self) -> u32 {
        self.front.height()
    }

    /// The texture sampled by other nodes.
    pub fn texture(&self) -> &Pixmap {
        &self.front
    }

    /// Number of completed re-renders.
    pub fn render_count(&self) -> u64 {
        self.renders
    }

    /// Resizes in place. Returns `true` if the size actually changed, in
    /// which case the content is undefined until the next render.
    pub(crate) fn resize(&mut self, width: u32, height: u32) -> Result<bool, RenderError> {
        if self.width() == width && self.height() == height {
            return Ok(false);
        }
        self.front = allocate(width, height)?;
        self.back = None;
        self.counters.target_resizes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Hands out a cleared back buffer to render into.
    pub(crate) fn begin(&mut self) -> Result<Pixmap, RenderError> {
        let (width, height) = (self.width(), self.height());
        match self.back.take() {
            Some(mut back) if back.width() == width && back.height() == height => {
                back.fill(tiny_skia::Color::TRANSPARENT);
                Ok(back)
            }
            _ => allocate(width, height),
        }
    }

    /// Swaps a finished back buffer in as the new texture.
    pub(crate) fn present(&mut self, back: Pixmap) {
        if back.width() != self.width() || back.height() != self.height() {
            return;
        }
        let previous = std::mem::replace(&mut self.front, back);
        self.back = Some(previous);
        self.renders += 1;
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.counters.targets_freed.fetch_add(1, Ordering::Relaxed);
    }
}
