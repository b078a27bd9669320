//! # Capture Module
//!
//! Producer side of render captures: reading a view's render target or a
//! window's frame back into CPU memory.
//!
//! A request becomes a pending pixel buffer at the next sync, is filled by
//! the render thread during the frame that follows, and arrives here as an
//! [`ImageData`] at the sync after that.

use crate::errors::RenderError;
use crate::render::capture::{capture_byte_len, MAX_CAPTURE_BYTES};
use crate::render::{CaptureKey, CaptureSource, RenderWorld, WindowKey};
use crate::scene::{NodeId, SceneGraph};
use crate::texture::ImageData;
use crate::types::PixelFormat;
use tracing::{debug, info};

/// Requested size and layout of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTarget {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl CaptureTarget {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn rgba8(width: u32, height: u32) -> Self {
        Self::new(width, height, PixelFormat::RGBA8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSubject {
    View(NodeId),
    Window(WindowKey),
}

#[derive(Debug)]
pub struct CaptureCanvas {
    subject: CaptureSubject,
    key: Option<CaptureKey>,
    requested: Option<CaptureTarget>,
    pending: bool,
    image: Option<ImageData>,
    completed: u64,
}

impl CaptureCanvas {
    pub fn for_view(view: NodeId) -> Self {
        Self::new(CaptureSubject::View(view))
    }

    pub fn for_window(window: WindowKey) -> Self {
        Self::new(CaptureSubject::Window(window))
    }

    fn new(subject: CaptureSubject) -> Self {
        Self {
            subject,
            key: None,
            requested: None,
            pending: false,
            image: None,
            completed: 0,
        }
    }

    pub fn subject(&self) -> CaptureSubject {
        self.subject
    }

    /// Asks for one capture. Repeated requests before the next sync replace
    /// the target; a request while a capture is in flight is queued behind it.
    pub fn request_capture(&mut self, target: CaptureTarget) -> Result<(), RenderError> {
        if target.width == 0 || target.height == 0 {
            return Err(RenderError::invalid(format!(
                "capture size must be positive, got {}x{}",
                target.width, target.height
            )));
        }
        if capture_byte_len(target.width, target.height, target.format).is_none() {
            return Err(RenderError::invalid(format!(
                "capture of {}x{} exceeds {MAX_CAPTURE_BYTES} bytes",
                target.width, target.height
            )));
        }
        self.requested = Some(target);
        Ok(())
    }

    /// `true` from the request until the image arrives.
    pub fn is_capture_pending(&self) -> bool {
        self.pending || self.requested.is_some()
    }

    /// Latest completed capture.
    pub fn image(&self) -> Option<&ImageData> {
        self.image.as_ref()
    }

    pub fn take_image(&mut self) -> Option<ImageData> {
        self.image.take()
    }

    pub fn completed_captures(&self) -> u64 {
        self.completed
    }

    /// Must be called while the render thread is parked at the barrier.
    pub fn sync_to_render(
        &mut self,
        scene: &mut SceneGraph,
        world: &mut RenderWorld,
    ) -> Result<(), RenderError> {
        let key = match self.key.filter(|&k| world.contains_capture(k)) {
            Some(key) => key,
            None => {
                let key = world.create_capture();
                self.key = Some(key);
                key
            }
        };

        let source = match self.subject {
            CaptureSubject::View(view) if scene.contains(view) => {
                Some(CaptureSource::View(scene.sync_to_render(world, view)?))
            }
            CaptureSubject::View(_) => None,
            CaptureSubject::Window(window) => world
                .window(window)
                .map(|_| CaptureSource::Window(window)),
        };
        world.set_capture_source(key, source)?;

        // Hand over what the last frame produced.
        if self.pending {
            if let Some(buffer) = world.take_capture_buffer(key) {
                self.image = Some(buffer.into_image_data()?);
                self.pending = false;
                self.completed += 1;
                debug!(completed = self.completed, "Capture delivered");
            }
        }

        if !self.pending {
            if let Some(target) = self.requested.take() {
                world.begin_capture(key, target.width, target.height, target.format)?;
                self.pending = true;
                info!(width = target.width, height = target.height, "Capture requested");
            }
        }
        Ok(())
    }

    /// Drops the render-side capture. Must be called at a sync point.
    pub fn release(&mut self, world: &mut RenderWorld) {
        if let Some(key) = self.key.take() {
            world.remove_capture(key);
        }
        self.pending = false;
    }
}
