//! # Window Module
//!
//! Producer-side render windows and the platform surface seam.
//!
//! ## Responsibilities
//! - **WindowSurface**: the narrow interface a platform window system implements.
//! - **HeadlessSurface**: in-memory surface with a probe for inspecting what was presented.
//! - **RenderWindow**: producer handle that syncs root view, size, title and
//!   fullscreen state into the render world once per frame.

use crate::errors::RenderError;
use crate::render::capture::pixmap_to_rgba8;
use crate::render::{RenderWorld, WindowKey};
use crate::scene::{NodeId, SceneGraph};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tiny_skia::Pixmap;
use tracing::{debug, info};

/// Platform window backing a render window.
///
/// `create` is called on the producer thread (which owns the OS event loop);
/// every other method is called on the render thread once the surface was
/// handed to the render world.
pub trait WindowSurface: Send {
    fn create(&mut self, width: u32, height: u32) -> Result<(), RenderError>;

    /// Binds the surface to the calling render thread.
    fn make_current(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    fn destroy(&mut self);

    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError>;

    fn set_title(&mut self, title: &str);

    fn set_fullscreen(&mut self, fullscreen: bool);

    /// Presents a finished frame.
    fn swap_buffers(&mut self, frame: &Pixmap) -> Result<(), RenderError>;

    /// Reads a frame back in window-system row order: straight RGBA8 with
    /// the bottom row first.
    fn read_pixels(&self, frame: &Pixmap) -> Vec<u8> {
        let rgba = pixmap_to_rgba8(frame);
        let stride = frame.width() as usize * 4;
        rgba.chunks_exact(stride.max(1)).rev().flatten().copied().collect()
    }

    /// Display refresh rate in Hz, used when the frame rate limit is 0.
    fn refresh_rate(&self) -> u32 {
        60
    }

    /// The application lost its window (mobile background).
    fn suspend(&mut self) {}

    fn resume(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    /// Size reported by the window system since the last call, if any.
    fn take_resize(&mut self) -> Option<(u32, u32)> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowDescriptor {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub fullscreen: bool,
}

impl WindowDescriptor {
    pub fn new(width: u32, height: u32, title: impl Into<String>) -> Self {
        Self {
            width,
            height,
            title: title.into(),
            fullscreen: false,
        }
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    created: bool,
    current: bool,
    destroyed: bool,
    suspended: bool,
    title: String,
    fullscreen: bool,
    size: (u32, u32),
    presented: u64,
    last_frame: Option<Vec<u8>>,
    pending_resize: Option<(u32, u32)>,
    fail_create: bool,
    fail_bind: bool,
    fail_presents: u32,
}

/// Shared view into a [`HeadlessSurface`] after it moved to the render world.
#[derive(Debug, Clone, Default)]
pub struct HeadlessProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl HeadlessProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_created(&self) -> bool {
        self.lock().created
    }

    pub fn is_current(&self) -> bool {
        self.lock().current
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    pub fn is_suspended(&self) -> bool {
        self.lock().suspended
    }

    pub fn title(&self) -> String {
        self.lock().title.clone()
    }

    pub fn is_fullscreen(&self) -> bool {
        self.lock().fullscreen
    }

    pub fn size(&self) -> (u32, u32) {
        self.lock().size
    }

    pub fn presented_frames(&self) -> u64 {
        self.lock().presented
    }

    /// Straight RGBA8 of the last presented frame, top row first.
    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.lock().last_frame.clone()
    }

    /// Simulates the window system resizing the window.
    pub fn report_resize(&self, width: u32, height: u32) {
        self.lock().pending_resize = Some((width, height));
    }

    /// Makes the next `count` presents fail.
    pub fn fail_presents(&self, count: u32) {
        self.lock().fail_presents = count;
    }
}

/// Window surface without a window system. Presented frames are kept in
/// memory and exposed through a [`HeadlessProbe`].
#[derive(Debug)]
pub struct HeadlessSurface {
    probe: HeadlessProbe,
    refresh_rate: u32,
}

impl HeadlessSurface {
    pub fn new() -> (Self, HeadlessProbe) {
        let probe = HeadlessProbe::default();
        (
            Self {
                probe: probe.clone(),
                refresh_rate: 60,
            },
            probe,
        )
    }

    pub fn with_refresh_rate(mut self, hz: u32) -> Self {
        self.refresh_rate = hz;
        self
    }

    /// `create` fails, as with a missing display.
    pub fn failing_create(self) -> Self {
        self.probe.lock().fail_create = true;
        self
    }

    /// `make_current` fails, as with an unusable context on the render thread.
    pub fn failing_bind(self) -> Self {
        self.probe.lock().fail_bind = true;
        self
    }
}

impl WindowSurface for HeadlessSurface {
    fn create(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        let mut state = self.probe.lock();
        if state.fail_create {
            return Err(RenderError::Surface("headless display unavailable".into()));
        }
        state.created = true;
        state.size = (width, height);
        Ok(())
    }

    fn make_current(&mut self) -> Result<(), RenderError> {
        let mut state = self.probe.lock();
        if state.fail_bind {
            return Err(RenderError::MissingCapability(
                "headless context could not be made current".into(),
            ));
        }
        state.current = true;
        Ok(())
    }

    fn destroy(&mut self) {
        let mut state = self.probe.lock();
        state.destroyed = true;
        state.current = false;
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.probe.lock().size = (width, height);
        Ok(())
    }

    fn set_title(&mut self, title: &str) {
        self.probe.lock().title = title.to_string();
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        self.probe.lock().fullscreen = fullscreen;
    }

    fn swap_buffers(&mut self, frame: &Pixmap) -> Result<(), RenderError> {
        let mut state = self.probe.lock();
        if state.fail_presents > 0 {
            state.fail_presents -= 1;
            return Err(RenderError::Surface("present failed".into()));
        }
        state.presented += 1;
        state.last_frame = Some(pixmap_to_rgba8(frame));
        Ok(())
    }

    fn refresh_rate(&self) -> u32 {
        self.refresh_rate
    }

    fn suspend(&mut self) {
        self.probe.lock().suspended = true;
    }

    fn resume(&mut self) -> Result<(), RenderError> {
        self.probe.lock().suspended = false;
        Ok(())
    }

    fn take_resize(&mut self) -> Option<(u32, u32)> {
        let mut state = self.probe.lock();
        let size = state.pending_resize.take()?;
        state.size = size;
        Some(size)
    }
}

/// Producer handle of a window living in the render world.
#[derive(Debug)]
pub struct RenderWindow {
    key: WindowKey,
    descriptor: WindowDescriptor,
    root: Option<NodeId>,
    dirty: bool,
}

impl RenderWindow {
    pub(crate) fn new(key: WindowKey, descriptor: WindowDescriptor) -> Self {
        Self {
            key,
            descriptor,
            root: None,
            dirty: false,
        }
    }

    pub fn key(&self) -> WindowKey {
        self.key
    }

    pub fn size(&self) -> (u32, u32) {
        (self.descriptor.width, self.descriptor.height)
    }

    pub fn title(&self) -> &str {
        &self.descriptor.title
    }

    pub fn is_fullscreen(&self) -> bool {
        self.descriptor.fullscreen
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_size(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::invalid(format!(
                "window size must be positive, got {width}x{height}"
            )));
        }
        if (width, height) != self.size() {
            self.descriptor.width = width;
            self.descriptor.height = height;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        let title = title.into();
        if title != self.descriptor.title {
            self.descriptor.title = title;
            self.dirty = true;
        }
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        if fullscreen != self.descriptor.fullscreen {
            self.descriptor.fullscreen = fullscreen;
            self.dirty = true;
        }
    }

    /// Sets the view drawn into this window.
    pub fn set_root(&mut self, scene: &SceneGraph, root: Option<NodeId>) -> Result<(), RenderError> {
        if let Some(id) = root {
            scene.node(id)?;
        }
        self.root = root;
        Ok(())
    }

    /// Must be called while the render thread is parked at the barrier.
    pub fn sync_to_render(
        &mut self,
        scene: &mut SceneGraph,
        world: &mut RenderWorld,
    ) -> Result<(), RenderError> {
        if let Some((width, height)) = world.take_window_resize(self.key) {
            if (width, height) != self.size() && width > 0 && height > 0 {
                info!(width, height, "Window resized by platform");
                self.descriptor.width = width;
                self.descriptor.height = height;
                self.dirty = true;
            }
        }

        let root = match self.root {
            Some(id) if scene.contains(id) => Some(scene.sync_to_render(world, id)?),
            Some(_) => {
                debug!("Window root was destroyed");
                self.root = None;
                None
            }
            None => None,
        };
        world.set_window_root(self.key, root)?;

        if self.dirty {
            world.update_window(self.key, &self.descriptor)?;
            self.dirty = false;
        }
        Ok(())
    }
}
