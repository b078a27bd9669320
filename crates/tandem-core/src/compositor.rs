//! # Compositor
//!
//! Producer-side coordinator: owns the scene graph, the render windows, the
//! capture canvases and the render thread, and turns them into one call per
//! frame.
//!
//! ## Frame
//! 1. The application edits [`Compositor::scene`].
//! 2. [`Compositor::end_frame`] asks the scheduler whether to wait for the
//!    render thread. If the render thread is still busy for long enough the
//!    frame is skipped and the edits are carried into the next one.
//! 3. Otherwise captures and windows are synced into the quiescent render
//!    world and the next frame starts rendering.

use crate::capture::{CaptureCanvas, CaptureSubject};
use crate::config::RenderConfig;
use crate::errors::RenderError;
use crate::render::{FrameStats, RenderWorld, WindowKey};
use crate::scene::{NodeId, SceneGraph};
use crate::texture::ImageData;
use crate::thread::{InitialWindow, RenderThread, ThreadState};
use crate::window::{RenderWindow, WindowDescriptor, WindowSurface};
use tracing::{debug, instrument};

/// Handle of a capture canvas owned by the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The render thread was still busy; nothing was synced.
    Skipped,
    Synchronized,
}

pub struct Compositor {
    /// The producer scene. Edit freely between frames.
    pub scene: SceneGraph,
    thread: RenderThread,
    windows: Vec<RenderWindow>,
    captures: Vec<Option<CaptureCanvas>>,
    /// Removed captures whose render side is dropped at the next sync.
    retired: Vec<CaptureCanvas>,
    frames: u64,
    skipped: u64,
}

impl Compositor {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            scene: SceneGraph::new(),
            thread: RenderThread::new(config),
            windows: Vec::new(),
            captures: Vec::new(),
            retired: Vec::new(),
            frames: 0,
            skipped: 0,
        }
    }

    /// Starts the render thread, optionally with a first window.
    pub fn init(&mut self, window: Option<InitialWindow>) -> Result<Option<WindowKey>, RenderError> {
        let window = self.thread.init(window)?;
        Ok(window.map(|w| {
            let key = w.key();
            self.windows.push(w);
            key
        }))
    }

    pub fn thread(&self) -> &RenderThread {
        &self.thread
    }

    pub fn thread_mut(&mut self) -> &mut RenderThread {
        &mut self.thread
    }

    pub fn state(&self) -> ThreadState {
        self.thread.state()
    }

    pub fn create_window(
        &mut self,
        surface: impl WindowSurface + 'static,
        descriptor: WindowDescriptor,
    ) -> Result<WindowKey, RenderError> {
        let window = self
            .thread
            .create_render_window(Box::new(surface), descriptor)?;
        let key = window.key();
        self.windows.push(window);
        Ok(key)
    }

    pub fn destroy_window(&mut self, key: WindowKey) -> Result<(), RenderError> {
        let index = self
            .windows
            .iter()
            .position(|w| w.key() == key)
            .ok_or_else(|| RenderError::invalid("unknown window"))?;
        let window = self.windows.remove(index);
        self.thread.destroy_render_window(window);
        Ok(())
    }

    pub fn window(&self, key: WindowKey) -> Option<&RenderWindow> {
        self.windows.iter().find(|w| w.key() == key)
    }

    pub fn window_mut(&mut self, key: WindowKey) -> Option<&mut RenderWindow> {
        self.windows.iter_mut().find(|w| w.key() == key)
    }

    /// Shows `root` in the window. `None` leaves the window black.
    pub fn set_window_root(&mut self, key: WindowKey, root: Option<NodeId>) -> Result<(), RenderError> {
        let window = self
            .windows
            .iter_mut()
            .find(|w| w.key() == key)
            .ok_or_else(|| RenderError::invalid("unknown window"))?;
        window.set_root(&self.scene, root)
    }

    pub fn add_capture(&mut self, subject: CaptureSubject) -> CaptureId {
        let canvas = match subject {
            CaptureSubject::View(view) => CaptureCanvas::for_view(view),
            CaptureSubject::Window(window) => CaptureCanvas::for_window(window),
        };
        self.captures.push(Some(canvas));
        CaptureId(self.captures.len() - 1)
    }

    pub fn capture(&self, id: CaptureId) -> Option<&CaptureCanvas> {
        self.captures.get(id.0).and_then(Option::as_ref)
    }

    pub fn capture_mut(&mut self, id: CaptureId) -> Option<&mut CaptureCanvas> {
        self.captures.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Removes a capture canvas, returning its last undelivered image. The
    /// render side is dropped at the next sync.
    pub fn remove_capture(&mut self, id: CaptureId) -> Option<ImageData> {
        let mut canvas = self.captures.get_mut(id.0)?.take()?;
        let image = canvas.take_image();
        self.retired.push(canvas);
        image
    }

    /// Frames synchronized so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames skipped because the render thread was still busy.
    pub fn skipped_frames(&self) -> u64 {
        self.skipped
    }

    /// Ends a producer frame, skipping the sync when the render thread is
    /// expected to stay busy.
    pub fn end_frame(&mut self) -> Result<FrameOutcome, RenderError> {
        if !self.thread.main_thread_wait_finish_rendering() {
            self.skipped += 1;
            return Ok(FrameOutcome::Skipped);
        }
        self.synchronize()?;
        Ok(FrameOutcome::Synchronized)
    }

    /// Waits for the render thread, syncs everything and starts a frame.
    #[instrument(level = "debug", skip(self), fields(frame = self.frames))]
    pub fn synchronize(&mut self) -> Result<(), RenderError> {
        let scene = &mut self.scene;
        let windows = &mut self.windows;
        let captures = &mut self.captures;
        let retired = &mut self.retired;
        self.thread.synchronize(|world: &mut RenderWorld| {
            scene.release_destroyed(world);
            for mut canvas in retired.drain(..) {
                canvas.release(world);
            }
            for canvas in captures.iter_mut().flatten() {
                canvas.sync_to_render(scene, world)?;
            }
            for window in windows.iter_mut() {
                window.sync_to_render(scene, world)?;
            }
            Ok(())
        })?;
        self.frames += 1;
        debug!(frames = self.frames, "Frame synchronized");
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.thread.freeze();
    }

    pub fn unfreeze(&mut self) {
        self.thread.unfreeze();
    }

    pub fn suspend_windows(&mut self) -> Result<(), RenderError> {
        self.thread.suspend_window()
    }

    pub fn resume_windows(&mut self) -> Result<(), RenderError> {
        self.thread.resume_window()
    }

    pub fn stats(&mut self) -> FrameStats {
        self.thread.stats()
    }

    /// Stops rendering and drops every render resource.
    pub fn cleanup(&mut self) {
        self.thread.cleanup();
        self.windows.clear();
        self.retired.clear();
    }
}
