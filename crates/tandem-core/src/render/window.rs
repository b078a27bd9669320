use crate::errors::RenderError;
use crate::render::context::RenderContext;
use crate::render::mirror::MirrorKey;
use crate::render::world::RenderWorld;
use crate::window::{WindowDescriptor, WindowSurface};
use tiny_skia::Pixmap;
use tracing::{debug, info, warn};

slotmap::new_key_type! {
    pub struct WindowKey;
}

/// Render-side window: the platform surface plus the back buffer the
/// mirrored root view is drawn into.
pub struct RenderWindowState {
    pub(crate) surface: Box<dyn WindowSurface>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) title: String,
    pub(crate) fullscreen: bool,
    pub(crate) root: Option<MirrorKey>,
    pub(crate) frame: Option<Pixmap>,
    pub(crate) bound: bool,
    pub(crate) suspended: bool,
    pub(crate) needs_swap: bool,
    pub(crate) reported_resize: Option<(u32, u32)>,
    pub(crate) presented: u64,
}

impl RenderWindowState {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn root(&self) -> Option<MirrorKey> {
        self.root
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented
    }

    /// Last rendered back buffer.
    pub fn frame(&self) -> Option<&Pixmap> {
        self.frame.as_ref()
    }

    fn ensure_frame(&mut self) -> Result<(), RenderError> {
        let fits = self
            .frame
            .as_ref()
            .is_some_and(|f| f.width() == self.width && f.height() == self.height);
        if !fits {
            self.frame = Some(Pixmap::new(self.width, self.height).ok_or(
                RenderError::TargetAllocation {
                    width: self.width,
                    height: self.height,
                },
            )?);
        }
        Ok(())
    }
}

impl RenderWorld {
    /// Registers a surface that was already created on the producer thread.
    pub(crate) fn add_window(
        &mut self,
        surface: Box<dyn WindowSurface>,
        descriptor: &WindowDescriptor,
    ) -> WindowKey {
        self.windows.insert(RenderWindowState {
            surface,
            width: descriptor.width,
            height: descriptor.height,
            title: descriptor.title.clone(),
            fullscreen: descriptor.fullscreen,
            root: None,
            frame: None,
            bound: false,
            suspended: false,
            needs_swap: false,
            reported_resize: None,
            presented: 0,
        })
    }

    pub fn window(&self, key: WindowKey) -> Option<&RenderWindowState> {
        self.windows.get(key)
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub(crate) fn remove_window(&mut self, key: WindowKey) {
        if let Some(mut window) = self.windows.remove(key) {
            window.surface.destroy();
            if let Some(root) = window.root {
                self.release_node(root);
            }
            debug!(title = %window.title, "Window destroyed");
        }
    }

    pub(crate) fn set_window_root(
        &mut self,
        key: WindowKey,
        root: Option<MirrorKey>,
    ) -> Result<(), RenderError> {
        let previous = self
            .windows
            .get(key)
            .ok_or_else(|| RenderError::invalid("unknown window"))?
            .root;
        if previous == root {
            return Ok(());
        }
        if let Some(root) = root {
            self.retain_node(root);
        }
        if let Some(previous) = previous {
            self.release_node(previous);
        }
        if let Some(window) = self.windows.get_mut(key) {
            window.root = root;
        }
        Ok(())
    }

    /// Applies producer-side window parameters.
    pub(crate) fn update_window(
        &mut self,
        key: WindowKey,
        descriptor: &WindowDescriptor,
    ) -> Result<(), RenderError> {
        let window = self
            .windows
            .get_mut(key)
            .ok_or_else(|| RenderError::invalid("unknown window"))?;
        if (window.width, window.height) != (descriptor.width, descriptor.height) {
            window.surface.resize(descriptor.width, descriptor.height)?;
            window.width = descriptor.width;
            window.height = descriptor.height;
        }
        if window.title != descriptor.title {
            window.surface.set_title(&descriptor.title);
            window.title = descriptor.title.clone();
        }
        if window.fullscreen != descriptor.fullscreen {
            window.surface.set_fullscreen(descriptor.fullscreen);
            window.fullscreen = descriptor.fullscreen;
        }
        Ok(())
    }

    /// Size the platform reported since the last sync, if it changed.
    pub(crate) fn take_window_resize(&mut self, key: WindowKey) -> Option<(u32, u32)> {
        self.windows.get_mut(key)?.reported_resize.take()
    }

    /// Makes every not yet bound surface current on the calling thread.
    pub(crate) fn bind_windows(&mut self) -> Result<(), RenderError> {
        for (_, window) in self.windows.iter_mut().filter(|(_, w)| !w.bound) {
            window.surface.make_current()?;
            window.bound = true;
        }
        Ok(())
    }

    /// Allocates and clears back buffers.
    pub(crate) fn prepare_windows(&mut self) -> Result<(), RenderError> {
        for (_, window) in self.windows.iter_mut() {
            window.ensure_frame()?;
            if let Some(frame) = window.frame.as_mut() {
                frame.fill(tiny_skia::Color::BLACK);
            }
        }
        Ok(())
    }

    /// Presents the frames rendered last time round.
    pub(crate) fn swap_windows(&mut self) -> Result<(), RenderError> {
        for (_, window) in self.windows.iter_mut() {
            if !window.needs_swap || window.suspended {
                continue;
            }
            if let Some(frame) = window.frame.as_ref() {
                window.surface.swap_buffers(frame)?;
                window.presented += 1;
            }
            window.needs_swap = false;
        }
        Ok(())
    }

    pub(crate) fn render_windows(&mut self) -> Result<(), RenderError> {
        let keys: Vec<WindowKey> = self.windows.keys().collect();
        let mut last_error = Ok(());
        for key in keys {
            if let Err(e) = self.render_window(key) {
                warn!(error = %e, "Window render failed");
                last_error = Err(e);
            }
        }
        last_error
    }

    fn render_window(&mut self, key: WindowKey) -> Result<(), RenderError> {
        let (root, mut frame) = {
            let Some(window) = self.windows.get_mut(key) else {
                return Ok(());
            };
            if let Some(size) = window.surface.take_resize() {
                window.reported_resize = Some(size);
            }
            if window.suspended {
                return Ok(());
            }
            window.ensure_frame()?;
            match window.frame.take() {
                Some(frame) => (window.root, frame),
                None => return Ok(()),
            }
        };

        frame.fill(tiny_skia::Color::BLACK);
        let result = match root {
            Some(root) => self.prepare_dependencies(root, 0).and_then(|()| {
                let ctx = RenderContext::for_target(frame.width(), frame.height());
                self.draw_node(root, &mut frame, &ctx, 0)
            }),
            None => Ok(()),
        };

        if let Some(window) = self.windows.get_mut(key) {
            window.frame = Some(frame);
            window.needs_swap = true;
        }
        result
    }

    pub(crate) fn suspend_windows(&mut self) {
        for (_, window) in self.windows.iter_mut() {
            if !window.suspended {
                window.surface.suspend();
                window.suspended = true;
                window.needs_swap = false;
                info!(title = %window.title, "Window suspended");
            }
        }
    }

    pub(crate) fn resume_windows(&mut self) -> Result<(), RenderError> {
        for (_, window) in self.windows.iter_mut() {
            if window.suspended {
                window.surface.resume()?;
                window.suspended = false;
                info!(title = %window.title, "Window resumed");
            }
        }
        Ok(())
    }
}
