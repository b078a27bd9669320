//! # Render World
//!
//! Everything the render thread owns: mirrored nodes, windows, captures and
//! the graphics device.
//!
//! ## Lifecycle
//! Mirrored nodes are reference counted explicitly. The producer node holds
//! one reference; every mirrored view, window, capture or masked node that
//! points at a node holds another. When the count reaches zero the node is
//! removed and its render targets and textures go to the delayed free queue,
//! so they outlive any frame that might still sample them.

use crate::delayed::{DelayedFree, DelayedOperations};
use crate::errors::RenderError;
use crate::node::NodeKind;
use crate::render::capture::{pixmap_to_rgba8, CaptureKey, RenderCapture};
use crate::render::mirror::{MirrorKey, MirroredNode};
use crate::render::target::GraphicsDevice;
use crate::render::window::{RenderWindowState, WindowKey};
use crate::texture::ImageData;
use crate::types::PixelFormat;
use serde::Serialize;
use slotmap::SlotMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{instrument, trace, warn};

/// Counters accumulated by the render thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub frames_rendered: u64,
    pub failed_frames: u64,
    pub target_renders: u64,
    pub mask_renders: u64,
    pub captures_completed: u64,
    pub textures_initialized: u64,
    pub resources_freed: u64,
}

pub struct RenderWorld {
    pub(crate) nodes: SlotMap<MirrorKey, MirroredNode>,
    pub(crate) windows: SlotMap<WindowKey, RenderWindowState>,
    pub(crate) captures: SlotMap<CaptureKey, RenderCapture>,
    pub(crate) device: GraphicsDevice,
    pub(crate) delayed: Arc<DelayedOperations>,
    pub(crate) stats: FrameStats,
}

impl RenderWorld {
    pub fn new(device: GraphicsDevice) -> Self {
        Self::with_delayed(device, Arc::new(DelayedOperations::new()))
    }

    pub fn with_delayed(device: GraphicsDevice, delayed: Arc<DelayedOperations>) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            windows: SlotMap::with_key(),
            captures: SlotMap::with_key(),
            device,
            delayed,
            stats: FrameStats::default(),
        }
    }

    pub fn device(&self) -> &GraphicsDevice {
        &self.device
    }

    pub fn delayed(&self) -> &Arc<DelayedOperations> {
        &self.delayed
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn node(&self, key: MirrorKey) -> Option<&MirroredNode> {
        self.nodes.get(key)
    }

    pub fn contains_node(&self, key: MirrorKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node_mut(&mut self, key: MirrorKey) -> Option<&mut MirroredNode> {
        self.nodes.get_mut(key)
    }

    /// New mirrored node holding the owner's reference.
    pub(crate) fn create_node(&mut self, kind: NodeKind) -> MirrorKey {
        let key = self.nodes.insert(MirroredNode::new(kind));
        trace!(?kind, "Mirrored node created");
        key
    }

    pub(crate) fn retain_node(&mut self, key: MirrorKey) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.refcount += 1;
        }
    }

    /// Drops one reference. The last release removes the node and releases
    /// whatever it referenced in turn.
    pub(crate) fn release_node(&mut self, key: MirrorKey) {
        let mut pending = vec![key];
        while let Some(key) = pending.pop() {
            let Some(node) = self.nodes.get_mut(key) else {
                warn!("Release of an unknown mirrored node");
                continue;
            };
            node.refcount = node.refcount.saturating_sub(1);
            if node.refcount > 0 {
                continue;
            }
            let Some(mut node) = self.nodes.remove(key) else {
                continue;
            };
            let (targets, texture) = node.take_resources();
            for target in targets {
                self.delayed.add_free(DelayedFree::Target(target));
            }
            if let Some(texture) = texture {
                self.delayed.add_free(DelayedFree::Texture(texture));
            }
            pending.extend(node.children().iter().copied());
            pending.extend(node.mask);
            pending.extend(node.referenced_view());
        }
    }

    /// Drops resources released since the last frame.
    pub fn process_free_operations(&mut self) -> usize {
        let count = self.delayed.process_free_operations();
        self.stats.resources_freed += count as u64;
        count
    }

    /// Builds textures handed over by sync.
    pub fn process_init_operations(&mut self) -> Result<usize, RenderError> {
        let result = self.delayed.process_init_operations();
        if let Ok(count) = result {
            self.stats.textures_initialized += count as u64;
        }
        result
    }

    /// One frame of render-thread work: release and initialize resources,
    /// present the previous frame, draw every window, then fill pending
    /// captures.
    #[instrument(level = "trace", skip(self))]
    pub fn render_frame(&mut self) -> Result<(), RenderError> {
        self.process_free_operations();
        let init = self.process_init_operations().map(|_| ());
        self.bind_windows()?;
        self.swap_windows()?;
        let rendered = self.render_windows();
        self.process_captures();
        self.stats.frames_rendered += 1;
        init.and(rendered)
    }

    /// Queues a copy of a view's cached texture to be written to `path` by
    /// the producer at its next `synchronize`. Returns `false` when the view
    /// has no render target yet.
    pub fn dump_render_target(&self, key: MirrorKey, path: impl Into<PathBuf>) -> bool {
        let Some(target) = self.nodes.get(key).and_then(|n| n.render_target()) else {
            return false;
        };
        let texture = target.texture();
        match ImageData::from_pixels(
            texture.width(),
            texture.height(),
            PixelFormat::RGBA8,
            pixmap_to_rgba8(texture),
        ) {
            Ok(image) => {
                self.delayed.add_save_image(path, image);
                true
            }
            Err(e) => {
                warn!(error = %e, "Render target dump failed");
                false
            }
        }
    }

    /// Releases everything. Render thread only, after the last frame.
    pub fn cleanup(&mut self) {
        let windows: Vec<WindowKey> = self.windows.keys().collect();
        for key in windows {
            self.remove_window(key);
        }
        let captures: Vec<CaptureKey> = self.captures.keys().collect();
        for key in captures {
            self.remove_capture(key);
        }
        for (_, mut node) in self.nodes.drain() {
            let (targets, texture) = node.take_resources();
            for target in targets {
                self.delayed.add_free(DelayedFree::Target(target));
            }
            if let Some(texture) = texture {
                self.delayed.add_free(DelayedFree::Texture(texture));
            }
        }
        self.process_free_operations();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> RenderWorld {
        RenderWorld::new(GraphicsDevice::new(256))
    }

    #[test]
    fn last_release_removes_and_cascades() {
        let mut world = world();
        let child = world.create_node(NodeKind::Paint);
        let view = world.create_node(NodeKind::View);
        world.retain_node(child);
        world.node_mut(view).unwrap().view_mut().unwrap().children.push(child);

        // Producer releases the child first: the view still holds it.
        world.release_node(child);
        assert!(world.contains_node(child));

        world.release_node(view);
        assert!(!world.contains_node(view));
        assert!(!world.contains_node(child));
    }

    #[test]
    fn targets_are_freed_only_by_the_free_step() {
        let mut world = world();
        let view = world.create_node(NodeKind::View);
        world.node_mut(view).unwrap().size = glam::Vec2::splat(4.0);
        world.prepare_render_target(view).unwrap();
        assert_eq!(world.device().live_targets(), 1);

        world.release_node(view);
        assert_eq!(world.device().live_targets(), 1);
        assert_eq!(world.delayed().pending_free_count(), 1);

        assert_eq!(world.process_free_operations(), 1);
        assert_eq!(world.device().live_targets(), 0);
    }

    #[test]
    fn target_dump_waits_for_the_producer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("view.png");
        let mut world = world();
        let view = world.create_node(NodeKind::View);
        assert!(!world.dump_render_target(view, &path));

        world.node_mut(view).unwrap().size = glam::Vec2::new(5.0, 3.0);
        world.prepare_render_target(view).unwrap();
        assert!(world.dump_render_target(view, &path));
        assert!(!path.exists());

        assert_eq!(world.delayed().process_synchronize_operations(), 1);
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (5, 3));
    }

    #[test]
    fn render_frame_counts_frames_without_windows() {
        let mut world = world();
        world.render_frame().unwrap();
        world.render_frame().unwrap();
        assert_eq!(world.stats().frames_rendered, 2);
    }
}
