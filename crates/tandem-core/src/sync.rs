//! # Sync Engine
//!
//! Copies dirty producer state into the render world.
//!
//! `SceneGraph::sync_to_render` may only run while the render thread is
//! parked at the barrier. Dependencies (children, the referenced view, the
//! mask subtree) are synced before the node itself so their mirrored keys
//! exist when the node links to them. Only the dirty categories are copied;
//! every copy is counted in [`SyncStats`].

use crate::delayed::DelayedFree;
use crate::dirty::DirtyFlags;
use crate::errors::RenderError;
use crate::node::{NodeContent, NodeKind};
use crate::render::{MirrorKey, MirroredContent, RenderWorld};
use crate::scene::{NodeId, SceneGraph};
use glam::Affine2;
use serde::Serialize;
use std::ops::AddAssign;
use tracing::{instrument, trace};

/// Maximum nesting of views, view references and masks during sync.
pub const MAX_SYNC_DEPTH: usize = 100;

/// Per-category copy counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub nodes_visited: u64,
    pub mirrors_created: u64,
    pub geometry_copies: u64,
    pub transform_copies: u64,
    pub color_transform_copies: u64,
    pub parameter_copies: u64,
    pub content_copies: u64,
    pub mask_content_copies: u64,
    pub tracker_copies: u64,
}

impl SyncStats {
    /// Total field copies across every category.
    pub fn field_copies(&self) -> u64 {
        self.geometry_copies
            + self.transform_copies
            + self.color_transform_copies
            + self.parameter_copies
            + self.content_copies
            + self.mask_content_copies
            + self.tracker_copies
    }
}

impl AddAssign for SyncStats {
    fn add_assign(&mut self, rhs: Self) {
        self.nodes_visited += rhs.nodes_visited;
        self.mirrors_created += rhs.mirrors_created;
        self.geometry_copies += rhs.geometry_copies;
        self.transform_copies += rhs.transform_copies;
        self.color_transform_copies += rhs.color_transform_copies;
        self.parameter_copies += rhs.parameter_copies;
        self.content_copies += rhs.content_copies;
        self.mask_content_copies += rhs.mask_content_copies;
        self.tracker_copies += rhs.tracker_copies;
    }
}

/// Mirrored keys of a node's dependencies, gathered before its own copy.
#[derive(Default)]
struct Dependencies {
    children: Vec<MirrorKey>,
    referenced: Option<MirrorKey>,
    mask: Option<MirrorKey>,
}

impl SceneGraph {
    pub fn sync_stats(&self) -> SyncStats {
        self.stats
    }

    pub fn reset_sync_stats(&mut self) {
        self.stats = SyncStats::default();
    }

    /// Mirrors `id` and everything it displays, returning its mirrored key.
    #[instrument(level = "trace", skip(self, world), fields(node = %id))]
    pub fn sync_to_render(
        &mut self,
        world: &mut RenderWorld,
        id: NodeId,
    ) -> Result<MirrorKey, RenderError> {
        self.release_destroyed(world);
        self.sync_node(world, id, 0)
    }

    /// Drops the owner reference of every destroyed node's mirror.
    pub fn release_destroyed(&mut self, world: &mut RenderWorld) {
        for key in self.released.drain(..) {
            world.release_node(key);
        }
    }

    fn sync_node(
        &mut self,
        world: &mut RenderWorld,
        id: NodeId,
        depth: usize,
    ) -> Result<MirrorKey, RenderError> {
        if depth > MAX_SYNC_DEPTH {
            return Err(RenderError::RecursionLimit);
        }
        let mut copies = SyncStats {
            nodes_visited: 1,
            ..SyncStats::default()
        };

        let node = self.node_mut(id)?;
        let existing = node.mirror.filter(|&key| world.contains_node(key));
        let key = match existing {
            // Reached again through its own subtree: link to the mirror as is.
            Some(key) if node.sync_in_progress => return Ok(key),
            Some(key) => key,
            None => {
                let key = world.create_node(node.kind());
                node.mirror = Some(key);
                node.dirty.mark_all();
                copies.mirrors_created += 1;
                key
            }
        };
        node.sync_in_progress = true;

        let result = self
            .sync_dependencies(world, id, depth)
            .and_then(|deps| self.copy_fields(world, id, key, &deps, &mut copies));

        let node = self.node_mut(id)?;
        node.sync_in_progress = false;
        match result {
            Ok(_) => node.dirty.clear(),
            // Categories stay set for the next attempt.
            Err(_) => node.dirty.clear_parent_paint(),
        }
        self.stats += copies;
        result.map(|()| key)
    }

    fn sync_dependencies(
        &mut self,
        world: &mut RenderWorld,
        id: NodeId,
        depth: usize,
    ) -> Result<Dependencies, RenderError> {
        let node = self.node(id)?;
        let children = node.view().map(|v| v.children.clone()).unwrap_or_default();
        let referenced = match node.content {
            NodeContent::CanvasView(view) => view,
            _ => None,
        };
        let mask = node.mask;

        let mut deps = Dependencies::default();
        for child in children {
            deps.children.push(self.sync_node(world, child, depth + 1)?);
        }
        if let Some(view) = referenced {
            deps.referenced = Some(self.sync_node(world, view, depth + 1)?);
        }
        if let Some(mask) = mask {
            deps.mask = Some(self.sync_node(world, mask, depth + 1)?);
        }
        Ok(deps)
    }

    fn copy_fields(
        &self,
        world: &mut RenderWorld,
        id: NodeId,
        key: MirrorKey,
        deps: &Dependencies,
        copies: &mut SyncStats,
    ) -> Result<(), RenderError> {
        let node = self.node(id)?;
        let mut flags = node.dirty.flags();
        let mut retained = Vec::new();
        let mut released = Vec::new();

        let mirror = world
            .nodes
            .get_mut(key)
            .ok_or_else(|| RenderError::invalid(format!("mirror of {id} is gone")))?;

        if flags.contains(DirtyFlags::GEOMETRY) {
            if mirror.size != node.size {
                mirror.size = node.size;
                mirror.request_resize();
            }
            // Position folds into the mirrored transform.
            flags |= DirtyFlags::TRANSFORM;
            copies.geometry_copies += 1;
        }
        if flags.contains(DirtyFlags::TRANSFORM) {
            mirror.transform = Affine2::from_translation(node.position) * node.transform;
            copies.transform_copies += 1;
        }
        if flags.contains(DirtyFlags::COLOR_TRANSFORM) {
            mirror.color_transform = node.color_transform;
            copies.color_transform_copies += 1;
        }
        if flags.contains(DirtyFlags::PARAMETERS) {
            mirror.order = node.order;
            mirror.transparency = node.transparency;
            mirror.visible = node.visible;
            mirror.blend_mode = node.blend_mode;
            if mirror.mask != deps.mask {
                retained.extend(deps.mask);
                released.extend(mirror.mask);
                mirror.mask = deps.mask;
            }
            copies.parameter_copies += 1;
        }
        if flags.contains(DirtyFlags::CONTENT) {
            match (&node.content, &mut mirror.content) {
                (NodeContent::Paint(paint), MirroredContent::Paint(mirrored)) => {
                    *mirrored = paint.clone();
                }
                (NodeContent::Image(texture), MirroredContent::Image(mirrored)) => {
                    if let Some(texture) = texture.as_ref().filter(|t| !t.is_initialized()) {
                        world.delayed.add_init(texture.clone());
                    }
                    let previous = std::mem::replace(mirrored, texture.clone());
                    if let Some(previous) = previous {
                        world.delayed.add_free(DelayedFree::Texture(previous));
                    }
                }
                (NodeContent::View(_), MirroredContent::View(view)) => {
                    retained.extend(deps.children.iter().copied());
                    released.extend(std::mem::take(&mut view.children));
                }
                (NodeContent::CanvasView(_), MirroredContent::CanvasView(referenced)) => {
                    if *referenced != deps.referenced {
                        retained.extend(deps.referenced);
                        released.extend(referenced.take());
                        *referenced = deps.referenced;
                    }
                }
                _ => {
                    return Err(RenderError::invalid(format!(
                        "mirror of {id} has a different kind"
                    )))
                }
            }
            copies.content_copies += 1;
        }
        if flags.contains(DirtyFlags::MASK_CONTENT) {
            if let Some(mask) = mirror.mask {
                if let Some(mask) = world.node_mut(mask) {
                    mask.mask_target_dirty = true;
                }
            }
            copies.mask_content_copies += 1;
        }

        // Children are sorted by their mirrored order, which is current now.
        if flags.contains(DirtyFlags::CONTENT) && node.kind() == NodeKind::View {
            let mut children: Vec<(MirrorKey, f32)> = deps
                .children
                .iter()
                .map(|&k| (k, world.node(k).map_or(0.0, |m| m.order)))
                .collect();
            children.sort_by(|a, b| a.1.total_cmp(&b.1));
            if let Some(view) = world.node_mut(key).and_then(|m| m.view_mut()) {
                view.children = children.into_iter().map(|(k, _)| k).collect();
            }
        }

        if let (Some(content), Some(view)) = (
            node.view(),
            world.node_mut(key).and_then(|m| m.view_mut()),
        ) {
            if view.paint_tracker != content.paint_tracker {
                view.paint_tracker = content.paint_tracker;
                view.target_dirty = true;
                copies.tracker_copies += 1;
            }
        }

        // Retain before release so a key kept across the change survives.
        for k in retained {
            world.retain_node(k);
        }
        for k in released {
            world.release_node(k);
        }
        trace!(node = %id, ?flags, "Node synced");
        Ok(())
    }
}
