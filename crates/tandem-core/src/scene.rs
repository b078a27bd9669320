//! # Scene Module
//!
//! The producer-owned scene graph.
//!
//! ## Responsibilities
//! - **Arena**: nodes live in generation-checked slots; stale ids are rejected.
//! - **Setters**: each setter flips exactly one dirty category and is a no-op
//!   when the value does not change.
//! - **Repaint Propagation**: changes travel upward immediately, bumping the
//!   paint tracker of every enclosing view, marking mask owners and notifying
//!   view-reference users and external listeners.
//!
//! Parent, mask-owner and view-user links are plain ids. Nothing in the
//! scene owns another node through them.

use crate::dirty::{DirtyFlags, DirtyState};
use crate::errors::RenderError;
use crate::node::{NodeContent, NodeKind, Paint, ViewContent, ViewListener};
use crate::render::MirrorKey;
use crate::sync::SyncStats;
use crate::texture::ImageTexture;
use crate::types::{BlendMode, ColorMatrix};
use glam::{Affine2, Vec2};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Generation-checked index into the scene arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// A canvas object edited by the producer thread.
pub struct SceneNode {
    pub(crate) position: Vec2,
    pub(crate) size: Vec2,
    pub(crate) transform: Affine2,
    pub(crate) color_transform: ColorMatrix,
    pub(crate) order: f32,
    pub(crate) transparency: f32,
    pub(crate) blend_mode: BlendMode,
    pub(crate) visible: bool,
    pub(crate) mask: Option<NodeId>,
    pub(crate) parent: Option<NodeId>,
    /// Nodes using this one as their mask.
    pub(crate) mask_owners: Vec<NodeId>,
    /// Canvas views showing this view.
    pub(crate) view_users: Vec<NodeId>,
    pub(crate) content: NodeContent,
    pub(crate) dirty: DirtyState,
    pub(crate) mirror: Option<MirrorKey>,
    pub(crate) sync_in_progress: bool,
}

impl SceneNode {
    fn new(content: NodeContent) -> Self {
        Self {
            position: Vec2::ZERO,
            size: Vec2::ZERO,
            transform: Affine2::IDENTITY,
            color_transform: ColorMatrix::IDENTITY,
            order: 0.0,
            transparency: 1.0,
            blend_mode: BlendMode::Normal,
            visible: true,
            mask: None,
            parent: None,
            mask_owners: Vec::new(),
            view_users: Vec::new(),
            content,
            dirty: DirtyState::new(),
            mirror: None,
            sync_in_progress: false,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.content.kind()
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn size(&self) -> Vec2 {
        self.size
    }

    pub fn transform(&self) -> Affine2 {
        self.transform
    }

    pub fn color_transform(&self) -> ColorMatrix {
        self.color_transform
    }

    pub fn order(&self) -> f32 {
        self.order
    }

    pub fn transparency(&self) -> f32 {
        self.transparency
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn mask(&self) -> Option<NodeId> {
        self.mask
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn mask_owners(&self) -> &[NodeId] {
        &self.mask_owners
    }

    pub fn view_users(&self) -> &[NodeId] {
        &self.view_users
    }

    pub fn content(&self) -> &NodeContent {
        &self.content
    }

    pub fn dirty(&self) -> &DirtyState {
        &self.dirty
    }

    pub fn mirror(&self) -> Option<MirrorKey> {
        self.mirror
    }

    pub fn sync_in_progress(&self) -> bool {
        self.sync_in_progress
    }

    pub(crate) fn view(&self) -> Option<&ViewContent> {
        match &self.content {
            NodeContent::View(view) => Some(view),
            _ => None,
        }
    }

    fn view_mut(&mut self) -> Option<&mut ViewContent> {
        match &mut self.content {
            NodeContent::View(view) => Some(view),
            _ => None,
        }
    }
}

struct Slot {
    generation: u32,
    node: Option<SceneNode>,
}

/// Arena of scene nodes.
#[derive(Default)]
pub struct SceneGraph {
    slots: Vec<Slot>,
    free_indices: Vec<u32>,
    /// Mirrors of destroyed nodes, released into the render world at the
    /// next sync.
    pub(crate) released: Vec<MirrorKey>,
    pub(crate) stats: SyncStats,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, content: NodeContent) -> NodeId {
        let node = SceneNode::new(content);
        if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    pub fn create_paint(&mut self, paint: Paint) -> NodeId {
        self.insert(NodeContent::Paint(paint))
    }

    pub fn create_image(&mut self, texture: Option<Arc<ImageTexture>>) -> NodeId {
        self.insert(NodeContent::Image(texture))
    }

    pub fn create_view(&mut self) -> NodeId {
        self.insert(NodeContent::View(ViewContent::default()))
    }

    /// A node drawing the render target of `view`.
    pub fn create_canvas_view(&mut self, view: Option<NodeId>) -> Result<NodeId, RenderError> {
        if let Some(view) = view {
            self.expect_kind(view, NodeKind::View)?;
        }
        let id = self.insert(NodeContent::CanvasView(None));
        self.set_canvas_view(id, view)?;
        Ok(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get_node(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_node(&self, id: NodeId) -> Option<&SceneNode> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn get_node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    /// Like [`get_node`](Self::get_node) but reports stale ids.
    pub fn node(&self, id: NodeId) -> Result<&SceneNode, RenderError> {
        self.get_node(id)
            .ok_or_else(|| RenderError::invalid(format!("unknown node {id}")))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut SceneNode, RenderError> {
        self.get_node_mut(id)
            .ok_or_else(|| RenderError::invalid(format!("unknown node {id}")))
    }

    fn expect_kind(&self, id: NodeId, kind: NodeKind) -> Result<&SceneNode, RenderError> {
        let node = self.node(id)?;
        if node.kind() != kind {
            return Err(RenderError::invalid(format!(
                "node {id} is a {:?}, expected a {kind:?}",
                node.kind()
            )));
        }
        Ok(node)
    }

    pub fn children(&self, view: NodeId) -> Result<&[NodeId], RenderError> {
        Ok(self
            .node(view)?
            .view()
            .map(|v| v.children.as_slice())
            .unwrap_or_default())
    }

    pub fn paint_tracker(&self, view: NodeId) -> Result<u64, RenderError> {
        self.expect_kind(view, NodeKind::View)?
            .view()
            .map(|v| v.paint_tracker)
            .ok_or_else(|| RenderError::invalid(format!("node {view} is not a view")))
    }

    pub fn dirty_flags(&self, id: NodeId) -> Result<DirtyFlags, RenderError> {
        Ok(self.node(id)?.dirty.flags())
    }

    pub fn mirror_key(&self, id: NodeId) -> Result<Option<MirrorKey>, RenderError> {
        Ok(self.node(id)?.mirror)
    }

    /// Writes `value` through `field`, marking `flag` if it changed.
    fn assign<T: PartialEq>(
        &mut self,
        id: NodeId,
        flag: DirtyFlags,
        field: impl FnOnce(&mut SceneNode) -> &mut T,
        value: T,
    ) -> Result<bool, RenderError> {
        self.assign_with(id, flag, field, value, Repaint::Appearance)
    }

    fn assign_with<T: PartialEq>(
        &mut self,
        id: NodeId,
        flag: DirtyFlags,
        field: impl FnOnce(&mut SceneNode) -> &mut T,
        value: T,
        repaint: Repaint,
    ) -> Result<bool, RenderError> {
        let node = self.node_mut(id)?;
        let slot = field(&mut *node);
        if *slot == value {
            return Ok(false);
        }
        *slot = value;
        node.dirty.mark(flag);
        self.repaint_with(id, repaint);
        Ok(true)
    }

    pub fn set_position(&mut self, id: NodeId, position: Vec2) -> Result<(), RenderError> {
        self.assign_with(
            id,
            DirtyFlags::GEOMETRY,
            |n| &mut n.position,
            position,
            Repaint::Placement,
        )?;
        Ok(())
    }

    pub fn set_size(&mut self, id: NodeId, size: Vec2) -> Result<(), RenderError> {
        if !size.is_finite() || size.min_element() < 0.0 {
            return Err(RenderError::invalid(format!("invalid size {size}")));
        }
        self.assign(id, DirtyFlags::GEOMETRY, |n| &mut n.size, size)?;
        Ok(())
    }

    pub fn set_transform(&mut self, id: NodeId, transform: Affine2) -> Result<(), RenderError> {
        self.assign_with(
            id,
            DirtyFlags::TRANSFORM,
            |n| &mut n.transform,
            transform,
            Repaint::Placement,
        )?;
        Ok(())
    }

    pub fn set_color_transform(
        &mut self,
        id: NodeId,
        color_transform: ColorMatrix,
    ) -> Result<(), RenderError> {
        self.assign(
            id,
            DirtyFlags::COLOR_TRANSFORM,
            |n| &mut n.color_transform,
            color_transform,
        )?;
        Ok(())
    }

    /// Render order among siblings. The parent re-sorts its children at the
    /// next sync.
    pub fn set_order(&mut self, id: NodeId, order: f32) -> Result<(), RenderError> {
        if order.is_nan() {
            return Err(RenderError::invalid("render order must not be NaN"));
        }
        if self.assign(id, DirtyFlags::PARAMETERS, |n| &mut n.order, order)? {
            if let Some(parent) = self.node(id)?.parent {
                self.node_mut(parent)?.dirty.mark(DirtyFlags::CONTENT);
            }
        }
        Ok(())
    }

    /// Clamped to `[0, 1]`.
    pub fn set_transparency(&mut self, id: NodeId, transparency: f32) -> Result<(), RenderError> {
        if transparency.is_nan() {
            return Err(RenderError::invalid("transparency must not be NaN"));
        }
        let value = transparency.clamp(0.0, 1.0);
        self.assign(id, DirtyFlags::PARAMETERS, |n| &mut n.transparency, value)?;
        Ok(())
    }

    pub fn set_blend_mode(&mut self, id: NodeId, blend_mode: BlendMode) -> Result<(), RenderError> {
        self.assign(id, DirtyFlags::PARAMETERS, |n| &mut n.blend_mode, blend_mode)?;
        Ok(())
    }

    pub fn set_visible(&mut self, id: NodeId, visible: bool) -> Result<(), RenderError> {
        self.assign(id, DirtyFlags::PARAMETERS, |n| &mut n.visible, visible)?;
        Ok(())
    }

    /// Uses the subtree at `mask` as coverage for `id`.
    pub fn set_mask(&mut self, id: NodeId, mask: Option<NodeId>) -> Result<(), RenderError> {
        let previous = self.node(id)?.mask;
        if let Some(mask) = mask {
            self.node(mask)?;
            if mask == id {
                return Err(RenderError::invalid(format!("node {id} cannot mask itself")));
            }
        }
        if previous == mask {
            return Ok(());
        }
        if let Some(old) = previous.and_then(|m| self.get_node_mut(m)) {
            old.mask_owners.retain(|&o| o != id);
        }
        if let Some(new) = mask {
            self.node_mut(new)?.mask_owners.push(id);
        }
        self.assign(id, DirtyFlags::PARAMETERS, |n| &mut n.mask, mask)?;
        Ok(())
    }

    /// Fails if `id` has no mask.
    pub fn remove_mask(&mut self, id: NodeId) -> Result<(), RenderError> {
        if self.node(id)?.mask.is_none() {
            return Err(RenderError::invalid(format!("node {id} has no mask")));
        }
        self.set_mask(id, None)
    }

    pub fn set_paint(&mut self, id: NodeId, paint: Paint) -> Result<(), RenderError> {
        self.expect_kind(id, NodeKind::Paint)?;
        let node = self.node_mut(id)?;
        if matches!(&node.content, NodeContent::Paint(p) if *p == paint) {
            return Ok(());
        }
        node.content = NodeContent::Paint(paint);
        node.dirty.mark(DirtyFlags::CONTENT);
        self.repaint(id);
        Ok(())
    }

    pub fn set_image(
        &mut self,
        id: NodeId,
        texture: Option<Arc<ImageTexture>>,
    ) -> Result<(), RenderError> {
        self.expect_kind(id, NodeKind::Image)?;
        let node = self.node_mut(id)?;
        let unchanged = match (&node.content, &texture) {
            (NodeContent::Image(Some(a)), Some(b)) => Arc::ptr_eq(a, b),
            (NodeContent::Image(None), None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }
        node.content = NodeContent::Image(texture);
        node.dirty.mark(DirtyFlags::CONTENT);
        self.repaint(id);
        Ok(())
    }

    /// Points a canvas view at the view whose render target it draws.
    pub fn set_canvas_view(&mut self, id: NodeId, view: Option<NodeId>) -> Result<(), RenderError> {
        let previous = match self.expect_kind(id, NodeKind::CanvasView)?.content {
            NodeContent::CanvasView(previous) => previous,
            _ => None,
        };
        if let Some(view) = view {
            self.expect_kind(view, NodeKind::View)?;
        }
        if previous == view {
            return Ok(());
        }
        if let Some(old) = previous.and_then(|v| self.get_node_mut(v)) {
            old.view_users.retain(|&u| u != id);
        }
        if let Some(new) = view {
            self.node_mut(new)?.view_users.push(id);
        }
        let node = self.node_mut(id)?;
        node.content = NodeContent::CanvasView(view);
        node.dirty.mark(DirtyFlags::CONTENT);
        self.repaint(id);
        Ok(())
    }

    fn is_ancestor(&self, ancestor: NodeId, mut id: NodeId) -> bool {
        while let Some(parent) = self.get_node(id).and_then(|n| n.parent) {
            if parent == ancestor {
                return true;
            }
            id = parent;
        }
        false
    }

    /// Appends `child` to `view`, detaching it from its previous parent.
    pub fn add_child(&mut self, view: NodeId, child: NodeId) -> Result<(), RenderError> {
        self.expect_kind(view, NodeKind::View)?;
        let current_parent = self.node(child)?.parent;
        if child == view || self.is_ancestor(child, view) {
            return Err(RenderError::invalid(format!(
                "adding {child} to {view} would create a cycle"
            )));
        }
        if current_parent == Some(view) {
            return Ok(());
        }
        if let Some(old) = current_parent {
            self.remove_child(old, child)?;
        }

        if let Some(content) = self.node_mut(view)?.view_mut() {
            content.children.push(child);
        }
        self.node_mut(child)?.parent = Some(view);
        self.node_mut(view)?.dirty.mark(DirtyFlags::CONTENT);
        self.bump_view(view);
        trace!(%view, %child, "Child added");
        Ok(())
    }

    /// Fails if `child` is not a child of `view`.
    pub fn remove_child(&mut self, view: NodeId, child: NodeId) -> Result<(), RenderError> {
        self.expect_kind(view, NodeKind::View)?;
        let content = self
            .node_mut(view)?
            .view_mut()
            .ok_or_else(|| RenderError::invalid(format!("node {view} is not a view")))?;
        let position = content
            .children
            .iter()
            .position(|&c| c == child)
            .ok_or_else(|| RenderError::invalid(format!("node {child} is not a child of {view}")))?;
        content.children.remove(position);

        if let Some(node) = self.get_node_mut(child) {
            node.parent = None;
        }
        self.node_mut(view)?.dirty.mark(DirtyFlags::CONTENT);
        self.bump_view(view);
        Ok(())
    }

    pub fn add_view_listener(
        &mut self,
        view: NodeId,
        listener: Arc<dyn ViewListener>,
    ) -> Result<(), RenderError> {
        self.expect_kind(view, NodeKind::View)?;
        if let Some(content) = self.node_mut(view)?.view_mut() {
            content.listeners.push(listener);
        }
        Ok(())
    }

    /// Fails if `listener` was never registered on `view`.
    pub fn remove_view_listener(
        &mut self,
        view: NodeId,
        listener: &Arc<dyn ViewListener>,
    ) -> Result<(), RenderError> {
        self.expect_kind(view, NodeKind::View)?;
        let content = self
            .node_mut(view)?
            .view_mut()
            .ok_or_else(|| RenderError::invalid(format!("node {view} is not a view")))?;
        let position = content
            .listeners
            .iter()
            .position(|l| same_listener(l, listener))
            .ok_or_else(|| RenderError::invalid(format!("listener not registered on {view}")))?;
        content.listeners.remove(position);
        Ok(())
    }

    /// Destroys a node and, recursively, its children. References to it held
    /// by mask owners and canvas views are cleared; its mirror is released
    /// at the next sync.
    pub fn destroy_node(&mut self, id: NodeId) -> Result<(), RenderError> {
        // 1. Check the node exists
        let node = self.node(id)?;

        // 2. Collect links (to avoid holding borrows on the arena)
        let parent = node.parent;
        let children = node.view().map(|v| v.children.clone()).unwrap_or_default();
        let mask = node.mask;
        let mask_owners = node.mask_owners.clone();
        let view_users = node.view_users.clone();
        let referenced = match node.content {
            NodeContent::CanvasView(view) => view,
            _ => None,
        };

        // 3. Detach from parent
        if let Some(parent) = parent {
            self.remove_child(parent, id)?;
        }

        // 4. Recursively destroy children
        for child in children {
            self.destroy_node(child)?;
        }

        // 5. Nodes masked by this one lose their mask
        for owner in mask_owners {
            if let Some(node) = self.get_node_mut(owner) {
                node.mask = None;
                node.dirty.mark(DirtyFlags::PARAMETERS);
                self.repaint(owner);
            }
        }

        // 6. Canvas views showing this one go blank
        for user in view_users {
            if let Some(node) = self.get_node_mut(user) {
                node.content = NodeContent::CanvasView(None);
                node.dirty.mark(DirtyFlags::CONTENT);
                self.repaint(user);
            }
        }

        // 7. Drop outgoing back references
        if let Some(node) = mask.and_then(|m| self.get_node_mut(m)) {
            node.mask_owners.retain(|&o| o != id);
        }
        if let Some(node) = referenced.and_then(|v| self.get_node_mut(v)) {
            node.view_users.retain(|&u| u != id);
        }

        // 8. Free the slot and notify listeners
        let slot = &mut self.slots[id.index as usize];
        let Some(node) = slot.node.take() else {
            return Ok(());
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free_indices.push(id.index);
        self.released.extend(node.mirror);
        if let Some(view) = node.view() {
            for listener in &view.listeners {
                listener.on_source_destroyed();
            }
        }
        debug!(%id, "Node destroyed");
        Ok(())
    }

    /// Propagates a change of `id` to everything that displays it.
    fn repaint(&mut self, id: NodeId) {
        self.repaint_with(id, Repaint::Appearance);
    }

    fn repaint_with(&mut self, id: NodeId, repaint: Repaint) {
        let Some(node) = self.get_node_mut(id) else {
            return;
        };
        let owners = node.mask_owners.clone();
        // Mask targets are rendered at the origin, so moving a mask only
        // changes where its owners sample it.
        if repaint == Repaint::Appearance {
            for &owner in &owners {
                if let Some(owner) = self.get_node_mut(owner) {
                    owner.dirty.mark(DirtyFlags::MASK_CONTENT);
                }
            }
        }

        let Some(node) = self.get_node_mut(id) else {
            return;
        };
        if !node.dirty.raise_parent_paint() {
            return;
        }
        if let Some(parent) = node.parent {
            self.bump_view(parent);
        }
        for owner in owners {
            self.repaint(owner);
        }
    }

    /// Something below `view` changed appearance.
    fn bump_view(&mut self, view: NodeId) {
        let Some(node) = self.get_node_mut(view) else {
            return;
        };
        let users = node.view_users.clone();
        if let Some(content) = node.view_mut() {
            content.paint_tracker += 1;
            for listener in &content.listeners {
                listener.on_source_requires_sync();
            }
        }
        for user in users {
            self.repaint(user);
        }
        self.repaint(view);
    }
}

/// What a producer edit changed about a node's look.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repaint {
    /// Where the node lands; its own pixels are unchanged.
    Placement,
    Appearance,
}

fn same_listener(a: &Arc<dyn ViewListener>, b: &Arc<dyn ViewListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        destroyed: AtomicUsize,
        requires_sync: AtomicUsize,
    }

    impl ViewListener for CountingListener {
        fn on_source_destroyed(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_source_requires_sync(&self) {
            self.requires_sync.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn clean(scene: &mut SceneGraph, id: NodeId) {
        scene.node_mut(id).unwrap().dirty.clear();
    }

    #[test]
    fn stale_ids_are_rejected() {
        let mut scene = SceneGraph::new();
        let id = scene.create_view();
        scene.destroy_node(id).unwrap();
        let reused = scene.create_view();
        assert_ne!(id, reused);
        assert!(matches!(
            scene.set_visible(id, false),
            Err(RenderError::InvalidParam(_))
        ));
    }

    #[test]
    fn setting_the_same_value_twice_marks_once() {
        let mut scene = SceneGraph::new();
        let view = scene.create_view();
        let paint = scene.create_paint(Paint::rectangle(Color::WHITE));
        scene.add_child(view, paint).unwrap();
        clean(&mut scene, paint);
        clean(&mut scene, view);

        scene.set_position(paint, Vec2::new(3.0, 4.0)).unwrap();
        let tracker = scene.paint_tracker(view).unwrap();
        assert_eq!(scene.dirty_flags(paint).unwrap(), DirtyFlags::GEOMETRY);

        clean(&mut scene, paint);
        scene.set_position(paint, Vec2::new(3.0, 4.0)).unwrap();
        assert!(scene.dirty_flags(paint).unwrap().is_empty());
        assert!(!scene.node(paint).unwrap().dirty().is_pending_sync());
        assert_eq!(scene.paint_tracker(view).unwrap(), tracker);
    }

    #[test]
    fn changes_bump_every_enclosing_view() {
        let mut scene = SceneGraph::new();
        let outer = scene.create_view();
        let inner = scene.create_view();
        let leaf = scene.create_paint(Paint::rectangle(Color::WHITE));
        scene.add_child(outer, inner).unwrap();
        scene.add_child(inner, leaf).unwrap();
        for id in [outer, inner, leaf] {
            clean(&mut scene, id);
        }
        let before = (
            scene.paint_tracker(outer).unwrap(),
            scene.paint_tracker(inner).unwrap(),
        );

        scene.set_transparency(leaf, 0.5).unwrap();
        assert!(scene.paint_tracker(inner).unwrap() > before.1);
        assert!(scene.paint_tracker(outer).unwrap() > before.0);
        // The tracker, not a dirty flag, carries the change upward.
        assert!(scene.dirty_flags(inner).unwrap().is_empty());
    }

    #[test]
    fn add_child_moves_between_parents_and_rejects_cycles() {
        let mut scene = SceneGraph::new();
        let a = scene.create_view();
        let b = scene.create_view();
        let leaf = scene.create_paint(Paint::rectangle(Color::WHITE));
        scene.add_child(a, leaf).unwrap();
        scene.add_child(b, leaf).unwrap();
        assert!(scene.children(a).unwrap().is_empty());
        assert_eq!(scene.children(b).unwrap(), &[leaf]);
        assert_eq!(scene.node(leaf).unwrap().parent(), Some(b));

        scene.add_child(a, b).unwrap();
        assert!(scene.add_child(b, a).is_err());
        assert!(scene.add_child(a, a).is_err());
    }

    #[test]
    fn removing_unregistered_links_is_invalid() {
        let mut scene = SceneGraph::new();
        let view = scene.create_view();
        let other = scene.create_paint(Paint::rectangle(Color::WHITE));
        assert!(matches!(
            scene.remove_child(view, other),
            Err(RenderError::InvalidParam(_))
        ));
        assert!(matches!(
            scene.remove_mask(other),
            Err(RenderError::InvalidParam(_))
        ));
        let listener: Arc<dyn ViewListener> = Arc::new(CountingListener::default());
        assert!(scene.remove_view_listener(view, &listener).is_err());
    }

    #[test]
    fn mask_changes_mark_owners() {
        let mut scene = SceneGraph::new();
        let masked = scene.create_paint(Paint::rectangle(Color::WHITE));
        let mask = scene.create_paint(Paint::ellipse(Color::WHITE));
        scene.set_mask(masked, Some(mask)).unwrap();
        assert_eq!(scene.node(mask).unwrap().mask_owners(), &[masked]);
        clean(&mut scene, masked);
        clean(&mut scene, mask);

        scene.set_size(mask, Vec2::splat(10.0)).unwrap();
        assert_eq!(scene.dirty_flags(masked).unwrap(), DirtyFlags::MASK_CONTENT);

        // A move only changes where the mask is sampled.
        clean(&mut scene, masked);
        scene.set_position(mask, Vec2::new(2.0, 0.0)).unwrap();
        scene.set_transform(mask, Affine2::from_angle(0.5)).unwrap();
        assert!(scene.dirty_flags(masked).unwrap().is_empty());

        scene.remove_mask(masked).unwrap();
        assert!(scene.node(mask).unwrap().mask_owners().is_empty());
    }

    #[test]
    fn listeners_hear_changes_and_destruction() {
        let mut scene = SceneGraph::new();
        let view = scene.create_view();
        let leaf = scene.create_paint(Paint::rectangle(Color::WHITE));
        scene.add_child(view, leaf).unwrap();
        clean(&mut scene, view);
        clean(&mut scene, leaf);

        let listener = Arc::new(CountingListener::default());
        scene.add_view_listener(view, listener.clone()).unwrap();
        scene.set_visible(leaf, false).unwrap();
        assert_eq!(listener.requires_sync.load(Ordering::SeqCst), 1);

        scene.destroy_node(view).unwrap();
        assert_eq!(listener.destroyed.load(Ordering::SeqCst), 1);
        assert!(!scene.contains(leaf));
    }

    #[test]
    fn destroying_a_view_blanks_canvas_views_showing_it() {
        let mut scene = SceneGraph::new();
        let view = scene.create_view();
        let canvas = scene.create_canvas_view(Some(view)).unwrap();
        assert_eq!(scene.node(view).unwrap().view_users(), &[canvas]);

        scene.destroy_node(view).unwrap();
        assert!(matches!(
            scene.node(canvas).unwrap().content(),
            NodeContent::CanvasView(None)
        ));
    }
}
