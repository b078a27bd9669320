use crate::node::{NodeKind, Paint};
use crate::render::target::RenderTarget;
use crate::texture::ImageTexture;
use crate::types::{BlendMode, Color, ColorMatrix};
use glam::{Affine2, Vec2};
use std::sync::Arc;

slotmap::new_key_type! {
    /// Handle to a mirrored node inside the render world.
    pub struct MirrorKey;
}

/// Render-side copy of a scene node.
///
/// Only written during sync, while the render thread is parked at the
/// barrier; only read by the render thread between syncs.
#[derive(Debug)]
pub struct MirroredNode {
    /// Owning producer node plus every mirrored node, window or capture
    /// that refers to this one.
    pub(crate) refcount: u32,
    pub(crate) size: Vec2,
    /// `translate(position) * transform` of the producer node.
    pub(crate) transform: Affine2,
    pub(crate) color_transform: ColorMatrix,
    pub(crate) order: f32,
    pub(crate) transparency: f32,
    pub(crate) blend_mode: BlendMode,
    pub(crate) visible: bool,
    pub(crate) mask: Option<MirrorKey>,
    pub(crate) content: MirroredContent,
    /// Offscreen copy of this node, rendered when something uses it as a mask.
    pub(crate) mask_target: Option<RenderTarget>,
    pub(crate) mask_target_dirty: bool,
    pub(crate) mask_resize: bool,
}

#[derive(Debug)]
pub enum MirroredContent {
    Paint(Paint),
    Image(Option<Arc<ImageTexture>>),
    View(MirroredView),
    CanvasView(Option<MirrorKey>),
}

#[derive(Debug, Default)]
pub struct MirroredView {
    /// Sorted by render order at sync time.
    pub(crate) children: Vec<MirrorKey>,
    pub(crate) paint_tracker: u64,
    pub(crate) target: Option<RenderTarget>,
    pub(crate) target_dirty: bool,
    pub(crate) resize_requested: bool,
}

impl MirroredNode {
    pub(crate) fn new(kind: NodeKind) -> Self {
        let content = match kind {
            NodeKind::Paint => MirroredContent::Paint(Paint::rectangle(Color::TRANSPARENT)),
            NodeKind::Image => MirroredContent::Image(None),
            NodeKind::View => MirroredContent::View(MirroredView {
                target_dirty: true,
                ..Default::default()
            }),
            NodeKind::CanvasView => MirroredContent::CanvasView(None),
        };
        Self {
            refcount: 1,
            size: Vec2::ZERO,
            transform: Affine2::IDENTITY,
            color_transform: ColorMatrix::IDENTITY,
            order: 0.0,
            transparency: 1.0,
            blend_mode: BlendMode::Normal,
            visible: true,
            mask: None,
            content,
            mask_target: None,
            mask_target_dirty: true,
            mask_resize: false,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.content {
            MirroredContent::Paint(_) => NodeKind::Paint,
            MirroredContent::Image(_) => NodeKind::Image,
            MirroredContent::View(_) => NodeKind::View,
            MirroredContent::CanvasView(_) => NodeKind::CanvasView,
        }
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
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

    pub fn mask(&self) -> Option<MirrorKey> {
        self.mask
    }

    pub fn content(&self) -> &MirroredContent {
        &self.content
    }

    /// Mirrored children of a view, empty for other kinds.
    pub fn children(&self) -> &[MirrorKey] {
        match &self.content {
            MirroredContent::View(view) => &view.children,
            _ => &[],
        }
    }

    pub fn paint_tracker(&self) -> Option<u64> {
        self.view().map(|v| v.paint_tracker)
    }

    pub fn referenced_view(&self) -> Option<MirrorKey> {
        match self.content {
            MirroredContent::CanvasView(key) => key,
            _ => None,
        }
    }

    /// The view's cached render target, if it was ever prepared.
    pub fn render_target(&self) -> Option<&RenderTarget> {
        self.view().and_then(|v| v.target.as_ref())
    }

    pub fn is_render_target_dirty(&self) -> bool {
        self.view().is_some_and(|v| v.target_dirty)
    }

    pub fn mask_target(&self) -> Option<&RenderTarget> {
        self.mask_target.as_ref()
    }

    pub fn is_mask_target_dirty(&self) -> bool {
        self.mask_target_dirty
    }

    pub(crate) fn view(&self) -> Option<&MirroredView> {
        match &self.content {
            MirroredContent::View(view) => Some(view),
            _ => None,
        }
    }

    pub(crate) fn view_mut(&mut self) -> Option<&mut MirroredView> {
        match &mut self.content {
            MirroredContent::View(view) => Some(view),
            _ => None,
        }
    }

    /// Size changed: every target of this node must resize before use.
    pub(crate) fn request_resize(&mut self) {
        self.mask_resize = true;
        if let Some(view) = self.view_mut() {
            view.resize_requested = true;
        }
    }

    /// Moves out every GPU-side resource for delayed release.
    pub(crate) fn take_resources(&mut self) -> (Vec<RenderTarget>, Option<Arc<ImageTexture>>) {
        let mut targets: Vec<RenderTarget> = self.mask_target.take().into_iter().collect();
        let mut texture = None;
        match &mut self.content {
            MirroredContent::View(view) => targets.extend(view.target.take()),
            MirroredContent::Image(image) => texture = image.take(),
            _ => {}
        }
        (targets, texture)
    }
}
