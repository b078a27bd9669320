use crate::render::mirror::MirroredNode;
use crate::types::{to_tiny_transform, Color, ColorMatrix};
use glam::{Affine2, Vec2};
use std::sync::Arc;
use tiny_skia::Mask;

/// Accumulated state while walking a mirrored subtree into one target.
///
/// The same draw code serves the window back buffer and every offscreen
/// target; only the starting context differs.
#[derive(Clone)]
pub struct RenderContext {
    pub target_width: u32,
    pub target_height: u32,
    pub viewport_offset: Vec2,
    pub viewport_size: Vec2,
    pub transform: Affine2,
    pub color_transform: ColorMatrix,
    pub transparency: f32,
    /// Coverage mask in target pixels. Mask textures are resolved through
    /// their mask-space transform when the masked node is entered.
    pub mask: Option<Arc<Mask>>,
    /// Clip bounds in target pixels.
    pub clip_min: Vec2,
    pub clip_max: Vec2,
}

impl RenderContext {
    /// Full-target context with the viewport at the origin.
    pub fn for_target(width: u32, height: u32) -> Self {
        let size = Vec2::new(width as f32, height as f32);
        Self {
            target_width: width,
            target_height: height,
            viewport_offset: Vec2::ZERO,
            viewport_size: size,
            transform: Affine2::IDENTITY,
            color_transform: ColorMatrix::IDENTITY,
            transparency: 1.0,
            mask: None,
            clip_min: Vec2::ZERO,
            clip_max: size,
        }
    }

    /// Context for rendering a node into its own offscreen target: the
    /// viewport transform composed with the inverse of the node transform,
    /// so entering the node lands its content at the target origin.
    /// `None` when the node transform cannot be inverted.
    pub fn origin_identity(width: u32, height: u32, node_transform: &Affine2) -> Option<Self> {
        if node_transform.matrix2.determinant().abs() <= f32::EPSILON {
            return None;
        }
        let mut ctx = Self::for_target(width, height);
        ctx.transform = Affine2::from_translation(ctx.viewport_offset) * node_transform.inverse();
        Some(ctx)
    }

    pub fn is_clip_degenerate(&self) -> bool {
        self.clip_max.x <= self.clip_min.x || self.clip_max.y <= self.clip_min.y
    }

    /// Context for drawing `node`'s content inside this one.
    pub(crate) fn enter(&self, node: &MirroredNode) -> RenderContext {
        let transform = self.transform * node.transform;
        let (min, max) = bounds(&transform, node.size);
        RenderContext {
            transform,
            color_transform: node.color_transform.then(&self.color_transform),
            transparency: self.transparency * node.transparency,
            clip_min: self.clip_min.max(min),
            clip_max: self.clip_max.min(max),
            ..self.clone()
        }
    }

    pub(crate) fn with_mask(mut self, mask: Option<Arc<Mask>>) -> Self {
        self.mask = mask;
        self
    }

    pub(crate) fn tiny_transform(&self) -> tiny_skia::Transform {
        to_tiny_transform(&self.transform)
    }

    /// Applies the accumulated color transform and transparency to a color.
    pub(crate) fn shade(&self, color: Color) -> Color {
        let c = self.color_transform.apply(color);
        c.with_alpha(c.a * self.transparency.clamp(0.0, 1.0))
    }
}

/// Axis-aligned bounds of the `(0,0)..size` rectangle under `transform`.
fn bounds(transform: &Affine2, size: Vec2) -> (Vec2, Vec2) {
    let corners = [
        Vec2::ZERO,
        Vec2::new(size.x, 0.0),
        Vec2::new(0.0, size.y),
        size,
    ]
    .map(|p| transform.transform_point2(p));
    let min = corners.iter().fold(Vec2::splat(f32::INFINITY), |a, &b| a.min(b));
    let max = corners.iter().fold(Vec2::splat(f32::NEG_INFINITY), |a, &b| a.max(b));
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    #[test]
    fn origin_identity_cancels_node_transform() {
        let mut node = MirroredNode::new(NodeKind::View);
        node.size = Vec2::new(10.0, 10.0);
        node.transform = Affine2::from_translation(Vec2::new(30.0, 40.0));
        let ctx = RenderContext::origin_identity(10, 10, &node.transform)
            .unwrap()
            .enter(&node);
        let p = ctx.transform.transform_point2(Vec2::new(1.0, 2.0));
        assert!((p - Vec2::new(1.0, 2.0)).length() < 1e-4);
        assert!(!ctx.is_clip_degenerate());
    }

    #[test]
    fn node_outside_target_has_degenerate_clip() {
        let mut node = MirroredNode::new(NodeKind::Paint);
        node.size = Vec2::new(5.0, 5.0);
        node.transform = Affine2::from_translation(Vec2::new(100.0, 0.0));
        let ctx = RenderContext::for_target(50, 50).enter(&node);
        assert!(ctx.is_clip_degenerate());
    }

    #[test]
    fn singular_transform_has_no_offscreen_context() {
        let squash = Affine2::from_scale(Vec2::new(0.0, 1.0));
        assert!(RenderContext::origin_identity(4, 4, &squash).is_none());
    }
}
