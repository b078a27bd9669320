//! # Canvas Renderer
//!
//! Draws mirrored subtrees into pixmaps on the render thread.
//!
//! ## Responsibilities
//! - **Dependencies**: `prepare_dependencies` brings every render target a
//!   subtree samples (view targets, mask targets) up to date before the
//!   subtree itself is drawn.
//! - **Target Caching**: `prepare_render_target` re-renders a view's target
//!   only when its content or size changed.
//! - **Traversal**: `draw_node` walks children in order, applying transform,
//!   color transform, transparency, blending and masking.
//!
//! Masked and non-normal blended nodes are drawn into a layer first and then
//! composited, so the blend or mask applies to the node as a whole.

use crate::errors::RenderError;
use crate::node::Paint;
use crate::render::context::RenderContext;
use crate::render::mirror::{MirrorKey, MirroredContent, MirroredNode};
use crate::render::target::RenderTarget;
use crate::render::world::RenderWorld;
use crate::types::{to_tiny_transform, BlendMode, Color};
use glam::{Affine2, Mat2, Vec2};
use std::sync::Arc;
use tiny_skia::{
    ColorU8, FillRule, FilterQuality, Mask, MaskType, Pixmap, PixmapPaint, Stroke, Transform,
};
use tracing::trace;

/// Maximum nesting of views, view references and masks.
pub const MAX_RENDER_DEPTH: usize = 100;

impl RenderWorld {
    /// Updates every offscreen target the subtree at `key` samples.
    pub(crate) fn prepare_dependencies(
        &mut self,
        key: MirrorKey,
        depth: usize,
    ) -> Result<(), RenderError> {
        if depth > MAX_RENDER_DEPTH {
            return Err(RenderError::RecursionLimit);
        }
        let Some(node) = self.nodes.get(key) else {
            return Ok(());
        };
        if !node.visible {
            return Ok(());
        }
        let mask = node.mask;
        let children = node.children().to_vec();
        let referenced = node.referenced_view();

        if let Some(mask) = mask {
            self.prepare_mask_target(mask, depth + 1)?;
        }
        for child in children {
            self.prepare_dependencies(child, depth + 1)?;
        }
        if let Some(view) = referenced {
            self.prepare_render_target_at(view, depth + 1)?;
        }
        Ok(())
    }

    /// Brings a view's render target up to date. Returns `true` if the
    /// target was re-rendered.
    pub fn prepare_render_target(&mut self, key: MirrorKey) -> Result<bool, RenderError> {
        self.prepare_render_target_at(key, 0)
    }

    fn prepare_render_target_at(&mut self, key: MirrorKey, depth: usize) -> Result<bool, RenderError> {
        if depth > MAX_RENDER_DEPTH {
            return Err(RenderError::RecursionLimit);
        }
        let device = self.device.clone();
        let Some(node) = self.nodes.get_mut(key) else {
            return Ok(false);
        };
        let (width, height) = device.pixel_size(node.size);
        let Some(view) = node.view_mut() else {
            return Ok(false);
        };
        if view.target.is_some() && !view.target_dirty && !view.resize_requested {
            return Ok(false);
        }

        let reallocated = match view.target.as_mut() {
            None => {
                view.target = Some(device.create_target(width, height)?);
                true
            }
            Some(target) if view.resize_requested => target.resize(width, height)?,
            Some(_) => false,
        };
        view.resize_requested = false;
        if !reallocated && !view.target_dirty {
            return Ok(false);
        }
        // Cleared first: a view reaching itself while rendering samples the
        // previous texture instead of recursing.
        view.target_dirty = false;
        let children = view.children.clone();

        for child in children {
            self.prepare_dependencies(child, depth + 1)?;
        }

        let Some(mut back) = self.view_target_mut(key).map(|t| t.begin()).transpose()? else {
            return Ok(false);
        };
        let result = match self.nodes.get(key) {
            Some(node) => match RenderContext::origin_identity(back.width(), back.height(), &node.transform) {
                // Only the transform: color, transparency, mask and blend of
                // the view apply wherever its texture is drawn.
                Some(mut ctx) => {
                    ctx.transform = ctx.transform * node.transform;
                    self.draw_content(node, &mut back, &ctx, depth + 1)
                }
                None => Ok(()),
            },
            None => Ok(()),
        };
        if let Some(target) = self.view_target_mut(key) {
            target.present(back);
        }
        self.stats.target_renders += 1;
        trace!(width, height, "View target rendered");
        result.map(|()| true)
    }

    fn view_target_mut(&mut self, key: MirrorKey) -> Option<&mut RenderTarget> {
        self.nodes.get_mut(key)?.view_mut()?.target.as_mut()
    }

    /// Renders a node used as a mask into its own target at the origin.
    fn prepare_mask_target(&mut self, key: MirrorKey, depth: usize) -> Result<(), RenderError> {
        if depth > MAX_RENDER_DEPTH {
            return Err(RenderError::RecursionLimit);
        }
        let device = self.device.clone();
        let Some(node) = self.nodes.get_mut(key) else {
            return Ok(());
        };
        if node.mask_target.is_some() && !node.mask_target_dirty && !node.mask_resize {
            return Ok(());
        }
        let (width, height) = device.pixel_size(node.size);
        let reallocated = match node.mask_target.as_mut() {
            None => {
                node.mask_target = Some(device.create_target(width, height)?);
                true
            }
            Some(target) if node.mask_resize => target.resize(width, height)?,
            Some(_) => false,
        };
        node.mask_resize = false;
        if !reallocated && !node.mask_target_dirty {
            return Ok(());
        }
        node.mask_target_dirty = false;

        self.prepare_dependencies(key, depth + 1)?;

        let Some(mut back) = self
            .nodes
            .get_mut(key)
            .and_then(|n| n.mask_target.as_mut())
            .map(|t| t.begin())
            .transpose()?
        else {
            return Ok(());
        };
        let result = match self
            .nodes
            .get(key)
            .and_then(|n| RenderContext::origin_identity(back.width(), back.height(), &n.transform))
        {
            Some(ctx) => self.draw_node(key, &mut back, &ctx, depth + 1),
            None => Ok(()),
        };
        if let Some(target) = self.nodes.get_mut(key).and_then(|n| n.mask_target.as_mut()) {
            target.present(back);
        }
        self.stats.mask_renders += 1;
        result
    }

    /// Draws the node at `key` into `pixmap` under `ctx`.
    pub(crate) fn draw_node(
        &self,
        key: MirrorKey,
        pixmap: &mut Pixmap,
        ctx: &RenderContext,
        depth: usize,
    ) -> Result<(), RenderError> {
        if depth > MAX_RENDER_DEPTH {
            return Err(RenderError::RecursionLimit);
        }
        let Some(node) = self.nodes.get(key) else {
            return Ok(());
        };
        if !node.visible || node.transparency <= 0.0 {
            return Ok(());
        }
        let node_ctx = ctx.enter(node);
        if node_ctx.is_clip_degenerate() {
            return Ok(());
        }

        let need_layer = node.mask.is_some() || node.blend_mode != BlendMode::Normal;
        if !need_layer {
            return self.draw_content(node, pixmap, &node_ctx, depth);
        }

        let mut layer = Pixmap::new(pixmap.width(), pixmap.height()).ok_or(
            RenderError::TargetAllocation {
                width: pixmap.width(),
                height: pixmap.height(),
            },
        )?;
        let result = self.draw_content(node, &mut layer, &node_ctx.clone().with_mask(None), depth);
        let mask = self.resolve_mask(node, &node_ctx, depth)?;

        let paint = PixmapPaint {
            blend_mode: node.blend_mode.to_tiny(),
            ..PixmapPaint::default()
        };
        pixmap.draw_pixmap(
            0,
            0,
            layer.as_ref(),
            &paint,
            Transform::identity(),
            mask.as_deref(),
        );
        result
    }

    /// Coverage for compositing `node`'s layer: its own mask texture, placed
    /// at the node transform times the mask transform, multiplied with the
    /// inherited mask.
    fn resolve_mask(
        &self,
        node: &MirroredNode,
        node_ctx: &RenderContext,
        depth: usize,
    ) -> Result<Option<Arc<Mask>>, RenderError> {
        let Some(mask_key) = node.mask else {
            return Ok(node_ctx.mask.clone());
        };
        let (width, height) = (node_ctx.target_width, node_ctx.target_height);
        let mut coverage =
            Pixmap::new(width, height).ok_or(RenderError::TargetAllocation { width, height })?;

        if let Some(mask_node) = self.nodes.get(mask_key) {
            match mask_node.mask_target() {
                Some(target) => {
                    let texture = target.texture();
                    let scale = Vec2::new(
                        mask_node.size.x / texture.width() as f32,
                        mask_node.size.y / texture.height() as f32,
                    );
                    let placement =
                        node_ctx.transform * mask_node.transform * Affine2::from_scale(scale);
                    coverage.draw_pixmap(
                        0,
                        0,
                        texture.as_ref(),
                        &PixmapPaint {
                            quality: FilterQuality::Bilinear,
                            ..PixmapPaint::default()
                        },
                        to_tiny_transform(&placement),
                        None,
                    );
                }
                // Singular mask transforms never get a target.
                None => {
                    let plain = node_ctx.clone().with_mask(None);
                    self.draw_node(mask_key, &mut coverage, &plain, depth + 1)?;
                }
            }
        }

        let mut mask = Mask::from_pixmap(coverage.as_ref(), MaskType::Alpha);
        if let Some(inherited) = node_ctx.mask.as_deref() {
            for (m, i) in mask.data_mut().iter_mut().zip(inherited.data()) {
                *m = ((*m as u16 * *i as u16 + 127) / 255) as u8;
            }
        }
        Ok(Some(Arc::new(mask)))
    }

    /// Draws kind-specific content. `ctx` already includes the node itself.
    fn draw_content(
        &self,
        node: &MirroredNode,
        pixmap: &mut Pixmap,
        ctx: &RenderContext,
        depth: usize,
    ) -> Result<(), RenderError> {
        match &node.content {
            MirroredContent::Paint(paint) => {
                draw_paint(paint, node.size, pixmap, ctx);
                Ok(())
            }
            MirroredContent::Image(Some(texture)) => {
                if let Some(source) = texture.pixmap() {
                    draw_texture(source, node.size, pixmap, ctx);
                }
                Ok(())
            }
            MirroredContent::Image(None) => Ok(()),
            MirroredContent::View(view) => {
                let mut last_error = Ok(());
                for &child in &view.children {
                    if let Err(e) = self.draw_node(child, pixmap, ctx, depth + 1) {
                        last_error = Err(e);
                    }
                }
                last_error
            }
            MirroredContent::CanvasView(Some(view)) => {
                if let Some(target) = self.nodes.get(*view).and_then(|v| v.render_target()) {
                    draw_texture(target.texture(), node.size, pixmap, ctx);
                }
                Ok(())
            }
            MirroredContent::CanvasView(None) => Ok(()),
        }
    }
}

fn draw_paint(paint: &Paint, size: Vec2, pixmap: &mut Pixmap, ctx: &RenderContext) {
    let Some(path) = paint.build_path(size) else {
        return;
    };
    let transform = ctx.tiny_transform();
    let mask = ctx.mask.as_deref();

    if paint.is_fillable() {
        let mut fill = tiny_skia::Paint::default();
        fill.set_color(ctx.shade(paint.fill_color).to_tiny());
        fill.anti_alias = true;
        pixmap.fill_path(&path, &fill, FillRule::Winding, transform, mask);
    }
    if paint.is_strokable() {
        let mut line = tiny_skia::Paint::default();
        line.set_color(ctx.shade(paint.line_color).to_tiny());
        line.anti_alias = true;
        let stroke = Stroke {
            width: paint.thickness,
            ..Stroke::default()
        };
        pixmap.stroke_path(&path, &line, &stroke, transform, mask);
    }
}

/// Draws `source` stretched over the node rectangle `(0,0)..size`.
fn draw_texture(source: &Pixmap, size: Vec2, pixmap: &mut Pixmap, ctx: &RenderContext) {
    if source.width() == 0 || source.height() == 0 {
        return;
    }
    let scale = Vec2::new(
        size.x / source.width() as f32,
        size.y / source.height() as f32,
    );
    let transform = ctx.transform * Affine2::from_scale(scale);
    // Pixel-aligned copies stay sharp.
    let quality = if transform.matrix2.abs_diff_eq(Mat2::IDENTITY, 1e-4)
        && transform.translation.abs_diff_eq(transform.translation.round(), 1e-4)
    {
        FilterQuality::Nearest
    } else {
        FilterQuality::Bilinear
    };

    let tinted;
    let source = if ctx.color_transform.is_identity() {
        source
    } else {
        tinted = apply_color_transform(source, ctx);
        &tinted
    };

    let paint = PixmapPaint {
        opacity: ctx.transparency.clamp(0.0, 1.0),
        quality,
        ..PixmapPaint::default()
    };
    pixmap.draw_pixmap(
        0,
        0,
        source.as_ref(),
        &paint,
        to_tiny_transform(&transform),
        ctx.mask.as_deref(),
    );
}

fn apply_color_transform(source: &Pixmap, ctx: &RenderContext) -> Pixmap {
    let mut out = source.clone();
    for px in out.pixels_mut() {
        let c = px.demultiply();
        let [r, g, b, a] = ctx
            .color_transform
            .apply(Color::from_rgba8(c.red(), c.green(), c.blue(), c.alpha()))
            .to_rgba8();
        *px = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use crate::render::target::GraphicsDevice;
    use crate::types::ColorMatrix;

    fn paint_node(world: &mut RenderWorld, color: Color, pos: Vec2, size: Vec2) -> MirrorKey {
        let key = world.create_node(NodeKind::Paint);
        let node = world.node_mut(key).unwrap();
        node.size = size;
        node.transform = Affine2::from_translation(pos);
        node.content = MirroredContent::Paint(Paint::rectangle(color));
        key
    }

    fn view_node(world: &mut RenderWorld, size: Vec2, children: Vec<MirrorKey>) -> MirrorKey {
        let key = world.create_node(NodeKind::View);
        let node = world.node_mut(key).unwrap();
        node.size = size;
        node.view_mut().unwrap().children = children;
        key
    }

    fn pixel(pixmap: &Pixmap, x: u32, y: u32) -> [u8; 4] {
        let c = pixmap.pixel(x, y).unwrap().demultiply();
        [c.red(), c.green(), c.blue(), c.alpha()]
    }

    #[test]
    fn clean_target_is_not_rerendered() {
        let mut world = RenderWorld::new(GraphicsDevice::new(256));
        let red = paint_node(&mut world, Color::new(1.0, 0.0, 0.0, 1.0), Vec2::ZERO, Vec2::splat(8.0));
        let view = view_node(&mut world, Vec2::splat(8.0), vec![red]);

        assert!(world.prepare_render_target(view).unwrap());
        assert!(!world.prepare_render_target(view).unwrap());
        let target = world.node(view).unwrap().render_target().unwrap();
        assert_eq!(target.render_count(), 1);
        assert_eq!(pixel(target.texture(), 4, 4), [255, 0, 0, 255]);
    }

    #[test]
    fn resize_request_reallocates_in_place() {
        let mut world = RenderWorld::new(GraphicsDevice::new(256));
        let view = view_node(&mut world, Vec2::splat(8.0), vec![]);
        world.prepare_render_target(view).unwrap();

        let node = world.node_mut(view).unwrap();
        node.size = Vec2::new(16.0, 4.0);
        node.request_resize();
        assert!(world.prepare_render_target(view).unwrap());

        let target = world.node(view).unwrap().render_target().unwrap();
        assert_eq!((target.width(), target.height()), (16, 4));
        assert_eq!(world.device().targets_created(), 1);
        assert_eq!(world.device().target_resizes(), 1);
    }

    #[test]
    fn color_transform_tints_paint() {
        let mut world = RenderWorld::new(GraphicsDevice::new(256));
        let white = paint_node(&mut world, Color::WHITE, Vec2::ZERO, Vec2::splat(4.0));
        world.node_mut(white).unwrap().color_transform = ColorMatrix::scale(0.0, 1.0, 0.0, 1.0);
        let view = view_node(&mut world, Vec2::splat(4.0), vec![white]);

        world.prepare_render_target(view).unwrap();
        let target = world.node(view).unwrap().render_target().unwrap();
        assert_eq!(pixel(target.texture(), 1, 1), [0, 255, 0, 255]);
    }

    #[test]
    fn mask_limits_coverage_to_mask_shape() {
        let mut world = RenderWorld::new(GraphicsDevice::new(256));
        let content = paint_node(&mut world, Color::WHITE, Vec2::ZERO, Vec2::new(10.0, 10.0));
        let mask = paint_node(&mut world, Color::WHITE, Vec2::ZERO, Vec2::new(5.0, 10.0));
        world.node_mut(content).unwrap().mask = Some(mask);
        let view = view_node(&mut world, Vec2::splat(10.0), vec![content]);

        world.prepare_render_target(view).unwrap();
        let texture = world.node(view).unwrap().render_target().unwrap().texture();
        assert_eq!(pixel(texture, 2, 5)[3], 255);
        assert_eq!(pixel(texture, 8, 5)[3], 0);
        assert_eq!(world.stats().mask_renders, 1);
    }

    #[test]
    fn invisible_nodes_draw_nothing() {
        let mut world = RenderWorld::new(GraphicsDevice::new(256));
        let red = paint_node(&mut world, Color::new(1.0, 0.0, 0.0, 1.0), Vec2::ZERO, Vec2::splat(4.0));
        world.node_mut(red).unwrap().visible = false;
        let view = view_node(&mut world, Vec2::splat(4.0), vec![red]);

        world.prepare_render_target(view).unwrap();
        let texture = world.node(view).unwrap().render_target().unwrap().texture();
        assert_eq!(pixel(texture, 1, 1)[3], 0);
    }
}
