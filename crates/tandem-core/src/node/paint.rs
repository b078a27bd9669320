use crate::types::Color;
use glam::Vec2;
use tiny_skia::{Path, PathBuilder, Rect};

/// Geometry of a paint node, in the node's local space.
#[derive(Debug, Clone, PartialEq)]
pub enum PaintShape {
    /// Fills the node's bounds.
    Rectangle,
    /// Inscribed in the node's bounds.
    Ellipse,
    /// Closed polygon through the given points.
    Polygon(Vec<Vec2>),
    /// Open polyline; never filled.
    Lines(Vec<Vec2>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paint {
    pub shape: PaintShape,
    pub fill_color: Color,
    pub line_color: Color,
    pub thickness: f32,
}

impl Paint {
    pub fn rectangle(fill_color: Color) -> Self {
        Self {
            shape: PaintShape::Rectangle,
            fill_color,
            line_color: Color::TRANSPARENT,
            thickness: 0.0,
        }
    }

    pub fn ellipse(fill_color: Color) -> Self {
        Self {
            shape: PaintShape::Ellipse,
            ..Self::rectangle(fill_color)
        }
    }

    pub fn with_outline(mut self, line_color: Color, thickness: f32) -> Self {
        self.line_color = line_color;
        self.thickness = thickness;
        self
    }

    pub(crate) fn is_fillable(&self) -> bool {
        !matches!(self.shape, PaintShape::Lines(_)) && self.fill_color.a > 0.0
    }

    pub(crate) fn is_strokable(&self) -> bool {
        self.thickness > 0.0 && self.line_color.a > 0.0
    }

    /// Path for this shape at `size`. `None` for degenerate geometry.
    pub(crate) fn build_path(&self, size: Vec2) -> Option<Path> {
        match &self.shape {
            PaintShape::Rectangle => {
                Rect::from_xywh(0.0, 0.0, size.x, size.y).map(PathBuilder::from_rect)
            }
            PaintShape::Ellipse => {
                Rect::from_xywh(0.0, 0.0, size.x, size.y).and_then(PathBuilder::from_oval)
            }
            PaintShape::Polygon(points) => polyline(points, true),
            PaintShape::Lines(points) => polyline(points, false),
        }
    }
}

fn polyline(points: &[Vec2], close: bool) -> Option<Path> {
    let (first, rest) = points.split_first()?;
    let mut pb = PathBuilder::new();
    pb.move_to(first.x, first.y);
    for p in rest {
        pb.line_to(p.x, p.y);
    }
    if close {
        pb.close();
    }
    pb.finish()
}
