use crate::scene::NodeId;
use crate::texture::ImageTexture;
use std::sync::Arc;

pub mod paint;
pub use paint::{Paint, PaintShape};

pub mod view;
pub use view::{ViewContent, ViewListener};

/// Kind-specific payload of a scene node. The kind is fixed at creation.
pub enum NodeContent {
    /// Vector shape filled and/or outlined.
    Paint(Paint),
    /// Shared image texture stretched over the node's size.
    Image(Option<Arc<ImageTexture>>),
    /// Container of child nodes with its own paint tracker and listeners.
    View(ViewContent),
    /// Draws the cached render target of another view.
    CanvasView(Option<NodeId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Paint,
    Image,
    View,
    CanvasView,
}

impl NodeContent {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeContent::Paint(_) => NodeKind::Paint,
            NodeContent::Image(_) => NodeKind::Image,
            NodeContent::View(_) => NodeKind::View,
            NodeContent::CanvasView(_) => NodeKind::CanvasView,
        }
    }
}
