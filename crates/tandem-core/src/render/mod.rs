//! Render-thread side: mirrored nodes, targets, windows and captures.

pub mod canvas;
pub mod capture;
pub mod context;
pub mod mirror;
pub mod target;
pub mod window;
pub mod world;

pub use capture::{CaptureKey, CaptureSource, PixelBuffer, RenderCapture};
pub use context::RenderContext;
pub use mirror::{MirrorKey, MirroredContent, MirroredNode, MirroredView};
pub use target::{GraphicsDevice, RenderTarget, MIN_TEXTURE_SIZE};
pub use window::{RenderWindowState, WindowKey};
pub use world::{FrameStats, RenderWorld};
