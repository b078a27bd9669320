#![allow(dead_code)]

use glam::Vec2;
use tandem_core::render::GraphicsDevice;
use tandem_core::{Color, NodeId, Paint, RenderConfig, RenderWorld, SceneGraph};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

pub fn world() -> RenderWorld {
    RenderWorld::new(GraphicsDevice::new(1024))
}

/// Inline rendering on the calling thread.
pub fn sync_config() -> RenderConfig {
    RenderConfig {
        async_rendering: false,
        ..RenderConfig::default()
    }
}

/// Render thread fast enough that frame pacing never dominates a test.
pub fn async_config() -> RenderConfig {
    RenderConfig {
        async_rendering: true,
        frame_rate_limit: 1000,
        ..RenderConfig::default()
    }
}

pub const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);
pub const GREEN: Color = Color::new(0.0, 1.0, 0.0, 1.0);
pub const BLUE: Color = Color::new(0.0, 0.0, 1.0, 1.0);

pub fn rect(scene: &mut SceneGraph, color: Color, position: Vec2, size: Vec2) -> NodeId {
    let id = scene.create_paint(Paint::rectangle(color));
    scene.set_position(id, position).unwrap();
    scene.set_size(id, size).unwrap();
    id
}

pub fn view(scene: &mut SceneGraph, size: Vec2) -> NodeId {
    let id = scene.create_view();
    scene.set_size(id, size).unwrap();
    id
}

/// Straight RGBA of pixel `(x, y)` in top-down RGBA8 rows.
pub fn pixel(rgba: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let i = ((y * width + x) * 4) as usize;
    [rgba[i], rgba[i + 1], rgba[i + 2], rgba[i + 3]]
}

pub fn close(a: [u8; 4], b: [u8; 4], tolerance: u8) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x.abs_diff(*y) <= tolerance)
}
