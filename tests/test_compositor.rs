use glam::Vec2;
use tandem_engine::prelude::*;
use tandem_engine::{ImageData, ImageTexture};

const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);
const GREEN: Color = Color::new(0.0, 1.0, 0.0, 1.0);
const BLUE: Color = Color::new(0.0, 0.0, 1.0, 1.0);

fn close(a: [u8; 4], b: [u8; 4]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x.abs_diff(*y) <= 2)
}

fn paint(scene: &mut SceneGraph, color: Color, position: Vec2, size: Vec2) -> NodeId {
    let id = scene.create_paint(Paint::rectangle(color));
    scene.set_position(id, position).unwrap();
    scene.set_size(id, size).unwrap();
    id
}

/// Image, view reference and mask in one scene, captured from the render
/// thread and written to disk.
#[test]
fn test_threaded_capture_to_png() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let config = RenderConfig {
        frame_rate_limit: 1000,
        ..RenderConfig::default()
    };
    let mut compositor = Compositor::new(config);
    compositor.init(None).unwrap();
    let scene = &mut compositor.scene;

    let root = scene.create_view();
    scene.set_size(root, Vec2::splat(64.0)).unwrap();

    let image = scene.create_image(Some(ImageTexture::new(ImageData::solid(4, 4, GREEN))));
    scene.set_size(image, Vec2::splat(32.0)).unwrap();
    scene.add_child(root, image).unwrap();

    let badge = scene.create_view();
    scene.set_size(badge, Vec2::splat(16.0)).unwrap();
    let dot = paint(scene, RED, Vec2::ZERO, Vec2::splat(16.0));
    scene.add_child(badge, dot).unwrap();
    let shown = scene.create_canvas_view(Some(badge)).unwrap();
    scene.set_position(shown, Vec2::new(32.0, 0.0)).unwrap();
    scene.set_size(shown, Vec2::splat(16.0)).unwrap();
    scene.add_child(root, shown).unwrap();

    let masked = paint(scene, BLUE, Vec2::new(0.0, 32.0), Vec2::new(64.0, 32.0));
    let mask = paint(scene, Color::WHITE, Vec2::ZERO, Vec2::splat(32.0));
    scene.set_mask(masked, Some(mask)).unwrap();
    scene.add_child(root, masked).unwrap();

    let id = compositor.add_capture(CaptureSubject::View(root));
    compositor
        .capture_mut(id)
        .unwrap()
        .request_capture(CaptureTarget::rgba8(64, 64))
        .unwrap();
    compositor.synchronize().unwrap();
    compositor.synchronize().unwrap();
    let captured = compositor.capture_mut(id).unwrap().take_image().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.png");
    captured.save_png(&path).unwrap();
    let image = ImageData::load(&path).unwrap();
    assert_eq!((image.width(), image.height()), (64, 64));

    assert!(close(image.pixel_rgba(8, 8).unwrap(), [0, 255, 0, 255]));
    assert!(close(image.pixel_rgba(40, 8).unwrap(), [255, 0, 0, 255]));
    assert!(close(image.pixel_rgba(8, 48).unwrap(), [0, 0, 255, 255]));
    assert_eq!(image.pixel_rgba(56, 48).unwrap()[3], 0);
    assert_eq!(image.pixel_rgba(56, 8).unwrap()[3], 0);

    compositor.cleanup();
    assert_eq!(compositor.state(), tandem_engine::ThreadState::Stopped);
}

#[test]
fn test_frozen_compositor_keeps_syncing() {
    let mut compositor = Compositor::new(RenderConfig {
        async_rendering: false,
        ..RenderConfig::default()
    });
    compositor.init(None).unwrap();
    let root = compositor.scene.create_view();
    let (surface, probe) = HeadlessSurface::new();
    let window = compositor
        .create_window(surface, WindowDescriptor::new(8, 8, "frozen"))
        .unwrap();
    compositor.set_window_root(window, Some(root)).unwrap();

    compositor.synchronize().unwrap();
    compositor.freeze();
    for _ in 0..3 {
        compositor.synchronize().unwrap();
    }
    assert_eq!(compositor.stats().frames_rendered, 1);
    assert_eq!(probe.presented_frames(), 0);

    compositor.unfreeze();
    compositor.synchronize().unwrap();
    assert_eq!(compositor.stats().frames_rendered, 2);
    assert_eq!(probe.presented_frames(), 1);
}
