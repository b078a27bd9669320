//! End-to-End Scenarios
//!
//! Whole-pipeline checks: producer edits through mirroring, the render thread
//! and the window surface.

mod common;

use common::*;
use glam::{Affine2, Vec2};
use tandem_core::{
    Compositor, FrameOutcome, HeadlessSurface, ImageData, ImageTexture, InitialWindow, Paint,
    SceneGraph, WindowDescriptor,
};

/// Validates:
/// - a positioned image child mirrors as a translation
/// - the mirrored view lists exactly the mirrored child
#[test]
fn image_child_mirrors_with_its_translation() {
    init_tracing();
    let mut scene = SceneGraph::new();
    let mut world = world();
    let a = scene.create_view();
    let b = scene.create_image(Some(ImageTexture::new(ImageData::solid(4, 4, RED))));
    scene.set_size(b, Vec2::splat(100.0)).unwrap();
    scene.set_position(b, Vec2::new(10.0, 10.0)).unwrap();
    scene.add_child(a, b).unwrap();

    let a_key = scene.sync_to_render(&mut world, a).unwrap();
    let b_key = scene.mirror_key(b).unwrap().unwrap();
    let mirrored_b = world.node(b_key).unwrap();
    assert!(mirrored_b
        .transform()
        .abs_diff_eq(Affine2::from_translation(Vec2::new(10.0, 10.0)), 1e-6));
    assert_eq!(mirrored_b.size(), Vec2::splat(100.0));
    assert_eq!(world.node(a_key).unwrap().children(), &[b_key]);
}

/// Validates:
/// - a geometry edit is copied once
/// - an untouched frame copies nothing at all
#[test]
fn quiet_frame_copies_nothing() {
    let mut scene = SceneGraph::new();
    let mut world = world();
    let root = view(&mut scene, Vec2::splat(50.0));
    let leaf = rect(&mut scene, RED, Vec2::ZERO, Vec2::splat(10.0));
    scene.add_child(root, leaf).unwrap();
    scene.sync_to_render(&mut world, root).unwrap();

    scene.set_position(leaf, Vec2::new(3.0, 4.0)).unwrap();
    scene.reset_sync_stats();
    scene.sync_to_render(&mut world, root).unwrap();
    assert_eq!(scene.sync_stats().geometry_copies, 1);

    scene.reset_sync_stats();
    scene.sync_to_render(&mut world, root).unwrap();
    let stats = scene.sync_stats();
    assert_eq!(stats.field_copies(), 0);
    assert_eq!(stats.mirrors_created, 0);
    assert_eq!(stats.nodes_visited, 2);
}

/// Validates:
/// - a frame reaches the window at the frame after it was drawn
/// - later edits show up in later presents
#[test]
fn window_presents_the_previous_frame() {
    init_tracing();
    let mut compositor = Compositor::new(sync_config());
    let (surface, probe) = HeadlessSurface::new();
    let window = compositor
        .init(Some(InitialWindow::new(surface, WindowDescriptor::new(8, 8, "e2e"))))
        .unwrap()
        .unwrap();
    let root = view(&mut compositor.scene, Vec2::splat(8.0));
    let fill = rect(&mut compositor.scene, RED, Vec2::ZERO, Vec2::new(4.0, 8.0));
    compositor.scene.add_child(root, fill).unwrap();
    compositor.set_window_root(window, Some(root)).unwrap();

    compositor.synchronize().unwrap();
    assert_eq!(probe.presented_frames(), 0);
    compositor.synchronize().unwrap();
    assert_eq!(probe.presented_frames(), 1);
    let frame = probe.last_frame().unwrap();
    assert_eq!(pixel(&frame, 8, 1, 1), [255, 0, 0, 255]);
    assert_eq!(pixel(&frame, 8, 6, 1), [0, 0, 0, 255]);

    compositor.scene.set_paint(fill, Paint::rectangle(BLUE)).unwrap();
    compositor.synchronize().unwrap();
    assert_eq!(pixel(&probe.last_frame().unwrap(), 8, 1, 1), [255, 0, 0, 255]);
    compositor.synchronize().unwrap();
    assert_eq!(pixel(&probe.last_frame().unwrap(), 8, 1, 1), [0, 0, 255, 255]);
    assert_eq!(probe.presented_frames(), 3);

    compositor.cleanup();
    assert!(probe.is_destroyed());
}

#[test]
fn threaded_compositor_keeps_up_with_the_producer() {
    init_tracing();
    let mut compositor = Compositor::new(async_config());
    let (surface, probe) = HeadlessSurface::new();
    let window = compositor
        .init(Some(InitialWindow::new(surface, WindowDescriptor::new(16, 16, "async"))))
        .unwrap()
        .unwrap();
    let root = view(&mut compositor.scene, Vec2::splat(16.0));
    let leaf = rect(&mut compositor.scene, GREEN, Vec2::ZERO, Vec2::splat(4.0));
    compositor.scene.add_child(root, leaf).unwrap();
    compositor.set_window_root(window, Some(root)).unwrap();

    let mut step = 0u32;
    let mut skipped = 0u32;
    while compositor.frames() < 20 {
        let x = (step % 12) as f32;
        compositor.scene.set_position(leaf, Vec2::new(x, x)).unwrap();
        if compositor.end_frame().unwrap() == FrameOutcome::Skipped {
            skipped += 1;
        }
        step += 1;
    }
    assert_eq!(compositor.skipped_frames(), skipped as u64);
    assert_eq!(compositor.frames(), 20);

    let stats = compositor.stats();
    assert_eq!(stats.frames_rendered, 20);
    assert_eq!(stats.failed_frames, 0);
    assert_eq!(probe.presented_frames(), 19);
    compositor.cleanup();
}
