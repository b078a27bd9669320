//! Sync Engine Tests
//!
//! Producer scene edits flowing into the render world through
//! `SceneGraph::sync_to_render`.

mod common;

use common::*;
use glam::{Affine2, Vec2};
use tandem_core::{
    BlendMode, Color, DirtyFlags, ImageData, ImageTexture, MirrorKey, Paint, RenderError,
    RenderWorld, SceneGraph,
};

fn mirror(scene: &SceneGraph, id: tandem_core::NodeId) -> MirrorKey {
    scene.mirror_key(id).unwrap().expect("node was never synced")
}

/// Validates:
/// - the first sync creates one mirror per reachable node
/// - a second sync of an untouched scene visits nodes but copies nothing
#[test]
fn first_sync_copies_everything_then_nothing() {
    init_tracing();
    let mut scene = SceneGraph::new();
    let mut world = world();
    let root = view(&mut scene, Vec2::splat(100.0));
    let a = rect(&mut scene, RED, Vec2::ZERO, Vec2::splat(10.0));
    let b = rect(&mut scene, BLUE, Vec2::splat(20.0), Vec2::splat(10.0));
    scene.add_child(root, a).unwrap();
    scene.add_child(root, b).unwrap();

    scene.sync_to_render(&mut world, root).unwrap();
    let stats = scene.sync_stats();
    assert_eq!(stats.mirrors_created, 3);
    assert_eq!(stats.nodes_visited, 3);
    assert_eq!(world.node_count(), 3);
    assert!(stats.field_copies() > 0);
    assert!(scene.dirty_flags(a).unwrap().is_empty());

    scene.reset_sync_stats();
    scene.sync_to_render(&mut world, root).unwrap();
    let stats = scene.sync_stats();
    assert_eq!(stats.nodes_visited, 3);
    assert_eq!(stats.mirrors_created, 0);
    assert_eq!(stats.field_copies(), 0);
}

/// Validates:
/// - a single setter re-copies exactly its own category
/// - the enclosing view only copies its bumped paint tracker
#[test]
fn one_setter_copies_one_category() {
    let mut scene = SceneGraph::new();
    let mut world = world();
    let root = view(&mut scene, Vec2::splat(100.0));
    let leaf = rect(&mut scene, RED, Vec2::ZERO, Vec2::splat(10.0));
    scene.add_child(root, leaf).unwrap();
    scene.sync_to_render(&mut world, root).unwrap();
    scene.reset_sync_stats();

    scene.set_transparency(leaf, 0.5).unwrap();
    assert_eq!(scene.dirty_flags(leaf).unwrap(), DirtyFlags::PARAMETERS);
    scene.sync_to_render(&mut world, root).unwrap();

    let stats = scene.sync_stats();
    assert_eq!(stats.parameter_copies, 1);
    assert_eq!(stats.tracker_copies, 1);
    assert_eq!(stats.field_copies(), 2);
    assert_eq!(world.node(mirror(&scene, leaf)).unwrap().transparency(), 0.5);
}

#[test]
fn geometry_folds_position_into_the_mirrored_transform() {
    let mut scene = SceneGraph::new();
    let mut world = world();
    let leaf = rect(&mut scene, RED, Vec2::new(5.0, 7.0), Vec2::splat(10.0));
    scene
        .set_transform(leaf, Affine2::from_scale(Vec2::splat(2.0)))
        .unwrap();
    scene.sync_to_render(&mut world, leaf).unwrap();

    let mirrored = world.node(mirror(&scene, leaf)).unwrap();
    let expected = Affine2::from_translation(Vec2::new(5.0, 7.0)) * Affine2::from_scale(Vec2::splat(2.0));
    assert!(mirrored.transform().abs_diff_eq(expected, 1e-6));
    assert_eq!(mirrored.size(), Vec2::splat(10.0));

    scene.reset_sync_stats();
    scene.set_size(leaf, Vec2::splat(12.0)).unwrap();
    scene.sync_to_render(&mut world, leaf).unwrap();
    let stats = scene.sync_stats();
    assert_eq!(stats.geometry_copies, 1);
    assert_eq!(stats.transform_copies, 1);
}

/// Validates:
/// - mirrored children follow render order
/// - changing a child's order re-sorts its parent at the next sync
#[test]
fn children_are_sorted_by_order() {
    let mut scene = SceneGraph::new();
    let mut world = world();
    let root = view(&mut scene, Vec2::splat(100.0));
    let a = rect(&mut scene, RED, Vec2::ZERO, Vec2::splat(10.0));
    let b = rect(&mut scene, BLUE, Vec2::ZERO, Vec2::splat(10.0));
    scene.set_order(a, 2.0).unwrap();
    scene.set_order(b, 1.0).unwrap();
    scene.add_child(root, a).unwrap();
    scene.add_child(root, b).unwrap();

    let root_key = scene.sync_to_render(&mut world, root).unwrap();
    let (ma, mb) = (mirror(&scene, a), mirror(&scene, b));
    assert_eq!(world.node(root_key).unwrap().children(), &[mb, ma]);

    scene.set_order(a, 0.0).unwrap();
    scene.sync_to_render(&mut world, root).unwrap();
    assert_eq!(world.node(root_key).unwrap().children(), &[ma, mb]);
}

#[test]
fn mask_changes_move_the_mirrored_reference() {
    let mut scene = SceneGraph::new();
    let mut world = world();
    let root = view(&mut scene, Vec2::splat(100.0));
    let masked = rect(&mut scene, RED, Vec2::ZERO, Vec2::splat(50.0));
    let mask = scene.create_paint(Paint::ellipse(Color::WHITE));
    scene.set_size(mask, Vec2::splat(50.0)).unwrap();
    scene.add_child(root, masked).unwrap();
    scene.set_mask(masked, Some(mask)).unwrap();

    scene.sync_to_render(&mut world, root).unwrap();
    let mask_key = mirror(&scene, mask);
    assert_eq!(world.node(mirror(&scene, masked)).unwrap().mask(), Some(mask_key));
    // Producer reference plus the masked node.
    assert_eq!(world.node(mask_key).unwrap().refcount(), 2);

    scene.remove_mask(masked).unwrap();
    scene.sync_to_render(&mut world, root).unwrap();
    assert_eq!(world.node(mirror(&scene, masked)).unwrap().mask(), None);
    assert_eq!(world.node(mask_key).unwrap().refcount(), 1);
}

#[test]
fn mask_content_changes_mark_the_mask_target_stale() {
    let mut scene = SceneGraph::new();
    let mut world = world();
    let root = view(&mut scene, Vec2::splat(64.0));
    let masked = rect(&mut scene, RED, Vec2::ZERO, Vec2::splat(32.0));
    let mask = rect(&mut scene, Color::WHITE, Vec2::ZERO, Vec2::splat(16.0));
    scene.add_child(root, masked).unwrap();
    scene.set_mask(masked, Some(mask)).unwrap();
    let root_key = scene.sync_to_render(&mut world, root).unwrap();
    world.prepare_render_target(root_key).unwrap();
    let mask_key = mirror(&scene, mask);
    assert!(!world.node(mask_key).unwrap().is_mask_target_dirty());

    scene.set_paint(mask, Paint::ellipse(Color::WHITE)).unwrap();
    assert!(scene
        .dirty_flags(masked)
        .unwrap()
        .contains(DirtyFlags::MASK_CONTENT));
    scene.sync_to_render(&mut world, root).unwrap();
    assert!(world.node(mask_key).unwrap().is_mask_target_dirty());
    assert!(world.node(root_key).unwrap().is_render_target_dirty());
}

#[test]
fn destroyed_nodes_release_their_mirrors() {
    let mut scene = SceneGraph::new();
    let mut world = world();
    let root = view(&mut scene, Vec2::splat(100.0));
    let leaf = rect(&mut scene, RED, Vec2::ZERO, Vec2::splat(10.0));
    scene.add_child(root, leaf).unwrap();
    let root_key = scene.sync_to_render(&mut world, root).unwrap();
    let leaf_key = mirror(&scene, leaf);
    assert_eq!(world.node(leaf_key).unwrap().refcount(), 2);

    scene.destroy_node(leaf).unwrap();
    // Nothing changes on the render side until the next sync.
    assert!(world.contains_node(leaf_key));

    scene.sync_to_render(&mut world, root).unwrap();
    assert!(!world.contains_node(leaf_key));
    assert!(world.node(root_key).unwrap().children().is_empty());
}

#[test]
fn image_textures_are_built_by_the_render_side() {
    let mut scene = SceneGraph::new();
    let mut world = world();
    let texture = ImageTexture::new(ImageData::solid(4, 4, BLUE));
    let image = scene.create_image(Some(texture.clone()));
    scene.set_size(image, Vec2::splat(4.0)).unwrap();

    scene.sync_to_render(&mut world, image).unwrap();
    assert!(!texture.is_initialized());
    assert_eq!(world.delayed().pending_init_count(), 1);

    assert_eq!(world.process_init_operations().unwrap(), 1);
    assert!(texture.is_initialized());
    assert_eq!(world.stats().textures_initialized, 1);
}

#[test]
fn canvas_views_link_to_the_mirrored_view() {
    let mut scene = SceneGraph::new();
    let mut world = world();
    let root = view(&mut scene, Vec2::splat(100.0));
    let source = view(&mut scene, Vec2::splat(20.0));
    let shown = scene.create_canvas_view(Some(source)).unwrap();
    scene.add_child(root, shown).unwrap();

    scene.sync_to_render(&mut world, root).unwrap();
    let source_key = mirror(&scene, source);
    assert_eq!(
        world.node(mirror(&scene, shown)).unwrap().referenced_view(),
        Some(source_key)
    );
    assert_eq!(world.node(source_key).unwrap().refcount(), 2);

    scene.set_canvas_view(shown, None).unwrap();
    scene.sync_to_render(&mut world, root).unwrap();
    assert_eq!(world.node(mirror(&scene, shown)).unwrap().referenced_view(), None);
    assert_eq!(world.node(source_key).unwrap().refcount(), 1);
}

#[test]
fn self_referencing_view_syncs_and_renders_once() {
    let mut scene = SceneGraph::new();
    let mut world = world();
    let mirror_view = view(&mut scene, Vec2::splat(32.0));
    let back = rect(&mut scene, GREEN, Vec2::ZERO, Vec2::splat(32.0));
    let inner = scene.create_canvas_view(Some(mirror_view)).unwrap();
    scene.set_size(inner, Vec2::splat(16.0)).unwrap();
    scene.add_child(mirror_view, back).unwrap();
    scene.add_child(mirror_view, inner).unwrap();

    let key = scene.sync_to_render(&mut world, mirror_view).unwrap();
    assert!(world.prepare_render_target(key).unwrap());
    assert!(!world.prepare_render_target(key).unwrap());
    assert_eq!(world.stats().target_renders, 1);
}

#[test]
fn nesting_beyond_the_limit_is_rejected() {
    let mut scene = SceneGraph::new();
    let mut world = RenderWorld::new(tandem_core::render::GraphicsDevice::new(256));
    let root = scene.create_view();
    let mut parent = root;
    for _ in 0..=tandem_core::sync::MAX_SYNC_DEPTH {
        let child = scene.create_view();
        scene.add_child(parent, child).unwrap();
        parent = child;
    }
    assert!(scene.node(root).unwrap().dirty().is_parent_paint());
    assert!(matches!(
        scene.sync_to_render(&mut world, root),
        Err(RenderError::RecursionLimit)
    ));

    // The failed pass still drops parent-paint but keeps what must be copied.
    let dirty = scene.node(root).unwrap().dirty();
    assert!(!dirty.is_parent_paint());
    assert!(dirty.is_pending_sync());
    assert!(dirty.flags().contains(DirtyFlags::CONTENT));
}

#[test]
fn blend_and_visibility_are_parameters() {
    let mut scene = SceneGraph::new();
    let mut world = world();
    let leaf = rect(&mut scene, RED, Vec2::ZERO, Vec2::splat(10.0));
    scene.sync_to_render(&mut world, leaf).unwrap();
    scene.reset_sync_stats();

    scene.set_blend_mode(leaf, BlendMode::Multiply).unwrap();
    scene.set_visible(leaf, false).unwrap();
    scene.sync_to_render(&mut world, leaf).unwrap();

    let mirrored = world.node(mirror(&scene, leaf)).unwrap();
    assert_eq!(mirrored.blend_mode(), BlendMode::Multiply);
    assert!(!mirrored.is_visible());
    assert_eq!(scene.sync_stats().parameter_copies, 1);
}
