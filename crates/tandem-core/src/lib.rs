//! # Tandem
//!
//! `tandem-core` mirrors a producer-owned canvas scene graph into a render
//! world owned by a dedicated render thread, and schedules the two threads
//! around a pair of barriers.
//!
//! ## Core Features
//!
//! *   **Dirty Tracking**: every setter flips exactly one change category, so
//!     sync copies only what changed.
//! *   **Mirroring**: reference-counted render-side nodes with delayed freeing
//!     of their resources.
//! *   **Render Target Caching**: views render into cached offscreen targets
//!     that are only redrawn when a descendant changed.
//! *   **Masks and Blending**: two-pass compositing through a mask's own cached
//!     target.
//! *   **Scheduling**: asynchronous rendering of frame N while the producer
//!     updates frame N+1, with frame limiting and skip-sync estimation.
//! *   **Captures**: CPU readback of views and windows.
//!
//! Drawing goes through [tiny-skia](https://crates.io/crates/tiny-skia);
//! platform windows plug in through [`WindowSurface`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tandem_core::{Color, Compositor, HeadlessSurface, InitialWindow, Paint, RenderConfig, WindowDescriptor};
//! use glam::Vec2;
//!
//! let mut compositor = Compositor::new(RenderConfig::default());
//! let (surface, _probe) = HeadlessSurface::new();
//! let window = compositor
//!     .init(Some(InitialWindow::new(surface, WindowDescriptor::new(320, 240, "demo"))))
//!     .unwrap()
//!     .unwrap();
//!
//! let root = compositor.scene.create_view();
//! compositor.scene.set_size(root, Vec2::new(320.0, 240.0)).unwrap();
//! let square = compositor.scene.create_paint(Paint::rectangle(Color::WHITE));
//! compositor.scene.set_size(square, Vec2::splat(64.0)).unwrap();
//! compositor.scene.add_child(root, square).unwrap();
//! compositor.set_window_root(window, Some(root)).unwrap();
//!
//! for _ in 0..3 {
//!     compositor.end_frame().unwrap();
//! }
//! compositor.cleanup();
//! ```

/// Producer-side capture requests.
pub mod capture;

/// The per-frame coordinator of scene, windows, captures and render thread.
pub mod compositor;

pub mod config;

/// Work deferred to a known-safe point on the other thread.
pub mod delayed;

/// Per-node change categories.
pub mod dirty;

pub mod errors;

/// Kind-specific node payloads.
pub mod node;

/// Render-thread state: mirrored nodes, targets, windows and captures.
pub mod render;

/// The producer scene graph.
pub mod scene;

/// Copying dirty producer state into the render world.
pub mod sync;

pub mod texture;

/// Render thread scheduling.
pub mod thread;

/// Shared value types.
pub mod types;

/// Platform window seam and producer window handles.
pub mod window;

pub use capture::{CaptureCanvas, CaptureSubject, CaptureTarget};
pub use compositor::{CaptureId, Compositor, FrameOutcome};
pub use config::{FrameLimiterMode, RenderConfig};
pub use delayed::DelayedOperations;
pub use dirty::{DirtyFlags, DirtyState};
pub use errors::RenderError;
pub use node::{NodeContent, NodeKind, Paint, PaintShape, ViewListener};
pub use render::{FrameStats, MirrorKey, RenderWorld, WindowKey};
pub use scene::{NodeId, SceneGraph, SceneNode};
pub use sync::SyncStats;
pub use texture::{ImageData, ImageTexture};
pub use thread::{InitialWindow, RenderThread, ThreadState};
pub use types::{BlendMode, Color, ColorMatrix, PixelFormat};
pub use window::{HeadlessProbe, HeadlessSurface, RenderWindow, WindowDescriptor, WindowSurface};
