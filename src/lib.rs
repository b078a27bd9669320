//! # Tandem Engine
//!
//! `tandem` mirrors a producer-owned canvas scene graph into a render-owned
//! copy and draws it on a dedicated render thread.
//!
//! The engine lives in [`tandem_core`]; this crate re-exports it and adds a
//! [`prelude`] for applications.

pub use tandem_core::*;

/// Everything a typical frame loop touches.
pub mod prelude {
    pub use tandem_core::{
        CaptureSubject, CaptureTarget, Color, Compositor, FrameOutcome, HeadlessSurface,
        InitialWindow, NodeId, Paint, RenderConfig, RenderError, SceneGraph, WindowDescriptor,
        WindowSurface,
    };
}
