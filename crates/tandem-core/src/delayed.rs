//! # Delayed Operations
//!
//! Cross-thread work that must run at a known-safe point rather than where
//! it was requested.
//!
//! ## Responsibilities
//! - **Free**: render resources released by sync are only dropped by the render
//!   thread at the start of its next frame, never while a draw could use them.
//! - **Init**: textures handed over by sync are built on the render thread.
//! - **Synchronize**: render-side requests that need the producer (writing debug
//!   images to disk) run inside the producer's `synchronize` call.
//!
//! Each queue has its own lock so the producer can queue work while a frame
//! is being rendered.

use crate::errors::RenderError;
use crate::render::capture::PixelBuffer;
use crate::render::target::RenderTarget;
use crate::texture::{ImageData, ImageTexture};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// A render resource waiting for the render thread's free step.
#[derive(Debug)]
pub enum DelayedFree {
    Target(RenderTarget),
    Texture(Arc<ImageTexture>),
    Buffer(PixelBuffer),
}

#[derive(Debug)]
pub enum SynchronizeOperation {
    SaveImage { path: PathBuf, image: ImageData },
}

#[derive(Debug, Default)]
pub struct DelayedOperations {
    free: Mutex<Vec<DelayedFree>>,
    init: Mutex<Vec<Arc<ImageTexture>>>,
    synchronize: Mutex<Vec<SynchronizeOperation>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DelayedOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_free(&self, item: DelayedFree) {
        lock(&self.free).push(item);
    }

    /// Queues a texture for initialization. Queuing the same texture twice is
    /// a no-op.
    pub fn add_init(&self, texture: Arc<ImageTexture>) {
        let mut queue = lock(&self.init);
        if !queue.iter().any(|t| Arc::ptr_eq(t, &texture)) {
            queue.push(texture);
        }
    }

    pub fn add_save_image(&self, path: impl Into<PathBuf>, image: ImageData) {
        lock(&self.synchronize).push(SynchronizeOperation::SaveImage {
            path: path.into(),
            image,
        });
    }

    pub fn pending_free_count(&self) -> usize {
        lock(&self.free).len()
    }

    pub fn pending_init_count(&self) -> usize {
        lock(&self.init).len()
    }

    pub fn pending_synchronize_count(&self) -> usize {
        lock(&self.synchronize).len()
    }

    /// Drops every queued resource. Render thread only.
    pub fn process_free_operations(&self) -> usize {
        let items = std::mem::take(&mut *lock(&self.free));
        let count = items.len();
        drop(items);
        if count > 0 {
            debug!(count, "Released delayed resources");
        }
        count
    }

    /// Builds every queued texture. Render thread only. Textures that fail
    /// stay uninitialized and are reported through the returned error after
    /// the rest of the queue has been processed.
    pub fn process_init_operations(&self) -> Result<usize, RenderError> {
        let textures = std::mem::take(&mut *lock(&self.init));
        let mut first_error = None;
        let mut count = 0;
        for texture in textures {
            match texture.initialize() {
                Ok(()) => count += 1,
                Err(e) => {
                    warn!(
                        width = texture.data().width(),
                        height = texture.data().height(),
                        error = %e,
                        "Texture initialization failed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Runs queued producer-side work. Producer thread only. Failures are
    /// logged and do not stop the remaining operations.
    pub fn process_synchronize_operations(&self) -> usize {
        let operations = std::mem::take(&mut *lock(&self.synchronize));
        let count = operations.len();
        for operation in operations {
            match operation {
                SynchronizeOperation::SaveImage { path, image } => {
                    if let Err(e) = image.save_png(&path) {
                        warn!(path = %path.display(), error = %e, "Saving debug image failed");
                    }
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;

    #[test]
    fn init_queue_deduplicates_textures() {
        let ops = DelayedOperations::new();
        let texture = ImageTexture::new(ImageData::solid(1, 1, Color::WHITE));
        ops.add_init(Arc::clone(&texture));
        ops.add_init(Arc::clone(&texture));
        assert_eq!(ops.pending_init_count(), 1);
        assert_eq!(ops.process_init_operations().unwrap(), 1);
        assert!(texture.is_initialized());
        assert_eq!(ops.pending_init_count(), 0);
    }

    #[test]
    fn equal_textures_are_initialized_separately() {
        let ops = DelayedOperations::new();
        let a = ImageTexture::new(ImageData::solid(1, 1, Color::WHITE));
        let b = ImageTexture::new(ImageData::solid(1, 1, Color::WHITE));
        ops.add_init(Arc::clone(&a));
        ops.add_init(Arc::clone(&b));
        assert_eq!(ops.pending_init_count(), 2);
        assert_eq!(ops.process_init_operations().unwrap(), 2);
        assert!(a.is_initialized() && b.is_initialized());
    }

    #[test]
    fn save_image_runs_on_synchronize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.png");
        let ops = DelayedOperations::new();
        ops.add_save_image(&path, ImageData::solid(3, 2, Color::BLACK));
        assert!(!path.exists());
        assert_eq!(ops.process_synchronize_operations(), 1);
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (3, 2));
    }
}
