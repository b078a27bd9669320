//! # Config Module
//!
//! Render thread configuration, loadable from JSON.
//!
//! ## Responsibilities
//! - **Threading**: asynchronous dual-thread rendering or synchronous inline rendering.
//! - **Frame Pacing**: frame rate limit and limiter strategy.
//! - **Skip-Sync**: ratio used to decide whether the producer may skip a synchronize.
//! - **Device Limits**: maximum render target size.

use crate::errors::RenderError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the render thread waits out the remainder of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameLimiterMode {
    /// OS sleep for the remaining time.
    #[default]
    Sleep,
    /// Busy-wait on the monotonic clock. Finer grained, burns a core.
    Spin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Run rendering on a dedicated thread. When false, `synchronize`
    /// renders inline on the calling thread.
    pub async_rendering: bool,
    /// Target frames per second. `0` uses the refresh rate reported by the
    /// initial window surface.
    pub frame_rate_limit: u32,
    pub frame_limiter: FrameLimiterMode,
    /// The producer skips waiting for the render thread when
    /// `remaining_render_time / estimated_main_time` reaches this ratio.
    pub async_render_skip_sync_time_ratio: f32,
    /// Largest edge, in pixels, of any render target.
    pub max_texture_size: u32,
    /// Number of samples kept by the frame time histories.
    pub time_history_size: usize,
    /// Samples dropped from each end before averaging.
    pub time_history_prune: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            async_rendering: true,
            frame_rate_limit: 0,
            frame_limiter: FrameLimiterMode::Sleep,
            async_render_skip_sync_time_ratio: 0.5,
            max_texture_size: 4096,
            time_history_size: 29,
            time_history_prune: 2,
        }
    }
}

impl RenderConfig {
    pub fn from_json_str(json: &str) -> Result<Self, RenderError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RenderError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if !self.async_render_skip_sync_time_ratio.is_finite()
            || self.async_render_skip_sync_time_ratio < 0.0
        {
            return Err(RenderError::Config(format!(
                "skip sync time ratio must be a non-negative number, got {}",
                self.async_render_skip_sync_time_ratio
            )));
        }
        if self.time_history_size == 0 {
            return Err(RenderError::Config(
                "time history size must be at least 1".into(),
            ));
        }
        if self.time_history_prune * 2 >= self.time_history_size {
            return Err(RenderError::Config(format!(
                "time history prune {} leaves no samples out of {}",
                self.time_history_prune, self.time_history_size
            )));
        }
        Ok(())
    }
}
