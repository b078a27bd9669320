use crate::config::FrameLimiterMode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Rolling window of durations in seconds with an outlier-trimmed mean.
#[derive(Debug, Clone)]
pub struct TimeHistory {
    samples: VecDeque<f32>,
    capacity: usize,
    prune: usize,
}

impl TimeHistory {
    pub fn new(capacity: usize, prune: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            prune,
        }
    }

    pub fn add(&mut self, seconds: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(seconds);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Enough samples to trim `prune` from each end and keep at least one.
    pub fn has_metrics(&self) -> bool {
        self.samples.len() > self.prune * 2
    }

    /// Mean after dropping the `prune` smallest and largest samples.
    pub fn average(&self) -> Option<f32> {
        if !self.has_metrics() {
            return None;
        }
        let mut sorted: Vec<f32> = self.samples.iter().copied().collect();
        sorted.sort_by(f32::total_cmp);
        let kept = &sorted[self.prune..sorted.len() - self.prune];
        Some(kept.iter().sum::<f32>() / kept.len() as f32)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// `f32` stored in an `AtomicU32`.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Seconds per frame for a limit of `rate` frames per second. The half frame
/// of slack keeps a limiter matching the display rate from dropping frames.
pub fn frame_time_limit(rate: u32) -> f32 {
    1.0 / (rate as f32 + 0.5)
}

/// Holds the render loop to the frame time limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameLimiter {
    mode: FrameLimiterMode,
}

impl FrameLimiter {
    pub fn new(mode: FrameLimiterMode) -> Self {
        Self { mode }
    }

    /// Waits until `limit` seconds have passed since `frame_start`.
    pub fn wait(&self, frame_start: Instant, limit: f32) {
        if limit <= 0.0 || !limit.is_finite() {
            return;
        }
        let deadline = frame_start + Duration::from_secs_f32(limit);
        match self.mode {
            FrameLimiterMode::Sleep => {
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                }
            }
            FrameLimiterMode::Spin => {
                while Instant::now() < deadline {
                    std::hint::spin_loop();
                }
            }
        }
    }
}
