use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{trace, warn};

/// Phase of the render thread, shared by both sides of the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ThreadState {
    Stopped = 0,
    Initializing,
    /// The producer owns the render world.
    Synchronize,
    /// The render thread is drawing a frame.
    Rendering,
    /// The frame is done and both threads met at `BarrierIn`.
    FinishedRendering,
    /// Rendering paused without tearing the thread down.
    Frozen,
    CleaningUp,
    /// The platform is taking the window away.
    WindowTerminate,
    /// The window is gone; the thread idles at the barriers.
    WindowDown,
    /// The window is back and surfaces are being rebound.
    WindowInit,
}

impl ThreadState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initializing,
            2 => Self::Synchronize,
            3 => Self::Rendering,
            4 => Self::FinishedRendering,
            5 => Self::Frozen,
            6 => Self::CleaningUp,
            7 => Self::WindowTerminate,
            8 => Self::WindowDown,
            9 => Self::WindowInit,
            _ => Self::Stopped,
        }
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: ThreadState) -> bool {
        use ThreadState::*;
        matches!(
            (self, next),
            (Stopped, Initializing)
                | (Initializing, Synchronize | Stopped)
                | (Synchronize, FinishedRendering | Rendering | CleaningUp | Frozen)
                | (Rendering, FinishedRendering | Synchronize | WindowTerminate)
                | (
                    FinishedRendering,
                    Rendering | Synchronize | Frozen | WindowTerminate | WindowDown | CleaningUp
                )
                | (Frozen, Synchronize | CleaningUp)
                | (WindowTerminate, FinishedRendering | WindowDown)
                | (WindowDown, WindowInit | CleaningUp)
                | (WindowInit, FinishedRendering | Rendering)
                | (CleaningUp, Stopped)
        )
    }
}

/// Atomic holder of the current [`ThreadState`] with an optional observer.
#[derive(Debug)]
pub(crate) struct StateCell {
    value: AtomicU8,
    monitor: Mutex<Option<Sender<ThreadState>>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            value: AtomicU8::new(ThreadState::Stopped as u8),
            monitor: Mutex::new(None),
        }
    }

    pub(crate) fn get(&self) -> ThreadState {
        ThreadState::from_u8(self.value.load(Ordering::Acquire))
    }

    /// Moves to `next`. Re-entering the current state is silent; an edge
    /// outside the state machine is logged but still applied.
    pub(crate) fn set(&self, next: ThreadState) {
        let previous = ThreadState::from_u8(self.value.swap(next as u8, Ordering::AcqRel));
        if previous == next {
            return;
        }
        if !previous.can_transition_to(next) {
            warn!(?previous, ?next, "Unexpected render thread state transition");
        }
        trace!(?previous, ?next, "Render thread state");
        let monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = monitor.as_ref() {
            let _ = tx.send(next);
        }
    }

    pub(crate) fn attach_monitor(&self, tx: Sender<ThreadState>) {
        *self.monitor.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }
}
