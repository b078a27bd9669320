//! # Render Thread
//!
//! Frame scheduling between the producer thread and a dedicated render
//! thread.
//!
//! ## Protocol
//! The render thread loops over two barriers. At `barrier_in` it has finished
//! its frame and the producer takes the render world; at `barrier_out` the
//! producer hands it back and the render thread acts on the current
//! [`ThreadState`]. Between the two crossings only the producer touches the
//! world, which is why the world mutex is never contended.
//!
//! ## Modes
//! - **Asynchronous**: the render thread draws frame N while the producer
//!   updates frame N+1.
//! - **Synchronous**: no thread; `synchronize` renders inline.
//!
//! Per-frame failures never stop the loop. They are logged, counted and
//! reported to the producer through the failure flag at the next crossing.

mod state;
mod timing;

pub use state::ThreadState;
pub use timing::{frame_time_limit, AtomicF32, FrameLimiter, TimeHistory};

use crate::config::RenderConfig;
use crate::delayed::DelayedOperations;
use crate::errors::RenderError;
use crate::render::{FrameStats, GraphicsDevice, RenderWorld, WindowKey};
use crate::window::{RenderWindow, WindowDescriptor, WindowSurface};
use crossbeam_channel::Receiver;
use state::StateCell;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Window created together with the render thread.
pub struct InitialWindow {
    pub surface: Box<dyn WindowSurface>,
    pub descriptor: WindowDescriptor,
}

impl InitialWindow {
    pub fn new(surface: impl WindowSurface + 'static, descriptor: WindowDescriptor) -> Self {
        Self {
            surface: Box::new(surface),
            descriptor,
        }
    }
}

struct Shared {
    world: Mutex<RenderWorld>,
    state: StateCell,
    barrier_in: Barrier,
    barrier_out: Barrier,
    failure: AtomicBool,
    failed_frames: AtomicU64,
    init_error: Mutex<Option<RenderError>>,
    estimated_render_time: AtomicF32,
    frame_time_limit: AtomicF32,
    fps: AtomicF32,
}

impl Shared {
    fn world(&self) -> MutexGuard<'_, RenderWorld> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the world. A panic comes back as `ThreadFailure`, so the
    /// render thread always reaches its next barrier.
    fn with_world_guarded(
        &self,
        f: impl FnOnce(&mut RenderWorld) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        catch_unwind(AssertUnwindSafe(|| f(&mut *self.world()))).unwrap_or_else(|panic| {
            Err(RenderError::ThreadFailure(panic_message(panic.as_ref())))
        })
    }

    /// Renders one frame, turning errors and panics into a failure report.
    fn render_frame_guarded(&self) {
        if let Err(e) = self.with_world_guarded(RenderWorld::render_frame) {
            error!(error = %e, "Render frame failed");
            self.report_failure();
            self.world().stats.failed_frames += 1;
        }
    }

    fn report_failure(&self) {
        self.failure.store(true, Ordering::Release);
        self.failed_frames.fetch_add(1, Ordering::Relaxed);
    }

    fn record_init_error(&self, error: RenderError) {
        *self.init_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Failure of a render-side start-up phase, as seen by the producer.
    fn take_init_error(&self) -> Option<RenderError> {
        let error = self
            .init_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(match error {
            RenderError::ThreadFailure(_) => error,
            other => RenderError::ThreadFailure(other.to_string()),
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "render thread panicked".to_string()
    }
}

pub struct RenderThread {
    config: RenderConfig,
    shared: Arc<Shared>,
    delayed: Arc<DelayedOperations>,
    handle: Option<JoinHandle<()>>,
    /// The producer crossed `barrier_in` and still owes `barrier_out`.
    held: bool,
    last_frame_failed: bool,
    main_timer: Instant,
    main_history: TimeHistory,
    accumulated_main_time: f32,
    render_history: TimeHistory,
}

impl RenderThread {
    pub fn new(config: RenderConfig) -> Self {
        let delayed = Arc::new(DelayedOperations::new());
        let device = GraphicsDevice::new(config.max_texture_size);
        let world = RenderWorld::with_delayed(device, Arc::clone(&delayed));
        let shared = Arc::new(Shared {
            world: Mutex::new(world),
            state: StateCell::new(),
            barrier_in: Barrier::new(2),
            barrier_out: Barrier::new(2),
            failure: AtomicBool::new(false),
            failed_frames: AtomicU64::new(0),
            init_error: Mutex::new(None),
            estimated_render_time: AtomicF32::new(0.0),
            frame_time_limit: AtomicF32::new(frame_time_limit(60)),
            fps: AtomicF32::new(0.0),
        });
        Self {
            main_history: TimeHistory::new(config.time_history_size, config.time_history_prune),
            render_history: TimeHistory::new(config.time_history_size, config.time_history_prune),
            config,
            shared,
            delayed,
            handle: None,
            held: false,
            last_frame_failed: false,
            main_timer: Instant::now(),
            accumulated_main_time: 0.0,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn state(&self) -> ThreadState {
        self.shared.state.get()
    }

    pub fn is_async(&self) -> bool {
        self.config.async_rendering
    }

    /// Channel receiving every state change from now on.
    pub fn state_monitor(&self) -> Receiver<ThreadState> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.shared.state.attach_monitor(tx);
        rx
    }

    pub fn delayed(&self) -> &Arc<DelayedOperations> {
        &self.delayed
    }

    /// Seconds per frame the render loop is held to.
    pub fn frame_time_limit(&self) -> f32 {
        self.shared.frame_time_limit.load()
    }

    /// `max(average render time, frame time limit)` as last published by
    /// the render thread.
    pub fn estimated_render_time(&self) -> f32 {
        self.shared.estimated_render_time.load()
    }

    pub fn fps(&self) -> f32 {
        self.shared.fps.load()
    }

    pub fn failed_frames(&self) -> u64 {
        self.shared.failed_frames.load(Ordering::Relaxed)
    }

    /// Whether a frame failed since the previous barrier crossing.
    pub fn last_frame_failed(&self) -> bool {
        self.last_frame_failed
    }

    /// Runs through the four start-up phases: capability check and window
    /// creation on this thread, surface binding on the render thread, frame
    /// pacing setup here, then the first back buffers on the render thread.
    #[instrument(skip(self, window), fields(async_rendering = self.config.async_rendering))]
    pub fn init(
        &mut self,
        window: Option<InitialWindow>,
    ) -> Result<Option<RenderWindow>, RenderError> {
        if self.state() != ThreadState::Stopped {
            return Err(RenderError::invalid("render thread already initialized"));
        }
        self.config.validate()?;
        self.shared.state.set(ThreadState::Initializing);

        // Phase 1: main thread
        let (refresh_rate, window) = match self.init_main(window) {
            Ok(created) => created,
            Err(e) => {
                error!(error = %e, "Render thread initialization failed");
                self.shared.state.set(ThreadState::Stopped);
                return Err(e);
            }
        };
        let rate = match self.config.frame_rate_limit {
            0 => refresh_rate,
            limit => limit,
        };

        let result = if self.config.async_rendering {
            self.init_async(rate)
        } else {
            self.init_sync(rate)
        };
        match result {
            Ok(()) => {
                self.shared.state.set(ThreadState::Synchronize);
                self.main_timer = Instant::now();
                info!(frame_rate = rate, "Render thread initialized");
                Ok(window)
            }
            Err(e) => {
                error!(error = %e, "Render thread initialization failed");
                self.shared.state.set(ThreadState::Stopped);
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                self.shared.world().cleanup();
                Err(e)
            }
        }
    }

    fn init_main(
        &mut self,
        window: Option<InitialWindow>,
    ) -> Result<(u32, Option<RenderWindow>), RenderError> {
        let mut world = self.shared.world();
        world.device().verify_capabilities()?;
        let Some(InitialWindow {
            mut surface,
            descriptor,
        }) = window
        else {
            return Ok((60, None));
        };
        surface.create(descriptor.width, descriptor.height)?;
        surface.set_title(&descriptor.title);
        if descriptor.fullscreen {
            surface.set_fullscreen(true);
        }
        let rate = match surface.refresh_rate() {
            0 => 60,
            rate => rate,
        };
        let key = world.add_window(surface, &descriptor);
        Ok((rate, Some(RenderWindow::new(key, descriptor))))
    }

    fn init_sync(&mut self, rate: u32) -> Result<(), RenderError> {
        self.shared.frame_time_limit.store(frame_time_limit(rate));
        self.shared.with_world_guarded(|world| {
            world.bind_windows()?;
            world.prepare_windows()
        })
    }

    fn init_async(&mut self, rate: u32) -> Result<(), RenderError> {
        let shared = Arc::clone(&self.shared);
        let history = (self.config.time_history_size, self.config.time_history_prune);
        let limiter = FrameLimiter::new(self.config.frame_limiter);
        let handle = std::thread::Builder::new()
            .name("tandem-render".into())
            .spawn(move || render_main(shared, history, limiter))?;
        self.handle = Some(handle);

        // Phase 2: render thread binds surfaces
        self.shared.barrier_out.wait();
        if let Some(e) = self.shared.take_init_error() {
            return Err(e);
        }

        // Phase 3: main thread
        self.shared.frame_time_limit.store(frame_time_limit(rate));

        // Phase 4: render thread prepares back buffers
        self.shared.barrier_in.wait();
        self.shared.barrier_out.wait();
        if let Some(e) = self.shared.take_init_error() {
            return Err(e);
        }
        Ok(())
    }

    /// Blocks until the render thread finished its frame and parked at
    /// `barrier_in`. Calling it again before the next `synchronize` is a
    /// no-op.
    pub fn wait_finish_rendering(&mut self) {
        if !self.config.async_rendering || self.handle.is_none() {
            return;
        }
        if !self.held {
            self.shared.barrier_in.wait();
            self.held = true;
            self.last_frame_failed = self.shared.failure.swap(false, Ordering::AcqRel);
            if self.last_frame_failed {
                warn!(
                    failed_frames = self.failed_frames(),
                    "Render thread reported a failed frame"
                );
            }
        }
        if matches!(
            self.state(),
            ThreadState::Rendering | ThreadState::WindowTerminate | ThreadState::WindowInit
        ) {
            self.shared.state.set(ThreadState::FinishedRendering);
        }
    }

    fn release(&mut self) {
        if self.held {
            self.held = false;
            self.shared.barrier_out.wait();
        }
    }

    /// Producer-side frame pacing. Returns `false` when the render thread is
    /// expected to stay busy long enough that the producer should run
    /// another update instead of waiting; returns `true` after waiting.
    pub fn main_thread_wait_finish_rendering(&mut self) -> bool {
        let game_time = self.main_timer.elapsed().as_secs_f32();
        self.main_timer = Instant::now();
        self.main_history.add(game_time);

        let in_flight = self.config.async_rendering && self.state() == ThreadState::Rendering;
        if let (true, Some(average)) = (in_flight, self.main_history.average()) {
            self.accumulated_main_time += game_time;
            let remaining = self.estimated_render_time() - self.accumulated_main_time;
            let estimated_game_time = average.max(0.001);
            if remaining / estimated_game_time >= self.config.async_render_skip_sync_time_ratio {
                debug!(remaining, estimated_game_time, "Skipping synchronize");
                return false;
            }
        }
        self.accumulated_main_time = 0.0;
        self.wait_finish_rendering();
        true
    }

    /// Runs `sync` on the quiescent render world, then starts the next frame.
    ///
    /// While frozen or while the window is down the closure still runs but
    /// nothing is rendered.
    pub fn synchronize<F>(&mut self, sync: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut RenderWorld) -> Result<(), RenderError>,
    {
        match self.state() {
            ThreadState::Stopped | ThreadState::Initializing | ThreadState::CleaningUp => {
                return Err(RenderError::invalid("render thread is not running"));
            }
            _ => {}
        }
        self.delayed.process_synchronize_operations();
        self.wait_finish_rendering();

        let idle = matches!(self.state(), ThreadState::Frozen | ThreadState::WindowDown);
        if !idle {
            self.shared.state.set(ThreadState::Synchronize);
        }
        sync(&mut self.shared.world())?;
        if idle {
            return Ok(());
        }

        self.shared.state.set(ThreadState::Rendering);
        if self.config.async_rendering {
            self.release();
        } else {
            let start = Instant::now();
            self.shared.render_frame_guarded();
            self.render_history.add(start.elapsed().as_secs_f32());
            let limit = self.frame_time_limit();
            let estimate = self.render_history.average().map_or(limit, |avg| avg.max(limit));
            self.shared.estimated_render_time.store(estimate);
            self.last_frame_failed = self.shared.failure.swap(false, Ordering::AcqRel);
            self.shared.state.set(ThreadState::FinishedRendering);
        }
        Ok(())
    }

    /// Pauses rendering while keeping the thread alive.
    pub fn freeze(&mut self) {
        self.wait_finish_rendering();
        match self.state() {
            ThreadState::FinishedRendering | ThreadState::Synchronize => {
                self.shared.state.set(ThreadState::Frozen);
                info!("Render thread frozen");
            }
            state => warn!(?state, "Cannot freeze render thread"),
        }
    }

    pub fn unfreeze(&mut self) {
        if self.state() == ThreadState::Frozen {
            self.shared.state.set(ThreadState::Synchronize);
            info!("Render thread unfrozen");
        }
    }

    /// Creates a window surface here and hands it to the render thread,
    /// which binds it before its next frame.
    pub fn create_render_window(
        &mut self,
        mut surface: Box<dyn WindowSurface>,
        descriptor: WindowDescriptor,
    ) -> Result<RenderWindow, RenderError> {
        if self.state() == ThreadState::Stopped {
            return Err(RenderError::invalid("render thread is not running"));
        }
        self.wait_finish_rendering();
        surface.create(descriptor.width, descriptor.height)?;
        surface.set_title(&descriptor.title);
        if descriptor.fullscreen {
            surface.set_fullscreen(true);
        }
        let key = self.shared.world().add_window(surface, &descriptor);
        if self.state() == ThreadState::FinishedRendering {
            self.shared.state.set(ThreadState::Synchronize);
        }
        info!(title = %descriptor.title, "Render window created");
        Ok(RenderWindow::new(key, descriptor))
    }

    pub fn destroy_render_window(&mut self, window: RenderWindow) {
        self.wait_finish_rendering();
        self.shared.world().remove_window(window.key());
    }

    /// The platform took the window away (app moved to the background).
    pub fn suspend_window(&mut self) -> Result<(), RenderError> {
        self.wait_finish_rendering();
        match self.state() {
            ThreadState::FinishedRendering | ThreadState::Synchronize => {}
            ThreadState::WindowDown => return Ok(()),
            state => {
                return Err(RenderError::invalid(format!(
                    "cannot suspend windows while {state:?}"
                )))
            }
        }
        if self.state() == ThreadState::Synchronize {
            self.shared.state.set(ThreadState::FinishedRendering);
        }
        self.shared.state.set(ThreadState::WindowTerminate);
        if self.config.async_rendering {
            self.release();
            self.wait_finish_rendering();
        } else {
            let suspended = self.shared.with_world_guarded(|world| {
                world.suspend_windows();
                Ok(())
            });
            self.shared.state.set(ThreadState::FinishedRendering);
            suspended?;
        }
        self.shared.state.set(ThreadState::WindowDown);
        Ok(())
    }

    /// The window is back. Surfaces are rebound on the render thread.
    pub fn resume_window(&mut self) -> Result<(), RenderError> {
        if self.state() != ThreadState::WindowDown {
            return Err(RenderError::invalid("windows are not suspended"));
        }
        self.shared.state.set(ThreadState::WindowInit);
        if self.config.async_rendering {
            self.release();
            self.wait_finish_rendering();
            if self.last_frame_failed {
                return Err(RenderError::ThreadFailure("window resume failed".into()));
            }
            Ok(())
        } else {
            let resumed = self
                .shared
                .with_world_guarded(|world| world.resume_windows().and_then(|()| world.bind_windows()));
            self.shared.state.set(ThreadState::FinishedRendering);
            resumed
        }
    }

    /// Read access to the render world once the current frame is done.
    pub fn inspect<R>(&mut self, f: impl FnOnce(&RenderWorld) -> R) -> R {
        self.wait_finish_rendering();
        f(&self.shared.world())
    }

    pub fn stats(&mut self) -> FrameStats {
        self.inspect(|world| world.stats())
    }

    pub fn window_size(&mut self, key: WindowKey) -> Option<(u32, u32)> {
        self.inspect(|world| world.window(key).map(|w| w.size()))
    }

    /// Stops the render thread and releases every render resource.
    #[instrument(skip(self))]
    pub fn cleanup(&mut self) {
        if self.state() == ThreadState::Stopped {
            return;
        }
        self.wait_finish_rendering();
        if self.state() == ThreadState::Rendering {
            self.shared.state.set(ThreadState::FinishedRendering);
        }
        self.shared.state.set(ThreadState::CleaningUp);
        match self.handle.take() {
            Some(handle) => {
                self.release();
                if handle.join().is_err() {
                    error!("Render thread panicked during cleanup");
                }
            }
            None => self.shared.world().cleanup(),
        }
        self.delayed.process_synchronize_operations();
        self.shared.state.set(ThreadState::Stopped);
        info!("Render thread stopped");
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn render_main(shared: Arc<Shared>, history: (usize, usize), limiter: FrameLimiter) {
    // Phase 2
    let bound = shared.with_world_guarded(RenderWorld::bind_windows);
    let ok = bound.is_ok();
    if let Err(e) = bound {
        shared.record_init_error(e);
    }
    shared.barrier_out.wait();
    if !ok {
        return;
    }

    // Phase 4
    shared.barrier_in.wait();
    let prepared = shared.with_world_guarded(RenderWorld::prepare_windows);
    let ok = prepared.is_ok();
    if let Err(e) = prepared {
        shared.record_init_error(e);
    }
    shared.barrier_out.wait();
    if !ok {
        return;
    }
    debug!("Render loop started");

    let mut render_history = TimeHistory::new(history.0, history.1);
    let mut frame_history = TimeHistory::new(history.0, history.1);
    let mut last_frame_start: Option<Instant> = None;
    loop {
        shared.barrier_in.wait();
        let limit = shared.frame_time_limit.load();
        let estimate = render_history.average().map_or(limit, |avg| avg.max(limit));
        shared.estimated_render_time.store(estimate);
        if let Some(average) = frame_history.average().filter(|a| *a > 0.0) {
            shared.fps.store(1.0 / average);
        }
        shared.barrier_out.wait();

        match shared.state.get() {
            ThreadState::CleaningUp => break,
            ThreadState::Rendering => {
                let start = Instant::now();
                if let Some(previous) = last_frame_start.replace(start) {
                    frame_history.add((start - previous).as_secs_f32());
                }
                shared.render_frame_guarded();
                render_history.add(start.elapsed().as_secs_f32());
                limiter.wait(start, limit);
            }
            ThreadState::WindowTerminate => {
                let suspended = shared.with_world_guarded(|world| {
                    world.suspend_windows();
                    Ok(())
                });
                if let Err(e) = suspended {
                    error!(error = %e, "Suspending windows failed");
                    shared.report_failure();
                }
                last_frame_start = None;
            }
            ThreadState::WindowInit => {
                let resumed = shared.with_world_guarded(|world| {
                    world.resume_windows().and_then(|()| world.bind_windows())
                });
                if let Err(e) = resumed {
                    error!(error = %e, "Resuming windows failed");
                    shared.report_failure();
                }
            }
            _ => {}
        }
    }

    shared.world().cleanup();
    debug!("Render loop finished");
}
