//! The boundary between the progress engine and whatever draws it.
//!
//! A [`Renderer`] receives ordered [`RegistrySnapshot`]s and redraws a terminal
//! region (or anything else). It never sees a lock: every frame is an owned copy.
//!
//! [`RenderCoordinator`] pulls frames from a [`TaskRegistry`] and forwards them,
//! either on demand via [`refresh`](RenderCoordinator::refresh) or from a
//! background thread at a fixed interval. After each frame it prunes finished
//! tasks that the frame has flushed, so the registry does not grow without bound.

use std::{
    fmt, io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use crate::registry::{RegistrySnapshot, TaskRegistry};

/// Default redraw cadence (10 Hz).
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Something that draws frames of progress rows.
pub trait Renderer: Send {
    /// Draws one frame. Rows arrive in creation order.
    fn draw(&mut self, frame: &RegistrySnapshot);

    /// Called once with the last frame when the coordinator stops.
    fn finish(&mut self, frame: &RegistrySnapshot) {
        self.draw(frame);
    }
}

/// A renderer that keeps every frame it receives.
///
/// Clones share the same frame log, so one clone can be handed to a coordinator
/// while another inspects the output.
#[derive(Clone, Debug, Default)]
pub struct RecordingRenderer {
    frames: Arc<Mutex<Vec<RegistrySnapshot>>>,
    finished: Arc<Mutex<bool>>,
}

impl RecordingRenderer {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All frames drawn so far.
    #[must_use]
    pub fn frames(&self) -> Vec<RegistrySnapshot> {
        self.frames.lock().clone()
    }

    /// The most recent frame.
    #[must_use]
    pub fn last_frame(&self) -> Option<RegistrySnapshot> {
        self.frames.lock().last().cloned()
    }

    /// Whether [`Renderer::finish`] has been called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.finished.lock()
    }
}

impl Renderer for RecordingRenderer {
    fn draw(&mut self, frame: &RegistrySnapshot) {
        self.frames.lock().push(frame.clone());
    }

    fn finish(&mut self, frame: &RegistrySnapshot) {
        self.draw(frame);
        *self.finished.lock() = true;
    }
}

struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Forwards registry snapshots to a [`Renderer`].
///
/// The coordinator never mutates task state other than pruning flushed,
/// finished tasks (see [`with_prune`](Self::with_prune)).
pub struct RenderCoordinator<R> {
    registry: TaskRegistry,
    renderer: Arc<Mutex<R>>,
    interval: Duration,
    prune: bool,
    signal: Arc<StopSignal>,
    worker: Option<JoinHandle<()>>,
}

impl<R> fmt::Debug for RenderCoordinator<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCoordinator")
            .field("registry", &self.registry)
            .field("interval", &self.interval)
            .field("prune", &self.prune)
            .field("running", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl<R: Renderer + 'static> RenderCoordinator<R> {
    /// Couples `registry` to `renderer`. Nothing is drawn until
    /// [`refresh`](Self::refresh) or [`start`](Self::start).
    pub fn new(registry: TaskRegistry, renderer: R) -> Self {
        Self {
            registry,
            renderer: Arc::new(Mutex::new(renderer)),
            interval: DEFAULT_INTERVAL,
            prune: true,
            signal: Arc::new(StopSignal {
                stopped: Mutex::new(false),
                wake: Condvar::new(),
            }),
            worker: None,
        }
    }

    /// Sets the redraw interval used by [`start`](Self::start).
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Whether flushed, finished tasks are removed after each frame (default `true`).
    #[must_use]
    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// The registry being drawn.
    #[must_use]
    pub const fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Runs `f` with exclusive access to the renderer.
    pub fn with_renderer<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        f(&mut self.renderer.lock())
    }

    /// Draws one frame now and returns the number of rows in it.
    pub fn refresh(&self) -> usize {
        draw_frame(&self.registry, &self.renderer, self.prune, false)
    }

    /// Spawns a background thread drawing a frame every interval.
    ///
    /// Calling `start` on a running coordinator does nothing.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn start(&mut self) -> io::Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        *self.signal.stopped.lock() = false;

        let registry = self.registry.clone();
        let renderer = Arc::clone(&self.renderer);
        let signal = Arc::clone(&self.signal);
        let interval = self.interval;
        let prune = self.prune;

        let worker = thread::Builder::new()
            .name("richbar-render".into())
            .spawn(move || {
                let mut stopped = signal.stopped.lock();
                while !*stopped {
                    // Never draw while holding the signal lock.
                    drop(stopped);
                    draw_frame(&registry, &renderer, prune, false);
                    stopped = signal.stopped.lock();
                    if !*stopped {
                        signal.wake.wait_for(&mut stopped, interval);
                    }
                }
            })?;

        log::debug!("render thread started ({interval:?} interval)");
        self.worker = Some(worker);
        Ok(())
    }

    /// Stops the background thread, if any, and draws a final frame through
    /// [`Renderer::finish`].
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            *self.signal.stopped.lock() = true;
            self.signal.wake.notify_all();
            if worker.join().is_err() {
                log::warn!("render thread panicked");
            }
            log::debug!("render thread stopped");
        }
        draw_frame(&self.registry, &self.renderer, self.prune, true);
    }

    /// Whether the background thread is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl<R> Drop for RenderCoordinator<R> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            *self.signal.stopped.lock() = true;
            self.signal.wake.notify_all();
            let _ = worker.join();
        }
    }
}

fn draw_frame<R: Renderer>(
    registry: &TaskRegistry,
    renderer: &Mutex<R>,
    prune: bool,
    last: bool,
) -> usize {
    // Owned copy; no registry or task lock is held past this line.
    let frame = registry.snapshot_all();
    let rows = frame.len();

    {
        let mut renderer = renderer.lock();
        if last {
            renderer.finish(&frame);
        } else {
            renderer.draw(&frame);
        }
    }

    if prune {
        registry.prune();
    }
    rows
}
