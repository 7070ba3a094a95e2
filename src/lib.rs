//! # `richbar`
//!
//! Thread-safe progress tracking with tqdm-style iterator wrapping and pluggable
//! terminal rendering.
//!
//! `richbar` separates *tracking* from *drawing*:
//!
//! * **Tracking**: a [`TaskRegistry`] holds any number of tasks, each behind its own
//!   lock, and accepts updates from any thread without lost increments.
//! * **Drawing**: a [`RenderCoordinator`] pulls ordered, owned snapshots from the
//!   registry and hands them to a [`Renderer`]. No lock is held while drawing.
//!
//! Tasks with a known total report `current / total`; tasks without one follow a
//! logarithmic curve that keeps moving but never claims completion.
//!
//! ## Quick Start
//!
//! ```
//! use richbar::{ProgressIteratorExt, RecordingRenderer, RenderCoordinator, TaskRegistry};
//!
//! let registry = TaskRegistry::new();
//! let renderer = RecordingRenderer::new();
//! let coordinator = RenderCoordinator::new(registry.clone(), renderer.clone());
//!
//! let copy = registry.create("copy", Some(100.0), false).unwrap();
//! copy.advance(40).unwrap();
//!
//! for _file in ["a", "b", "c"].iter().track_named(&registry, "scan").unwrap() {}
//!
//! coordinator.refresh();
//! let frame = renderer.last_frame().unwrap();
//! assert_eq!(frame.len(), 2);
//! assert_eq!(frame.0[0].fraction(), 0.4);
//! ```
//!
//! ## Modules
//!
//! * [`task`]: Per-task state machine, fraction math and [`TaskSnapshot`].
//! * [`rate`]: Sliding-window throughput and ETA.
//! * [`registry`]: The concurrent [`TaskRegistry`] and [`TaskHandle`].
//! * [`options`]: [`TrackOptions`] for configuring tracked tasks.
//! * [`iter`]: Iterator adapters and scoped close guarantees.
//! * [`render`]: The renderer boundary and [`RenderCoordinator`].
//! * [`clock`]: Time sources, including a manual clock for tests.
//! * `terminal` (feature `indicatif`): an `indicatif`-backed renderer.
//!
//! ## Default Instance
//!
//! [`global`] returns a lazily created process-wide registry used by [`start`] and
//! [`track`]. Nothing else depends on it; construct your own registry whenever a
//! program needs more than one display region or deterministic teardown.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod clock;
pub mod error;
pub mod iter;
pub mod options;
pub mod rate;
pub mod registry;
pub mod render;
pub mod task;
#[cfg(feature = "indicatif")]
pub mod terminal;

use std::sync::OnceLock;

use compact_str::CompactString;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ProgressError, Result};
pub use iter::{ProgressIteratorExt, TrackScope, Tracked};
pub use options::TrackOptions;
pub use rate::RateEstimator;
pub use registry::{RegistrySnapshot, TaskHandle, TaskRegistry};
pub use render::{RecordingRenderer, RenderCoordinator, Renderer};
pub use task::{Color, Mode, Status, TaskId, TaskSnapshot};
#[cfg(feature = "indicatif")]
pub use terminal::IndicatifRenderer;

/// The default registry, created on first use.
pub fn global() -> &'static TaskRegistry {
    static GLOBAL: OnceLock<TaskRegistry> = OnceLock::new();
    GLOBAL.get_or_init(TaskRegistry::new)
}

/// Starts a manual task in the [`global`] registry.
///
/// # Errors
///
/// [`ProgressError::InvalidTotal`] if `total` is negative, NaN or infinite.
pub fn start(description: impl Into<CompactString>, total: Option<f64>) -> Result<TaskHandle> {
    global().create(description, total, false)
}

/// Wraps `iterable` in a task of the [`global`] registry.
///
/// # Errors
///
/// [`ProgressError::InvalidTotal`] if `options` carries an invalid total.
pub fn track<I: IntoIterator>(iterable: I, options: &TrackOptions) -> Result<Tracked<I::IntoIter>> {
    iterable.into_iter().track_with(global(), options)
}
