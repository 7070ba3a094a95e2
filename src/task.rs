//! Per-task progress state and its lifecycle.
//!
//! A [`ProgressTask`] is the mutable record behind one progress row. It is never
//! handed out directly: the [`TaskRegistry`](crate::TaskRegistry) keeps each task
//! behind its own mutex and exposes plain-data [`TaskSnapshot`]s to renderers.
//!
//! # Lifecycle
//!
//! ```text
//! Running ──close(true)──▶ Success
//!    │
//!    └──close(false) / close(_, error)──▶ Error
//! ```
//!
//! The first `close` wins. Later calls return the status already in effect and
//! never overwrite it. Once terminal, a task rejects `advance`, `set_total` and
//! `set_description`.
//!
//! # Fraction
//!
//! * **Determinate** (`total > 0`): `current / total`, clamped to `[0, 1]`. The stored
//!   count is never clamped, only the value read from it.
//! * **Determinate, `total == 0`**: trivially complete, `1.0`.
//! * **Indeterminate** (no total): `1 - 1/(1 + current)`, strictly increasing and
//!   always below `1.0` while running.

use std::{fmt, time::Duration};

use compact_str::CompactString;
use web_time::Instant;

use crate::{
    error::{ProgressError, Result},
    rate::RateEstimator,
};

/// Largest `f64` strictly below `1.0`.
const ALMOST_ONE: f64 = 1.0 - f64::EPSILON / 2.0;

/// Opaque identity of a task within its registry.
///
/// Identities are allocated in creation order and never reused, so ordering by
/// `TaskId` is ordering by creation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the numeric value of this identity.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle status of a task.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    /// Accepting updates.
    #[default]
    Running,
    /// Closed successfully.
    Success,
    /// Closed with a failure.
    Error,
}

impl Status {
    /// Returns `true` for [`Status::Success`] and [`Status::Error`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// The display color associated with this status.
    #[must_use]
    pub const fn color(self) -> Color {
        match self {
            Self::Running => Color::Neutral,
            Self::Success => Color::Success,
            Self::Error => Color::Error,
        }
    }
}

/// Rendering hint derived from [`Status`]. The core never draws it.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Color {
    /// Work in progress.
    #[default]
    Neutral,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Error,
}

impl Color {
    /// Terminal color name conventionally used for this hint.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Neutral => "blue",
            Self::Success => "green",
            Self::Error => "red",
        }
    }
}

/// Whether a task has a known total.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// No total: progress follows a saturating curve of the count.
    #[default]
    Indeterminate,
    /// Known total: progress is `current / total`.
    Determinate,
}

/// Checks that a total is a finite, non-negative number.
pub(crate) fn validate_total(total: f64) -> Result<f64> {
    if total.is_finite() && total >= 0.0 {
        Ok(total)
    } else {
        Err(ProgressError::InvalidTotal(total))
    }
}

/// Completion fraction for a count against an optional total.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn fraction(current: u64, total: Option<f64>) -> f64 {
    match total {
        Some(total) if total > 0.0 => (current as f64 / total).clamp(0.0, 1.0),
        Some(_) => 1.0,
        None => (1.0 - 1.0 / (1.0 + current as f64)).min(ALMOST_ONE),
    }
}

/// Mutable state for a single progress task.
///
/// Guarded by a per-task mutex inside the registry; none of these methods lock.
#[derive(Debug)]
pub(crate) struct ProgressTask {
    id: TaskId,
    description: CompactString,
    unit: CompactString,
    total: Option<f64>,
    current: u64,
    status: Status,
    transient: bool,
    error: Option<CompactString>,
    start_time: Instant,
    last_update_time: Instant,
    stopped: Option<Instant>,
    rate: RateEstimator,
    flushed: bool,
}

impl ProgressTask {
    pub(crate) fn new(
        id: TaskId,
        description: impl Into<CompactString>,
        total: Option<f64>,
        transient: bool,
        now: Instant,
    ) -> Result<Self> {
        let total = total.map(validate_total).transpose()?;
        let mut rate = RateEstimator::new();
        rate.record(now, 0);

        Ok(Self {
            id,
            description: description.into(),
            unit: CompactString::const_new("it"),
            total,
            current: 0,
            status: Status::Running,
            transient,
            error: None,
            start_time: now,
            last_update_time: now,
            stopped: None,
            rate,
            flushed: false,
        })
    }

    pub(crate) const fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn set_unit(&mut self, unit: impl Into<CompactString>) {
        self.unit = unit.into();
    }

    fn ensure_running(&self) -> Result<()> {
        if self.status.is_terminal() {
            Err(ProgressError::TaskFinished(self.id))
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Mutation (Running only)
    // ========================================================================

    /// Adds `delta` to the count and returns the new count.
    pub(crate) fn advance(&mut self, delta: i64, now: Instant) -> Result<u64> {
        let delta = u64::try_from(delta).map_err(|_| ProgressError::NegativeDelta(delta))?;
        self.ensure_running()?;

        self.current = self.current.saturating_add(delta);
        self.last_update_time = now;
        self.rate.record(now, self.current);
        Ok(self.current)
    }

    /// Replaces the total. `None` switches the task to indeterminate mode.
    pub(crate) fn set_total(&mut self, total: Option<f64>, now: Instant) -> Result<()> {
        let total = total.map(validate_total).transpose()?;
        self.ensure_running()?;

        self.total = total;
        self.last_update_time = now;
        Ok(())
    }

    pub(crate) fn set_description(
        &mut self,
        description: impl Into<CompactString>,
        now: Instant,
    ) -> Result<()> {
        self.ensure_running()?;

        self.description = description.into();
        self.last_update_time = now;
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Moves the task to a terminal status, once.
    ///
    /// An `error` forces [`Status::Error`] regardless of `success`. If the task is
    /// already terminal nothing changes and the existing status is returned.
    pub(crate) fn close(&mut self, success: bool, error: Option<&str>, now: Instant) -> Status {
        if self.status.is_terminal() {
            return self.status;
        }

        self.status = match error {
            Some(message) => {
                self.error = Some(message.into());
                Status::Error
            }
            None if success => Status::Success,
            None => Status::Error,
        };
        self.stopped = Some(now);
        self.last_update_time = now;
        self.status
    }

    pub(crate) const fn status(&self) -> Status {
        self.status
    }

    pub(crate) const fn is_flushed(&self) -> bool {
        self.flushed
    }

    // ========================================================================
    // Derived values
    // ========================================================================

    pub(crate) const fn mode(&self) -> Mode {
        if self.total.is_some() {
            Mode::Determinate
        } else {
            Mode::Indeterminate
        }
    }

    /// Current completion fraction.
    ///
    /// An indeterminate task that closed successfully reads as complete.
    pub(crate) fn fraction(&self) -> f64 {
        if self.total.is_none() && self.status == Status::Success {
            return 1.0;
        }
        fraction(self.current, self.total)
    }

    fn elapsed(&self, now: Instant) -> Duration {
        self.stopped
            .unwrap_or(now)
            .saturating_duration_since(self.start_time)
    }

    #[allow(clippy::cast_precision_loss)]
    fn eta(&self) -> Option<Duration> {
        if self.status.is_terminal() {
            return None;
        }
        let total = self.total?;
        self.rate.eta(total - self.current as f64)
    }

    /// Copies the renderable fields out.
    pub(crate) fn snapshot(&self, now: Instant) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            description: self.description.clone(),
            unit: self.unit.clone(),
            mode: self.mode(),
            fraction: self.fraction(),
            current: self.current,
            total: self.total,
            status: self.status,
            rate: self.rate.rate(),
            eta: self.eta(),
            elapsed: self.elapsed(now),
            since_update: now.saturating_duration_since(self.last_update_time),
            transient: self.transient,
            error: self.error.clone(),
        }
    }

    /// Snapshot taken on the render path.
    ///
    /// A terminal task observed here counts as flushed and becomes removable.
    pub(crate) fn observe(&mut self, now: Instant) -> TaskSnapshot {
        if self.status.is_terminal() {
            self.flushed = true;
        }
        self.snapshot(now)
    }
}

/// Immutable point-in-time copy of a task's renderable fields.
///
/// Holds owned data only, so it can be passed to a renderer without any lock held.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskSnapshot {
    id: TaskId,
    description: CompactString,
    unit: CompactString,
    mode: Mode,
    fraction: f64,
    current: u64,
    total: Option<f64>,
    status: Status,
    rate: Option<f64>,
    eta: Option<Duration>,
    elapsed: Duration,
    since_update: Duration,
    transient: bool,
    error: Option<CompactString>,
}

impl TaskSnapshot {
    /// Identity of the task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Label of the task.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Unit label for the count (defaults to `"it"`).
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Determinate or indeterminate.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Shorthand for `mode() == Mode::Indeterminate`.
    #[must_use]
    pub const fn is_indeterminate(&self) -> bool {
        matches!(self.mode, Mode::Indeterminate)
    }

    /// Completion fraction in `[0, 1]`.
    #[must_use]
    pub const fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Raw count, possibly above the total.
    #[must_use]
    pub const fn current(&self) -> u64 {
        self.current
    }

    /// Total, if known.
    #[must_use]
    pub const fn total(&self) -> Option<f64> {
        self.total
    }

    /// Lifecycle status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Display color, a function of [`status`](Self::status).
    #[must_use]
    pub const fn color(&self) -> Color {
        self.status.color()
    }

    /// Smoothed items per second, if known.
    #[must_use]
    pub const fn rate(&self) -> Option<f64> {
        self.rate
    }

    /// Estimated time remaining. Only determinate, running tasks have one.
    #[must_use]
    pub const fn eta(&self) -> Option<Duration> {
        self.eta
    }

    /// Time since the task started, frozen once it finished.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Time since the last mutation.
    #[must_use]
    pub const fn since_update(&self) -> Duration {
        self.since_update
    }

    /// Whether the row disappears once the task is terminal.
    #[must_use]
    pub const fn transient(&self) -> bool {
        self.transient
    }

    /// Returns `true` once the task is terminal.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a renderer should still show this row.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        !(self.transient && self.is_finished())
    }

    /// The failure message recorded at close, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
