//! Terminal rendering through `indicatif`.
//!
//! [`IndicatifRenderer`] turns each [`TaskSnapshot`] into one bar of a
//! [`MultiProgress`]. Bars are added in creation order, colored by the snapshot's
//! [`Color`], and finished (or cleared, for transient tasks) the first time a
//! terminal snapshot arrives.
//!
//! Indeterminate tasks are drawn as ordinary bars filled to their logarithmic
//! fraction, so they visibly creep forward without ever looking complete.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    fmt::Write as _,
    time::Duration,
};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::{
    registry::RegistrySnapshot,
    render::Renderer,
    task::{Color, TaskId, TaskSnapshot},
};

/// Bar length used to map a fraction onto indicatif's integer positions.
const RESOLUTION: u64 = 1_000;

struct Row {
    bar: ProgressBar,
    color: Color,
}

/// Draws frames as a stack of `indicatif` bars.
pub struct IndicatifRenderer {
    multi: MultiProgress,
    rows: BTreeMap<TaskId, Row>,
    done: BTreeSet<TaskId>,
}

impl fmt::Debug for IndicatifRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndicatifRenderer")
            .field("rows", &self.rows.len())
            .field("done", &self.done.len())
            .finish_non_exhaustive()
    }
}

impl Default for IndicatifRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatifRenderer {
    /// Draws to stderr.
    #[must_use]
    pub fn new() -> Self {
        Self::with_multi(MultiProgress::new())
    }

    /// Draws nothing; useful in tests and when output is not a terminal.
    #[must_use]
    pub fn hidden() -> Self {
        Self::with_multi(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()))
    }

    /// Draws into an existing [`MultiProgress`], e.g. one shared with a log bridge.
    #[must_use]
    pub fn with_multi(multi: MultiProgress) -> Self {
        Self {
            multi,
            rows: BTreeMap::new(),
            done: BTreeSet::new(),
        }
    }

    /// The underlying [`MultiProgress`].
    #[must_use]
    pub const fn multi(&self) -> &MultiProgress {
        &self.multi
    }

    /// Number of bars currently on screen.
    #[must_use]
    pub fn active_rows(&self) -> usize {
        self.rows.len()
    }

    fn row(&mut self, snap: &TaskSnapshot) -> &mut Row {
        let multi = &self.multi;
        self.rows.entry(snap.id()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(RESOLUTION));
            bar.set_style(style_for(snap.color()));
            Row {
                bar,
                color: snap.color(),
            }
        })
    }

    fn update(&mut self, snap: &TaskSnapshot) {
        let row = self.row(snap);
        if row.color != snap.color() {
            row.bar.set_style(style_for(snap.color()));
            row.color = snap.color();
        }
        row.bar.set_prefix(snap.description().to_owned());
        row.bar.set_message(stats_line(snap));
        row.bar.set_position(bar_position(snap.fraction()));

        if snap.is_finished() {
            if snap.transient() {
                row.bar.finish_and_clear();
            } else {
                row.bar.finish();
            }
            self.rows.remove(&snap.id());
            self.done.insert(snap.id());
        }
    }
}

impl Renderer for IndicatifRenderer {
    fn draw(&mut self, frame: &RegistrySnapshot) {
        for snap in frame {
            if self.done.contains(&snap.id()) {
                continue;
            }
            // Already gone before its first frame: nothing to clear.
            if snap.is_finished() && snap.transient() && !self.rows.contains_key(&snap.id()) {
                self.done.insert(snap.id());
                continue;
            }
            self.update(snap);
        }

        // Tasks that left the registry while still on screen.
        let present: BTreeSet<TaskId> = frame.iter().map(TaskSnapshot::id).collect();
        self.rows.retain(|id, row| {
            let keep = present.contains(id);
            if !keep {
                row.bar.abandon();
            }
            keep
        });
        self.done.retain(|id| present.contains(id));
    }
}

fn style_for(color: Color) -> ProgressStyle {
    let template = format!("{{prefix:.bold}} {{bar:40.{}/dim}} {{msg}}", color.name());
    ProgressStyle::with_template(&template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸ ")
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn bar_position(fraction: f64) -> u64 {
    (fraction.clamp(0.0, 1.0) * RESOLUTION as f64).round() as u64
}

/// `MM:SS`, or `H:MM:SS` past the hour.
fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

fn format_rate(rate: Option<f64>, unit: &str) -> String {
    match rate {
        Some(rate) if rate > 0.0 && rate < 1.0 => format!("{:.2}s/{unit}", 1.0 / rate),
        Some(rate) => format!("{rate:.2}{unit}/s"),
        None => format!("?{unit}/s"),
    }
}

fn format_total(total: f64) -> String {
    if total.fract() == 0.0 {
        format!("{total:.0}")
    } else {
        format!("{total:.2}")
    }
}

/// The text right of the bar, in tqdm's layout.
fn stats_line(snap: &TaskSnapshot) -> String {
    let mut line = match snap.total() {
        Some(total) => format!(
            "{}/{} [{}<{}, {}]",
            snap.current(),
            format_total(total),
            format_clock(snap.elapsed()),
            snap.eta().map_or_else(|| "?".to_owned(), format_clock),
            format_rate(snap.rate(), snap.unit()),
        ),
        None => format!(
            "{}{} [{}, {}]",
            snap.current(),
            snap.unit(),
            format_clock(snap.elapsed()),
            format_rate(snap.rate(), snap.unit()),
        ),
    };
    if let Some(error) = snap.error() {
        let _ = write!(line, " ✗ {error}");
    }
    line
}
