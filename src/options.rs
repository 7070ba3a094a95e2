//! Configuration for tracked tasks.
//!
//! [`TrackOptions`] enumerates every option a tracked iterator or manual task
//! understands. It replaces a loose keyword-argument surface with named fields, so
//! a misspelled option is a compile error rather than a silently ignored key.
//!
//! With the `serde` feature the struct also deserializes from configuration files,
//! rejecting unknown keys.
//!
//! # Total Resolution
//!
//! When wrapping an iterator the total is chosen as follows:
//!
//! 1. An explicit [`with_total`](TrackOptions::with_total) always wins.
//! 2. Otherwise, [`logarithmic`](TrackOptions::logarithmic) forces indeterminate mode.
//! 3. Otherwise, an exact [`Iterator::size_hint`] becomes the total.
//! 4. Otherwise the task is indeterminate.

use compact_str::CompactString;

/// Named options for a tracked task.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct TrackOptions {
    description: CompactString,
    total: Option<f64>,
    transient: bool,
    disable: bool,
    unit: CompactString,
    logarithmic: bool,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            description: CompactString::default(),
            total: None,
            transient: false,
            disable: false,
            unit: CompactString::const_new("it"),
            logarithmic: false,
        }
    }
}

impl TrackOptions {
    /// Options with the given label and defaults for everything else.
    #[must_use]
    pub fn new(description: impl Into<CompactString>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<CompactString>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets an explicit total, overriding any length probed from an iterator.
    ///
    /// Validated when the task is created.
    #[must_use]
    pub const fn with_total(mut self, total: f64) -> Self {
        self.total = Some(total);
        self
    }

    /// Removes the row from the display once the task finishes.
    #[must_use]
    pub const fn transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }

    /// Passes items through without registering a task at all.
    #[must_use]
    pub const fn disable(mut self, disable: bool) -> Self {
        self.disable = disable;
        self
    }

    /// Sets the unit label shown next to counts and rates (default `"it"`).
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<CompactString>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Ignores the iterator's length and shows logarithmic progress instead.
    #[must_use]
    pub const fn logarithmic(mut self, logarithmic: bool) -> Self {
        self.logarithmic = logarithmic;
        self
    }

    /// The configured label.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The explicit total, if any.
    #[must_use]
    pub const fn total(&self) -> Option<f64> {
        self.total
    }

    /// Whether the row disappears on completion.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.transient
    }

    /// Whether tracking is switched off.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disable
    }

    /// The unit label.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Whether logarithmic mode was requested.
    #[must_use]
    pub const fn is_logarithmic(&self) -> bool {
        self.logarithmic
    }

    /// Picks the task total given an iterator's `size_hint`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn resolve_total(&self, size_hint: (usize, Option<usize>)) -> Option<f64> {
        if self.total.is_some() {
            return self.total;
        }
        if self.logarithmic {
            return None;
        }
        match size_hint {
            (lower, Some(upper)) if lower == upper => Some(upper as f64),
            _ => None,
        }
    }
}
