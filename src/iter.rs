//! Iterator adapters for automatic progress tracking.
//!
//! [`ProgressIteratorExt`] attaches a task to any [`Iterator`]. The resulting
//! [`Tracked`] iterator advances the task once per element and closes it when the
//! source is exhausted.
//!
//! # Counting
//!
//! An element is counted at the moment `next()` hands it to the caller. If the loop
//! body then fails while processing that element, the count already includes it
//! exactly once.
//!
//! # Guaranteed Close
//!
//! A [`Tracked`] iterator cannot tell when its caller stops consuming early. Use
//! [`TaskRegistry::scope`] or [`TaskRegistry::try_for_each`], or hold a
//! [`TrackScope`], to close the task on every exit path:
//!
//! * normal completion or early `break`: [`Status::Success`]
//! * the body returns `Err(e)`: [`Status::Error`] with `e`'s message, and `e` is
//!   returned to the caller untouched
//! * a panic: [`Status::Error`], and the panic keeps unwinding
//!
//! # Example
//!
//! ```
//! use richbar::{ProgressIteratorExt, TaskRegistry};
//!
//! let registry = TaskRegistry::new();
//!
//! // Determinate because the vector's length is known.
//! let mut sum = 0;
//! for item in vec![1, 2, 3].into_iter().track_in(&registry).unwrap() {
//!     sum += item;
//! }
//! assert_eq!(sum, 6);
//! assert!(registry.is_all_finished());
//! ```

use std::fmt;

use compact_str::CompactString;

use crate::{
    error::{ProgressError, Result},
    options::TrackOptions,
    registry::{TaskHandle, TaskRegistry},
    task::Status,
};

/// An iterator adapter that advances a task for every element it yields.
///
/// A disabled adapter (see [`TrackOptions::disable`]) carries no task and only
/// passes elements through.
#[derive(Debug)]
pub struct Tracked<I> {
    iter: I,
    task: Option<TaskHandle>,
    stalled: bool,
}

impl<I> Tracked<I> {
    /// Creates a new `Tracked`.
    ///
    /// Note: This is usually constructed via [`ProgressIteratorExt`] methods.
    pub const fn new(iter: I, task: Option<TaskHandle>) -> Self {
        Self {
            iter,
            task,
            stalled: false,
        }
    }

    /// The task being advanced, unless tracking is disabled.
    #[must_use]
    pub const fn handle(&self) -> Option<&TaskHandle> {
        self.task.as_ref()
    }

    /// Marks the task as failed, for sources that report errors as items.
    ///
    /// Returns the task's terminal status, or `None` if tracking is disabled.
    pub fn fail(&self, error: impl fmt::Display) -> Option<Status> {
        self.task.as_ref().map(|task| task.fail(error))
    }

    /// Gives back the wrapped iterator. The task is left as it is.
    pub fn into_inner(self) -> I {
        self.iter
    }
}

impl<I: Iterator> Iterator for Tracked<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.iter.next();

        if let Some(task) = &self.task {
            if item.is_none() {
                // Iterator exhausted
                task.finish();
            } else if !self.stalled {
                if let Err(err) = task.advance(1) {
                    // Closed elsewhere; later elements pass through uncounted.
                    log::warn!("stopped counting progress task {}: {err}", task.id());
                    self.stalled = true;
                }
            }
        }

        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

/// Extension trait to easily attach progress tracking to any Iterator.
pub trait ProgressIteratorExt: Iterator + Sized {
    /// Tracks the iterator in `registry` with default options.
    ///
    /// Becomes determinate if the iterator reports an exact length.
    ///
    /// # Errors
    ///
    /// Never fails with default options; kept fallible for symmetry with
    /// [`track_with`](Self::track_with).
    fn track_in(self, registry: &TaskRegistry) -> Result<Tracked<Self>> {
        self.track_with(registry, &TrackOptions::default())
    }

    /// Tracks the iterator in `registry` with a label.
    ///
    /// # Errors
    ///
    /// As for [`track_in`](Self::track_in).
    fn track_named(
        self,
        registry: &TaskRegistry,
        description: impl Into<CompactString>,
    ) -> Result<Tracked<Self>> {
        self.track_with(registry, &TrackOptions::new(description))
    }

    /// Tracks the iterator in `registry` as configured by `options`.
    ///
    /// # Errors
    ///
    /// [`ProgressError::InvalidTotal`] if `options` carries an invalid total.
    fn track_with(self, registry: &TaskRegistry, options: &TrackOptions) -> Result<Tracked<Self>> {
        if options.is_disabled() {
            return Ok(Tracked::new(self, None));
        }
        let total = options.resolve_total(self.size_hint());
        let task = registry.create_configured(options, total)?;
        Ok(Tracked::new(self, Some(task)))
    }

    /// Advances an existing task instead of creating one.
    fn track_handle(self, task: TaskHandle) -> Tracked<Self> {
        Tracked::new(self, Some(task))
    }
}

impl<I: Iterator> ProgressIteratorExt for I {}

/// Closes a task when dropped, unless it was closed explicitly first.
///
/// Dropping during a panic closes the task with [`Status::Error`]; any other drop
/// closes it with [`Status::Success`].
#[derive(Debug)]
#[must_use = "the task is closed as soon as the scope is dropped"]
pub struct TrackScope {
    task: Option<TaskHandle>,
}

impl TrackScope {
    /// Guards `task`. `None` produces an inert guard.
    pub const fn new(task: Option<TaskHandle>) -> Self {
        Self { task }
    }

    /// The guarded task.
    #[must_use]
    pub const fn handle(&self) -> Option<&TaskHandle> {
        self.task.as_ref()
    }

    /// Closes the task successfully now.
    pub fn complete(mut self) -> Option<Status> {
        self.task.take().map(|task| task.finish())
    }

    /// Closes the task with `error` now.
    pub fn fail(mut self, error: impl fmt::Display) -> Option<Status> {
        self.task.take().map(|task| task.fail(error))
    }
}

impl Drop for TrackScope {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if std::thread::panicking() {
            task.fail("panicked");
        } else {
            task.finish();
        }
    }
}

impl TaskRegistry {
    /// Tracks `iterable` for the duration of `body` and closes the task however
    /// `body` exits.
    ///
    /// The error returned by `body` is passed back as is. Errors creating the task
    /// are converted into `E`.
    ///
    /// # Errors
    ///
    /// Whatever `body` returns, or [`ProgressError::InvalidTotal`] converted to `E`.
    pub fn scope<I, R, E, F>(&self, iterable: I, options: &TrackOptions, body: F) -> Result<R, E>
    where
        I: IntoIterator,
        E: From<ProgressError> + fmt::Display,
        F: FnOnce(&mut Tracked<I::IntoIter>) -> Result<R, E>,
    {
        let mut tracked = iterable.into_iter().track_with(self, options)?;
        let guard = TrackScope::new(tracked.handle().cloned());

        match body(&mut tracked) {
            Ok(value) => {
                guard.complete();
                Ok(value)
            }
            Err(err) => {
                guard.fail(&err);
                Err(err)
            }
        }
    }

    /// Runs `f` on every element of `iterable` with progress tracking, stopping at
    /// the first error.
    ///
    /// # Errors
    ///
    /// The first error returned by `f`, unchanged.
    pub fn try_for_each<I, E, F>(&self, iterable: I, options: &TrackOptions, mut f: F) -> Result<(), E>
    where
        I: IntoIterator,
        E: From<ProgressError> + fmt::Display,
        F: FnMut(I::Item) -> Result<(), E>,
    {
        self.scope(iterable, options, |tracked| tracked.try_for_each(&mut f))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fmt,
        panic::{self, AssertUnwindSafe},
    };

    use super::{ProgressIteratorExt as _, TrackScope};
    use crate::{
        error::ProgressError,
        options::TrackOptions,
        registry::TaskRegistry,
        task::{Mode, Status},
    };

    #[derive(Debug, PartialEq)]
    enum JobError {
        Bad(u32),
        Progress(ProgressError),
    }

    impl fmt::Display for JobError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Bad(n) => write!(f, "bad element {n}"),
                Self::Progress(err) => err.fmt(f),
            }
        }
    }

    impl From<ProgressError> for JobError {
        fn from(err: ProgressError) -> Self {
            Self::Progress(err)
        }
    }

    /// Iterator Integration
    /// A wrapped slice iterator counts every element, takes its length as the
    /// total and finishes on exhaustion.
    #[test]
    fn test_iterator_adapter() {
        let registry = TaskRegistry::new();
        let data = [1, 2, 3, 4, 5];
        let mut count = 0;

        let iter = data.iter().track_named(&registry, "iter_test").unwrap();
        let handle = iter.handle().cloned().unwrap();

        for _ in iter {
            count += 1;
        }

        let snap = handle.snapshot();
        assert_eq!(count, 5);
        assert_eq!(snap.current(), 5);
        assert_eq!(snap.status(), Status::Success, "Exhaustion should finish the task");
        assert_eq!(snap.total(), Some(5.0), "Total should be inferred from the length");
        assert_eq!(snap.description(), "iter_test");
    }

    #[test]
    fn test_unknown_length_is_indeterminate() {
        let registry = TaskRegistry::new();
        let iter = (0..).take_while(|n| *n < 4).track_in(&registry).unwrap();
        let handle = iter.handle().cloned().unwrap();
        assert_eq!(handle.snapshot().mode(), Mode::Indeterminate);

        assert_eq!(iter.count(), 4);
        assert_eq!(handle.snapshot().current(), 4);
    }

    #[test]
    fn test_empty_iterator_closes() {
        let registry = TaskRegistry::new();
        let items: Vec<u8> = Vec::<u8>::new().into_iter().track_in(&registry).unwrap().collect();
        assert!(items.is_empty());
        assert!(registry.is_all_finished());
    }

    #[test]
    fn test_disabled_registers_nothing() {
        let registry = TaskRegistry::new();
        let opts = TrackOptions::default().disable(true);
        let iter = (0..10).track_with(&registry, &opts).unwrap();
        assert!(iter.handle().is_none());
        assert_eq!(iter.sum::<i32>(), 45);
        assert!(registry.is_empty());
    }

    /// Error Propagation
    /// A failure on the third of five elements marks the task failed, counts three
    /// elements, and hands back the very same error.
    #[test]
    fn test_error_is_recorded_and_returned() {
        let registry = TaskRegistry::new();
        let opts = TrackOptions::new("five");

        let res = registry.try_for_each(vec![1u32, 2, 3, 4, 5], &opts, |n| {
            if n == 3 { Err(JobError::Bad(n)) } else { Ok(()) }
        });
        assert_eq!(res, Err(JobError::Bad(3)));

        let frame = registry.snapshot_all();
        let snap = &frame.0[0];
        assert_eq!(snap.status(), Status::Error);
        assert_eq!(snap.current(), 3);
        assert_eq!(snap.error(), Some("bad element 3"));
    }

    /// Early Break
    /// Leaving the loop early still closes the task through the scope.
    #[test]
    fn test_scope_closes_on_early_break() {
        let registry = TaskRegistry::new();

        let seen = registry
            .scope(0..100, &TrackOptions::default(), |tracked| {
                let mut seen = 0;
                for n in tracked.by_ref() {
                    seen += 1;
                    if n == 10 {
                        break;
                    }
                }
                Ok::<_, ProgressError>(seen)
            })
            .unwrap();

        assert_eq!(seen, 11);
        let snap = &registry.snapshot_all().0[0];
        assert_eq!(snap.status(), Status::Success);
        assert_eq!(snap.current(), 11);
    }

    #[test]
    fn test_abandoned_iterator_stays_running() {
        let registry = TaskRegistry::new();
        let mut iter = (0..10).track_in(&registry).unwrap();
        iter.next();
        drop(iter);
        assert!(!registry.is_all_finished());
    }

    #[test]
    fn test_scope_guard_closes_on_panic() {
        let registry = TaskRegistry::new();
        let handle = registry.create("panicky", None, false).unwrap();
        let guarded = handle.clone();

        let res = panic::catch_unwind(AssertUnwindSafe(move || {
            let _scope = TrackScope::new(Some(guarded));
            panic!("worker died");
        }));
        assert!(res.is_err());

        let snap = handle.snapshot();
        assert_eq!(snap.status(), Status::Error);
        assert_eq!(snap.error(), Some("panicked"));
    }

    #[test]
    fn test_scope_guard_drop_succeeds() {
        let registry = TaskRegistry::new();
        let handle = registry.create("scoped", None, false).unwrap();
        {
            let _scope = TrackScope::new(Some(handle.clone()));
            handle.advance(2).unwrap();
        }
        assert_eq!(handle.snapshot().status(), Status::Success);
    }

    #[test]
    fn test_invalid_total_converts_into_caller_error() {
        let registry = TaskRegistry::new();
        let opts = TrackOptions::default().with_total(-5.0);
        let res = registry.try_for_each(0..3, &opts, |_| Ok::<_, JobError>(()));
        assert!(matches!(
            res,
            Err(JobError::Progress(ProgressError::InvalidTotal(_)))
        ));
        assert!(registry.is_empty());
    }

    /// Teardown Mid-Loop
    /// Clearing the registry fails the running task; the loop still sees every
    /// element and the count stops where the task was closed.
    #[test]
    #[allow(clippy::while_let_on_iterator)]
    fn test_cleared_task_stops_counting() {
        let registry = TaskRegistry::new();
        let mut tracked = (0..6).track_in(&registry).unwrap();
        let handle = tracked.handle().cloned().unwrap();

        let mut seen = Vec::new();
        while let Some(n) = tracked.next() {
            seen.push(n);
            if n == 1 {
                registry.clear();
            }
        }

        assert_eq!(seen, [0, 1, 2, 3, 4, 5]);
        let snap = handle.snapshot();
        assert_eq!(snap.status(), Status::Error);
        assert_eq!(snap.error(), Some("cleared"));
        assert_eq!(snap.current(), 2);
        assert!(registry.is_empty());
    }

    /// Fallible Sources
    /// Errors yielded as items can fail the task while the loop keeps control.
    #[test]
    #[allow(clippy::while_let_on_iterator)]
    fn test_fail_from_item_error() {
        let registry = TaskRegistry::new();
        let source = vec![Ok(1), Ok(2), Err("decode failed"), Ok(4)];
        let mut tracked = source.into_iter().track_in(&registry).unwrap();

        let mut ok = 0;
        while let Some(item) = tracked.next() {
            match item {
                Ok(_) => ok += 1,
                Err(message) => {
                    tracked.fail(message);
                    break;
                }
            }
        }

        assert_eq!(ok, 2);
        let snap = tracked.handle().unwrap().snapshot();
        assert_eq!(snap.status(), Status::Error);
        assert_eq!(snap.current(), 3);
        assert_eq!(snap.error(), Some("decode failed"));
    }
}
