//! The thread-safe store of progress tasks.
//!
//! [`TaskRegistry`] maps task identities to tasks and is the only way to mutate
//! them. Renderers read it through [`TaskRegistry::snapshot_all`], workers write to
//! it through [`TaskHandle`]s.
//!
//! # Synchronization Strategy
//!
//! Two levels of locking, never nested:
//!
//! * **Registry lock:** a [`RwLock`](parking_lot::RwLock) guarding only the
//!   identity→task map. It is held just long enough to insert, remove, or clone
//!   out an `Arc` to a task.
//! * **Task lock:** each task sits behind its own [`Mutex`](parking_lot::Mutex).
//!   Updates and snapshots of one task never wait on another task.
//!
//! The registry lock is always released before a task lock is taken. Task locks
//! are not reentrant. Update timestamps are read while the task lock is held, so
//! a task's samples are recorded in clock order even under contention.
//!
//! # Ordering
//!
//! Identities are allocated under the registry lock in increasing order and the
//! map is ordered by identity, so snapshots list tasks in creation order. A row
//! never moves because an unrelated task finished.

use std::{collections::BTreeMap, fmt, sync::Arc};

use compact_str::CompactString;
use parking_lot::{Mutex, RwLock};

use web_time::Instant;

use crate::{
    clock::{Clock, SystemClock},
    error::{ProgressError, Result},
    options::TrackOptions,
    task::{ProgressTask, Status, TaskId, TaskSnapshot},
};

type TaskCell = Arc<Mutex<ProgressTask>>;

struct Tasks {
    next_id: u64,
    map: BTreeMap<TaskId, TaskCell>,
}

struct Shared {
    tasks: RwLock<Tasks>,
    clock: Box<dyn Clock>,
}

/// A thread-safe, cheaply cloneable registry of progress tasks.
///
/// Clones share the same tasks. A registry is an ordinary value: create one per
/// display region, or use [`global`](crate::global) for the default instance.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Shared>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only the count, to avoid taking any task lock while formatting.
        f.debug_struct("TaskRegistry")
            .field("count", &self.len())
            .finish()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    /// Creates an empty registry using the system monotonic clock.
    ///
    /// # Examples
    ///
    /// ```
    /// use richbar::TaskRegistry;
    ///
    /// let registry = TaskRegistry::new();
    /// assert!(registry.is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Creates an empty registry stamping updates with `clock`.
    #[must_use]
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            inner: Arc::new(Shared {
                tasks: RwLock::new(Tasks {
                    next_id: 0,
                    map: BTreeMap::new(),
                }),
                clock: Box::new(clock),
            }),
        }
    }

    // ========================================================================
    // Creation & Lookup
    // ========================================================================

    /// Registers a new running task and returns a handle to it.
    ///
    /// # Errors
    ///
    /// [`ProgressError::InvalidTotal`] if `total` is negative, NaN or infinite.
    pub fn create(
        &self,
        description: impl Into<CompactString>,
        total: Option<f64>,
        transient: bool,
    ) -> Result<TaskHandle> {
        let now = self.inner.clock.now();
        let description = description.into();

        let mut tasks = self.inner.tasks.write();
        let id = TaskId::from_raw(tasks.next_id);
        let task = ProgressTask::new(id, description, total, transient, now)?;
        let cell = Arc::new(Mutex::new(task));
        tasks.next_id += 1;
        tasks.map.insert(id, Arc::clone(&cell));
        drop(tasks);

        log::debug!("created progress task {id} (total: {total:?}, transient: {transient})");
        Ok(self.handle(id, cell))
    }

    /// Registers a new task configured from `options`.
    ///
    /// The total is `options.total()`; use [`track`](crate::ProgressIteratorExt::track_in)
    /// to have it probed from an iterator instead.
    ///
    /// # Errors
    ///
    /// [`ProgressError::InvalidTotal`] if the configured total is invalid.
    pub fn create_with(&self, options: &TrackOptions) -> Result<TaskHandle> {
        self.create_configured(options, options.total())
    }

    pub(crate) fn create_configured(
        &self,
        options: &TrackOptions,
        total: Option<f64>,
    ) -> Result<TaskHandle> {
        let handle = self.create(options.description(), total, options.is_transient())?;
        handle.cell.lock().set_unit(options.unit());
        Ok(handle)
    }

    fn handle(&self, id: TaskId, cell: TaskCell) -> TaskHandle {
        TaskHandle {
            id,
            cell,
            registry: self.clone(),
        }
    }

    /// Returns a handle to an existing task.
    ///
    /// # Errors
    ///
    /// [`ProgressError::UnknownTask`] if `id` is not registered.
    pub fn get(&self, id: TaskId) -> Result<TaskHandle> {
        let cell = self.cell(id)?;
        Ok(self.handle(id, cell))
    }

    /// Clones the task reference out under the registry lock, then releases it.
    fn cell(&self, id: TaskId) -> Result<TaskCell> {
        self.inner
            .tasks
            .read()
            .map
            .get(&id)
            .cloned()
            .ok_or(ProgressError::UnknownTask(id))
    }

    /// Runs `f` under the task's own lock, with the registry lock already released.
    fn with_task<T>(&self, id: TaskId, f: impl FnOnce(&mut ProgressTask, Instant) -> T) -> Result<T> {
        let cell = self.cell(id)?;
        Ok(self.apply(&cell, f))
    }

    /// Locks `cell`, then reads the clock: updates to one task are stamped in the
    /// order they are applied.
    fn apply<T>(&self, cell: &TaskCell, f: impl FnOnce(&mut ProgressTask, Instant) -> T) -> T {
        let mut task = cell.lock();
        let now = self.inner.clock.now();
        f(&mut task, now)
    }

    fn close_cell(&self, cell: &TaskCell, success: bool, error: Option<&str>) -> Status {
        let (id, before, after) = self.apply(cell, |task, now| {
            let before = task.status();
            (task.id(), before, task.close(success, error, now))
        });
        if !before.is_terminal() {
            log::debug!("closed progress task {id} as {after:?}");
        }
        after
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Adds `delta` to a task's count and returns the new count.
    ///
    /// # Errors
    ///
    /// * [`ProgressError::UnknownTask`] if `id` is not registered.
    /// * [`ProgressError::NegativeDelta`] if `delta < 0`; the task is unchanged.
    /// * [`ProgressError::TaskFinished`] if the task is terminal.
    pub fn advance(&self, id: TaskId, delta: i64) -> Result<u64> {
        self.with_task(id, |task, now| task.advance(delta, now))?
    }

    /// Replaces a task's total; `None` makes it indeterminate.
    ///
    /// # Errors
    ///
    /// [`ProgressError::UnknownTask`], [`ProgressError::InvalidTotal`] or
    /// [`ProgressError::TaskFinished`].
    pub fn set_total(&self, id: TaskId, total: Option<f64>) -> Result<()> {
        self.with_task(id, |task, now| task.set_total(total, now))?
    }

    /// Replaces a task's label.
    ///
    /// # Errors
    ///
    /// [`ProgressError::UnknownTask`] or [`ProgressError::TaskFinished`].
    pub fn set_description(&self, id: TaskId, description: impl Into<CompactString>) -> Result<()> {
        let description = description.into();
        self.with_task(id, |task, now| task.set_description(description, now))?
    }

    /// Closes a task and returns its terminal status.
    ///
    /// Closing an already-closed task is a no-op returning the first status.
    ///
    /// # Errors
    ///
    /// [`ProgressError::UnknownTask`] if `id` is not registered.
    pub fn close(&self, id: TaskId, success: bool, error: Option<&str>) -> Result<Status> {
        let cell = self.cell(id)?;
        Ok(self.close_cell(&cell, success, error))
    }

    /// Detaches a finished task from the registry.
    ///
    /// # Errors
    ///
    /// * [`ProgressError::UnknownTask`] if `id` is not registered.
    /// * [`ProgressError::NotRemovable`] unless the task is terminal and a
    ///   [`snapshot_all`](Self::snapshot_all) has observed it since.
    pub fn remove(&self, id: TaskId) -> Result<()> {
        let removable =
            self.with_task(id, |task, _| task.status().is_terminal() && task.is_flushed())?;
        if !removable {
            return Err(ProgressError::NotRemovable(id));
        }

        // A terminal task never becomes running again, so the check above still holds.
        self.inner.tasks.write().map.remove(&id);
        log::debug!("removed progress task {id}");
        Ok(())
    }

    /// Removes every task that is terminal and flushed. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let cells: Vec<(TaskId, TaskCell)> = self
            .inner
            .tasks
            .read()
            .map
            .iter()
            .map(|(id, cell)| (*id, Arc::clone(cell)))
            .collect();

        let done: Vec<TaskId> = cells
            .into_iter()
            .filter(|(_, cell)| {
                let task = cell.lock();
                task.status().is_terminal() && task.is_flushed()
            })
            .map(|(id, _)| id)
            .collect();

        if done.is_empty() {
            return 0;
        }

        let mut tasks = self.inner.tasks.write();
        for id in &done {
            tasks.map.remove(id);
        }
        drop(tasks);

        log::trace!("pruned {} finished progress task(s)", done.len());
        done.len()
    }

    /// Teardown: closes every running task with the error `cleared`, then drops
    /// all tasks regardless of flushing.
    ///
    /// Outstanding handles keep answering from their task's final state; further
    /// updates through them fail with [`ProgressError::TaskFinished`].
    pub fn clear(&self) {
        let cells: Vec<TaskCell> = std::mem::take(&mut self.inner.tasks.write().map)
            .into_values()
            .collect();
        for cell in &cells {
            self.close_cell(cell, false, Some("cleared"));
        }
        log::debug!("cleared {} progress task(s)", cells.len());
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Snapshot of one task, without marking it flushed.
    ///
    /// # Errors
    ///
    /// [`ProgressError::UnknownTask`] if `id` is not registered.
    pub fn snapshot(&self, id: TaskId) -> Result<TaskSnapshot> {
        self.with_task(id, |task, now| task.snapshot(now))
    }

    /// Returns a snapshot of every task, in creation order.
    ///
    /// This is the render path: terminal tasks seen here are marked flushed and
    /// become eligible for [`remove`](Self::remove) and [`prune`](Self::prune).
    ///
    /// # Performance
    ///
    /// The registry lock is held only while cloning task references; each task is
    /// then locked briefly, one at a time, to copy its fields.
    #[must_use]
    pub fn snapshot_all(&self) -> RegistrySnapshot {
        // 1. Quick lock just to clone the Arcs
        let cells: Vec<TaskCell> = self.inner.tasks.read().map.values().cloned().collect();

        // 2. Copy each task out under its own lock
        let now = self.inner.clock.now();
        let snapshots: Vec<TaskSnapshot> = cells.iter().map(|cell| cell.lock().observe(now)).collect();

        log::trace!("snapshotted {} progress task(s)", snapshots.len());
        RegistrySnapshot(snapshots)
    }

    /// Checks whether every registered task is terminal.
    ///
    /// Returns `true` for an empty registry.
    #[must_use]
    pub fn is_all_finished(&self) -> bool {
        let cells: Vec<TaskCell> = self.inner.tasks.read().map.values().cloned().collect();
        cells.iter().all(|cell| cell.lock().status().is_terminal())
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.tasks.read().map.len()
    }

    /// Returns `true` if no task is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.tasks.read().map.is_empty()
    }
}

/// An ordered, immutable view of every task in a registry at one instant.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegistrySnapshot(pub Vec<TaskSnapshot>);

impl RegistrySnapshot {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the rows in creation order.
    pub fn iter(&self) -> std::slice::Iter<'_, TaskSnapshot> {
        self.0.iter()
    }

    /// Rows a renderer should draw: everything except finished transient tasks.
    pub fn visible(&self) -> impl Iterator<Item = &TaskSnapshot> {
        self.0.iter().filter(|snap| snap.is_visible())
    }
}

impl<'a> IntoIterator for &'a RegistrySnapshot {
    type Item = &'a TaskSnapshot;
    type IntoIter = std::slice::Iter<'a, TaskSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A cloneable handle to one task in a [`TaskRegistry`].
///
/// The handle shares the task itself, not just its identity. Once the registry
/// prunes or removes the task, [`close`](Self::close) and
/// [`snapshot`](Self::snapshot) still answer from its final state.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    cell: TaskCell,
    registry: TaskRegistry,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl TaskHandle {
    /// Identity of the task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// The registry this task lives in.
    #[must_use]
    pub const fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// See [`TaskRegistry::advance`].
    ///
    /// # Errors
    ///
    /// [`ProgressError::NegativeDelta`] or [`ProgressError::TaskFinished`].
    pub fn advance(&self, delta: i64) -> Result<u64> {
        self.registry.apply(&self.cell, |task, now| task.advance(delta, now))
    }

    /// Advances by one.
    ///
    /// # Errors
    ///
    /// [`ProgressError::TaskFinished`].
    pub fn inc(&self) -> Result<u64> {
        self.advance(1)
    }

    /// See [`TaskRegistry::set_total`].
    ///
    /// # Errors
    ///
    /// [`ProgressError::InvalidTotal`] or [`ProgressError::TaskFinished`].
    pub fn set_total(&self, total: impl Into<Option<f64>>) -> Result<()> {
        let total = total.into();
        self.registry.apply(&self.cell, |task, now| task.set_total(total, now))
    }

    /// See [`TaskRegistry::set_description`].
    ///
    /// # Errors
    ///
    /// [`ProgressError::TaskFinished`].
    pub fn set_description(&self, description: impl Into<CompactString>) -> Result<()> {
        let description = description.into();
        self.registry
            .apply(&self.cell, |task, now| task.set_description(description, now))
    }

    /// Closes the task and returns its terminal status. Closing again returns
    /// the first status, even after the task left the registry.
    pub fn close(&self, success: bool, error: Option<&str>) -> Status {
        self.registry.close_cell(&self.cell, success, error)
    }

    /// Closes successfully.
    pub fn finish(&self) -> Status {
        self.close(true, None)
    }

    /// Closes with an error message.
    pub fn fail(&self, error: impl fmt::Display) -> Status {
        self.close(false, Some(&error.to_string()))
    }

    /// Current state of the task, without marking it flushed.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        self.registry.apply(&self.cell, |task, now| task.snapshot(now))
    }

    /// See [`TaskRegistry::remove`].
    ///
    /// # Errors
    ///
    /// As for [`TaskRegistry::remove`].
    pub fn remove(&self) -> Result<()> {
        self.registry.remove(self.id)
    }
}
