use std::collections::VecDeque;
use std::fmt;

use super::task::Task;

/// Pending tasks not yet assigned to a worker.
///
/// First-come first-served, except that a retried task goes back to the
/// front so it is dispatched before anything that has never run.
///
/// # Ownership
/// - Only the pool manager touches the queue, so no locking is needed
/// - A task is either here or in the manager's active map, never both
#[derive(Default)]
pub(crate) struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.tasks.len())
            .finish()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a newly submitted task.
    pub fn push_back(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    /// Enqueue a task that is being retried.
    pub fn push_front(&mut self, task: Task) {
        self.tasks.push_front(task);
    }

    pub fn pop_front(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Remove every pending task, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Task> + '_ {
        self.tasks.drain(..)
    }
}
