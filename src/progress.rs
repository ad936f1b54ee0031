//! Progress reporting for pipeline runs
//!
//! Purely observational: nothing in the pipeline depends on what a reporter does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub trait ProgressReporter: Send + Sync {
    fn add_task(&self, description: &str, total: usize, parent: Option<TaskId>) -> TaskId;

    fn update(&self, task: TaskId, description: &str, completed: usize);

    fn remove_task(&self, task: TaskId);
}

/// Hands out ids and otherwise does nothing
#[derive(Debug, Default)]
pub struct NoopProgress {
    next_id: AtomicU64,
}

impl ProgressReporter for NoopProgress {
    fn add_task(&self, _description: &str, _total: usize, _parent: Option<TaskId>) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn update(&self, _task: TaskId, _description: &str, _completed: usize) {}

    fn remove_task(&self, _task: TaskId) {}
}

#[derive(Debug, Clone)]
struct TaskLine {
    total: usize,
    depth: usize,
}

/// One line on stderr per event, indented under the parent task
#[derive(Debug, Default)]
pub struct StderrProgress {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TaskId, TaskLine>>,
}

impl StderrProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks added and not yet removed
    pub fn open_tasks(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl ProgressReporter for StderrProgress {
    fn add_task(&self, description: &str, total: usize, parent: Option<TaskId>) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let depth = parent
            .and_then(|p| tasks.get(&p))
            .map(|line| line.depth + 1)
            .unwrap_or(1);
        tasks.insert(id, TaskLine { total, depth });
        eprintln!("{}+ {} (0/{})", "  ".repeat(depth), description, total);
        id
    }

    fn update(&self, task: TaskId, description: &str, completed: usize) {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(line) = tasks.get(&task) {
            eprintln!(
                "{}- {} ({}/{})",
                "  ".repeat(line.depth),
                description,
                completed.min(line.total),
                line.total
            );
        }
    }

    fn remove_task(&self, task: TaskId) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_ids_are_distinct() {
        let progress = NoopProgress::default();
        let a = progress.add_task("a", 1, None);
        let b = progress.add_task("b", 1, Some(a));
        assert_ne!(a, b);
    }

    #[test]
    fn test_stderr_progress_tracks_open_tasks() {
        let progress = StderrProgress::new();
        let parent = progress.add_task("suggest", 3, None);
        let child = progress.add_task("groups", 2, Some(parent));
        assert_eq!(progress.open_tasks(), 2);

        progress.update(child, "grouped 3 into 2 groups", 2);
        progress.remove_task(child);
        progress.remove_task(parent);
        // Removing twice is harmless
        progress.remove_task(parent);
        assert_eq!(progress.open_tasks(), 0);
    }
}
