use super::monitor::ResourceMonitor;
use super::PipelineOutcome;
use crate::config::Settings;
use crate::error::PipelineError;
use crate::failure::Failure;
use crate::grouping::{FailureGrouper, FailureGroups};
use crate::progress::{ProgressReporter, TaskId};
use crate::suggest::{FixSuggestion, SuggestionService};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

/// One representative and the group it answers for
#[derive(Debug, Clone)]
pub struct RepresentativeBatch {
    pub group_key: String,
    pub representative: Failure,
    /// Position of the representative inside `members`
    pub representative_index: usize,
    pub members: Vec<Failure>,
}

impl RepresentativeBatch {
    pub fn representative_id(&self) -> &str {
        self.representative.id()
    }
}

/// Everything a single run owns. Created per run and consumed when it ends.
pub struct PipelineContext {
    pub failures: Vec<Failure>,
    pub groups: FailureGroups,
    pub batches: Vec<RepresentativeBatch>,
    pub suggestions: Vec<FixSuggestion>,
    pub settings: Settings,
    pub quiet: bool,
    pub service: Arc<dyn SuggestionService>,
    pub grouper: FailureGrouper,
    pub monitor: ResourceMonitor,
    pub progress: Arc<dyn ProgressReporter>,
    pub parent_task: Option<TaskId>,
    /// Root task for this run, if one was registered
    pub run_task: Option<TaskId>,
    /// Tasks still registered with the reporter
    pub open_tasks: Vec<TaskId>,
    pub final_error: Option<PipelineError>,
    pub execution_complete: bool,
    started: Instant,
    completion: Option<oneshot::Sender<PipelineOutcome>>,
}

impl PipelineContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        failures: Vec<Failure>,
        settings: Settings,
        quiet: bool,
        service: Arc<dyn SuggestionService>,
        grouper: FailureGrouper,
        monitor: ResourceMonitor,
        progress: Arc<dyn ProgressReporter>,
        parent_task: Option<TaskId>,
        completion: oneshot::Sender<PipelineOutcome>,
    ) -> Self {
        Self {
            failures,
            groups: FailureGroups::default(),
            batches: Vec::new(),
            suggestions: Vec::new(),
            settings,
            quiet,
            service,
            grouper,
            monitor,
            progress,
            parent_task,
            run_task: None,
            open_tasks: Vec::new(),
            final_error: None,
            execution_complete: false,
            started: Instant::now(),
            completion: Some(completion),
        }
    }

    pub fn add_task(&mut self, description: &str, total: usize, parent: Option<TaskId>) -> TaskId {
        let id = self.progress.add_task(description, total, parent);
        self.open_tasks.push(id);
        id
    }

    pub fn update_task(&self, task: Option<TaskId>, description: &str, completed: usize) {
        if let Some(task) = task {
            self.progress.update(task, description, completed);
        }
    }

    /// Remove every task this run registered, newest first
    pub fn cleanup_tasks(&mut self) {
        while let Some(task) = self.open_tasks.pop() {
            self.progress.remove_task(task);
        }
    }

    /// Keep the first error of the run
    pub fn record_error(&mut self, error: PipelineError) {
        if self.final_error.is_none() {
            self.final_error = Some(error);
        }
    }

    pub fn representative_count(&self) -> usize {
        self.batches.len()
    }

    /// Send the outcome on the completion channel. Only the first call sends.
    pub fn finish(&mut self) {
        let Some(completion) = self.completion.take() else {
            return;
        };
        let model_calls_avoided = if self.batches.is_empty() {
            0
        } else {
            self.failures.len().saturating_sub(self.batches.len())
        };
        let outcome = PipelineOutcome {
            all_suggestions: std::mem::take(&mut self.suggestions),
            execution_complete: self.execution_complete,
            final_error: self.final_error.take(),
            group_count: self.groups.len(),
            model_calls_avoided,
            elapsed: self.started.elapsed(),
        };
        // Receiver gone means nobody is waiting
        let _ = completion.send(outcome);
    }
}
