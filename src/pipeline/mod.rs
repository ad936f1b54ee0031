//! Batch suggestion pipeline
//!
//! Groups failures, sends one representative per group to the model service in
//! a single monitored batch call, and fans each answer back out to every
//! member of its group. A run never fails: errors are recorded in
//! `PipelineOutcome::final_error` and whatever was produced before them is
//! still returned.

pub mod context;
pub mod monitor;
pub mod state;


use crate::config::Settings;
use crate::error::PipelineError;
use crate::failure::Failure;
use crate::grouping::FailureGrouper;
use crate::progress::{NoopProgress, ProgressReporter, TaskId};
use crate::suggest::{FixSuggestion, SuggestionService};
use anyhow::Context;
use context::PipelineContext;
use monitor::ResourceMonitor;
use state::PipelineState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Result of one run
#[derive(Debug)]
pub struct PipelineOutcome {
    pub all_suggestions: Vec<FixSuggestion>,
    pub execution_complete: bool,
    /// First error hit during the run
    pub final_error: Option<PipelineError>,
    pub group_count: usize,
    /// Failures answered through their group representative
    pub model_calls_avoided: usize,
    /// Wall-clock time of the run
    pub elapsed: Duration,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.execution_complete && self.final_error.is_none()
    }
}

#[derive(Clone)]
pub struct BatchSuggestionPipeline {
    service: Arc<dyn SuggestionService>,
    grouper: FailureGrouper,
    settings: Settings,
}

impl BatchSuggestionPipeline {
    pub fn new(service: Arc<dyn SuggestionService>, settings: Settings) -> Self {
        let grouper = FailureGrouper::default().with_policy(settings.representative_policy);
        Self {
            service,
            grouper,
            settings,
        }
    }

    pub fn with_grouper(mut self, grouper: FailureGrouper) -> Self {
        self.grouper = grouper;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run to completion. `quiet` disables progress reporting for this run.
    pub async fn run(
        &self,
        failures: Vec<Failure>,
        quiet: bool,
        progress: Arc<dyn ProgressReporter>,
        parent_task: Option<TaskId>,
    ) -> PipelineOutcome {
        self.run_with_cancel(failures, quiet, progress, parent_task, CancellationToken::new())
            .await
    }

    /// Run on a background task; the handle can wait for or cancel it
    pub fn spawn(
        &self,
        failures: Vec<Failure>,
        quiet: bool,
        progress: Arc<dyn ProgressReporter>,
        parent_task: Option<TaskId>,
    ) -> PipelineHandle {
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let ctx = self.context(failures, quiet, progress, parent_task, cancel.clone(), tx);
        let task = tokio::spawn(drive(ctx));
        PipelineHandle {
            cancel,
            outcome: rx,
            task,
        }
    }

    async fn run_with_cancel(
        &self,
        failures: Vec<Failure>,
        quiet: bool,
        progress: Arc<dyn ProgressReporter>,
        parent_task: Option<TaskId>,
        cancel: CancellationToken,
    ) -> PipelineOutcome {
        let (tx, rx) = oneshot::channel();
        let ctx = self.context(failures, quiet, progress, parent_task, cancel, tx);
        drive(ctx).await;
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => PipelineOutcome {
                all_suggestions: Vec::new(),
                execution_complete: false,
                final_error: None,
                group_count: 0,
                model_calls_avoided: 0,
                elapsed: Duration::ZERO,
            },
        }
    }

    fn context(
        &self,
        failures: Vec<Failure>,
        quiet: bool,
        progress: Arc<dyn ProgressReporter>,
        parent_task: Option<TaskId>,
        cancel: CancellationToken,
        completion: oneshot::Sender<PipelineOutcome>,
    ) -> PipelineContext {
        let progress: Arc<dyn ProgressReporter> = if quiet {
            Arc::new(NoopProgress::default())
        } else {
            progress
        };
        PipelineContext::new(
            failures,
            self.settings.clone(),
            quiet,
            Arc::clone(&self.service),
            self.grouper.clone(),
            ResourceMonitor::new(self.settings.llm_timeout(), cancel),
            progress,
            parent_task,
            completion,
        )
    }
}

async fn drive(mut ctx: PipelineContext) {
    let mut state = PipelineState::Initialize;
    while !state.is_terminal() {
        state = state.transition(&mut ctx).await;
    }
    ctx.finish();
}

/// Background run started with `BatchSuggestionPipeline::spawn`
pub struct PipelineHandle {
    cancel: CancellationToken,
    outcome: oneshot::Receiver<PipelineOutcome>,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    /// Abort the in-flight batch; the run still completes with partial results
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the completion signal
    pub async fn wait(self) -> anyhow::Result<PipelineOutcome> {
        match self.outcome.await {
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                self.task.await.context("Pipeline task failed")?;
                anyhow::bail!("Pipeline ended without reporting an outcome")
            }
        }
    }
}
