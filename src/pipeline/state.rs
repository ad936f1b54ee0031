//! States of a pipeline run and the transition function between them
//!
//! ```text
//! Initialize -> GroupFailures -> PrepareRepresentatives -> BatchProcess -> PostProcess -> Done
//!      \______________\__________________\_____________________\_______> Error -> PostProcess
//! ```
//!
//! Initialize jumps straight to Done on empty input. A PostProcess failure
//! after an earlier error ends the run instead of looping.

use super::context::{PipelineContext, RepresentativeBatch};
use crate::error::{PipelineError, StateName};
use crate::failure::Failure;
use crate::suggest::Provenance;
use anyhow::anyhow;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

macro_rules! step {
    ($ctx:expr, $($arg:tt)+) => {
        if $ctx.quiet {
            debug!($($arg)+)
        } else {
            info!($($arg)+)
        }
    };
}

#[derive(Debug)]
pub enum PipelineState {
    Initialize,
    GroupFailures,
    PrepareRepresentatives,
    BatchProcess,
    PostProcess,
    Error(PipelineError),
    Done,
}

impl PipelineState {
    pub fn name(&self) -> StateName {
        match self {
            PipelineState::Initialize => StateName::Initialize,
            PipelineState::GroupFailures => StateName::GroupFailures,
            PipelineState::PrepareRepresentatives => StateName::PrepareRepresentatives,
            PipelineState::BatchProcess => StateName::BatchProcess,
            PipelineState::PostProcess => StateName::PostProcess,
            PipelineState::Error(_) => StateName::Error,
            PipelineState::Done => StateName::Done,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done)
    }

    /// Run this state and return the next one. Never fails.
    pub async fn transition(self, ctx: &mut PipelineContext) -> PipelineState {
        let name = self.name();
        let result = match self {
            PipelineState::Initialize => initialize(ctx),
            PipelineState::GroupFailures => group_failures(ctx),
            PipelineState::PrepareRepresentatives => prepare_representatives(ctx),
            PipelineState::BatchProcess => batch_process(ctx).await,
            PipelineState::PostProcess => post_process(ctx),
            PipelineState::Error(err) => return handle_error(ctx, err),
            PipelineState::Done => return PipelineState::Done,
        };

        match result {
            Ok(next) => {
                debug!(from = %name, to = %next.name(), "pipeline transition");
                next
            }
            Err(err) => {
                let typed = PipelineError::classify(name, err);
                if name == StateName::PostProcess && ctx.final_error.is_some() {
                    // Already recovering; finish with what we have
                    warn!(state = %name, "Post-processing failed during recovery: {}", typed);
                    ctx.record_error(typed);
                    ctx.cleanup_tasks();
                    ctx.execution_complete = true;
                    return PipelineState::Done;
                }
                PipelineState::Error(typed)
            }
        }
    }
}

fn initialize(ctx: &mut PipelineContext) -> anyhow::Result<PipelineState> {
    if ctx.failures.is_empty() {
        step!(ctx, "No failures to process");
        ctx.execution_complete = true;
        return Ok(PipelineState::Done);
    }

    if let Some(dup) = first_duplicate_id(&ctx.failures) {
        anyhow::bail!(
            "duplicate failure id {:?}; suggestions are matched to failures by id",
            dup
        );
    }

    step!(ctx, failures = ctx.failures.len(), "Starting fix suggestion run");
    let parent = ctx.parent_task;
    let total = ctx.failures.len();
    let task = ctx.add_task("Generating fix suggestions", total, parent);
    ctx.run_task = Some(task);
    Ok(PipelineState::GroupFailures)
}

fn first_duplicate_id(failures: &[Failure]) -> Option<&str> {
    let mut ids = HashSet::with_capacity(failures.len());
    failures.iter().map(Failure::id).find(|id| !ids.insert(*id))
}

fn group_failures(ctx: &mut PipelineContext) -> anyhow::Result<PipelineState> {
    ctx.groups = ctx.grouper.group_failures(&ctx.failures);

    let summary = format!(
        "grouped {} into {} groups",
        ctx.failures.len(),
        ctx.groups.len()
    );
    step!(ctx, "{}", summary);
    ctx.update_task(ctx.run_task, &summary, 0);

    if ctx.groups.is_empty() {
        return Ok(PipelineState::PostProcess);
    }
    Ok(PipelineState::PrepareRepresentatives)
}

fn prepare_representatives(ctx: &mut PipelineContext) -> anyhow::Result<PipelineState> {
    let mut batches = Vec::with_capacity(ctx.groups.len());

    for group in &ctx.groups {
        let representative = ctx
            .grouper
            .select_representative(group)
            .ok_or_else(|| anyhow!("group {} has no members", group.key))?;
        let representative_index = group
            .members
            .iter()
            .position(|m| std::ptr::eq(m, representative))
            .unwrap_or(0);

        batches.push(RepresentativeBatch {
            group_key: group.key.clone(),
            representative: representative.clone(),
            representative_index,
            members: group.members.clone(),
        });
    }

    ctx.batches = batches;
    let run_task = ctx.run_task;
    let groups = ctx.batches.len();
    ctx.add_task("Requesting suggestions for group representatives", groups, run_task);
    debug!(
        representatives = groups,
        avoided = ctx.failures.len() - groups,
        "representatives selected"
    );
    Ok(PipelineState::BatchProcess)
}

async fn batch_process(ctx: &mut PipelineContext) -> anyhow::Result<PipelineState> {
    let representatives: Vec<_> = ctx
        .batches
        .iter()
        .map(|b| b.representative.clone())
        .collect();

    step!(
        ctx,
        representatives = representatives.len(),
        timeout_secs = ctx.monitor.timeout().as_secs_f64(),
        "Dispatching batch to model service"
    );

    let service = ctx.service.clone();
    let mut response: HashMap<String, Vec<_>> = ctx
        .monitor
        .guard(service.batch_suggest_fixes(&representatives))
        .await?;

    let mut produced = 0usize;
    for batch in &ctx.batches {
        let Some(suggestions) = response.remove(batch.representative_id()) else {
            debug!(representative = batch.representative_id(), "no suggestions returned");
            continue;
        };
        let provenance = Provenance::model_batch(&batch.group_key, batch.members.len());

        for suggestion in suggestions {
            let mut original = suggestion.with_provenance(provenance.clone());
            original.failure = batch.representative.clone();

            for (i, member) in batch.members.iter().enumerate() {
                if i == batch.representative_index {
                    ctx.suggestions.push(original.clone());
                } else {
                    ctx.suggestions.push(original.fan_out(member));
                }
                produced += 1;
            }
        }
    }

    let groups = ctx.batches.len();
    let task = ctx.open_tasks.last().copied();
    ctx.update_task(task, &format!("processed {} groups", groups), groups);
    step!(
        ctx,
        suggestions = produced,
        groups,
        "Model batch complete"
    );
    Ok(PipelineState::PostProcess)
}

fn post_process(ctx: &mut PipelineContext) -> anyhow::Result<PipelineState> {
    let known: HashSet<&str> = ctx.failures.iter().map(|f| f.id()).collect();
    let before = ctx.suggestions.len();
    ctx.suggestions.retain(|s| known.contains(s.failure_id()));
    if ctx.suggestions.len() != before {
        warn!(
            dropped = before - ctx.suggestions.len(),
            "Dropped suggestions for failures outside the input"
        );
    }

    sort_and_cap(
        &mut ctx.suggestions,
        ctx.settings.max_suggestions_per_failure,
    );

    ctx.execution_complete = true;
    ctx.cleanup_tasks();
    step!(
        ctx,
        suggestions = ctx.suggestions.len(),
        groups = ctx.groups.len(),
        model_calls_avoided = ctx.failures.len().saturating_sub(ctx.representative_count()),
        errored = ctx.final_error.is_some(),
        "Fix suggestion run complete"
    );
    Ok(PipelineState::Done)
}

/// Stable sort by confidence (descending), then keep at most `cap` per failure.
/// A cap of 0 keeps everything.
pub fn sort_and_cap(suggestions: &mut Vec<crate::suggest::FixSuggestion>, cap: usize) {
    suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    if cap == 0 {
        return;
    }
    let mut seen: HashMap<String, usize> = HashMap::new();
    suggestions.retain(|s| {
        let count = seen.entry(s.failure_id().to_string()).or_insert(0);
        *count += 1;
        *count <= cap
    });
}

fn handle_error(ctx: &mut PipelineContext, err: PipelineError) -> PipelineState {
    if err.is_timeout() {
        warn!(
            timeout_secs = ctx.monitor.timeout().as_secs_f64(),
            "Model batch timed out; group members are left without suggestions"
        );
    } else {
        warn!(state = %err.state(), "{}; continuing with partial results", err);
    }
    ctx.cleanup_tasks();
    ctx.record_error(err);
    PipelineState::PostProcess
}
