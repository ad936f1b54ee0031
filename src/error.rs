//! Error taxonomy for the batch suggestion pipeline
//!
//! Handlers inside the pipeline work with `anyhow::Result`. At each state
//! boundary an error is turned into a `PipelineError` carrying the name of the
//! state it came from, then routed to the error state.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline states, used for error attribution and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateName {
    Initialize,
    GroupFailures,
    PrepareRepresentatives,
    BatchProcess,
    PostProcess,
    Error,
    Done,
}

impl StateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateName::Initialize => "initialize",
            StateName::GroupFailures => "group_failures",
            StateName::PrepareRepresentatives => "prepare_representatives",
            StateName::BatchProcess => "batch_process",
            StateName::PostProcess => "post_process",
            StateName::Error => "error",
            StateName::Done => "done",
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("initialization failed in {state}: {source:#}")]
    Initialization {
        state: StateName,
        #[source]
        source: anyhow::Error,
    },

    #[error("failure grouping failed in {state}: {source:#}")]
    FailureGrouping {
        state: StateName,
        #[source]
        source: anyhow::Error,
    },

    #[error("representative selection failed in {state}: {source:#}")]
    RepresentativeSelection {
        state: StateName,
        #[source]
        source: anyhow::Error,
    },

    #[error("batch processing failed in {state}: {source:#}")]
    BatchProcessing {
        state: StateName,
        #[source]
        source: anyhow::Error,
    },

    #[error("batch timed out in {state} after {}s", .timeout.as_secs_f64())]
    BatchTimeout { state: StateName, timeout: Duration },

    #[error("post-processing failed in {state}: {source:#}")]
    PostProcessing {
        state: StateName,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Wrap an untyped error in the variant that belongs to `state`
    pub fn for_state(state: StateName, source: anyhow::Error) -> Self {
        match state {
            StateName::Initialize => Self::Initialization { state, source },
            StateName::GroupFailures => Self::FailureGrouping { state, source },
            StateName::PrepareRepresentatives => Self::RepresentativeSelection { state, source },
            StateName::BatchProcess => Self::BatchProcessing { state, source },
            StateName::PostProcess | StateName::Error | StateName::Done => {
                Self::PostProcessing { state, source }
            }
        }
    }

    /// Keep an error that is already typed; wrap anything else for `state`
    pub fn classify(state: StateName, err: anyhow::Error) -> Self {
        match err.downcast::<PipelineError>() {
            Ok(typed) => typed,
            Err(other) => Self::for_state(state, other),
        }
    }

    pub fn state(&self) -> StateName {
        match self {
            Self::Initialization { state, .. }
            | Self::FailureGrouping { state, .. }
            | Self::RepresentativeSelection { state, .. }
            | Self::BatchProcessing { state, .. }
            | Self::BatchTimeout { state, .. }
            | Self::PostProcessing { state, .. } => *state,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::BatchTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_state_picks_matching_variant() {
        let err = PipelineError::for_state(StateName::GroupFailures, anyhow::anyhow!("boom"));
        assert!(matches!(err, PipelineError::FailureGrouping { .. }));
        assert_eq!(err.state(), StateName::GroupFailures);
        assert_eq!(
            err.to_string(),
            "failure grouping failed in group_failures: boom"
        );
    }

    #[test]
    fn test_classify_keeps_typed_errors() {
        let typed = PipelineError::BatchTimeout {
            state: StateName::BatchProcess,
            timeout: Duration::from_secs(2),
        };
        let err = PipelineError::classify(StateName::PostProcess, anyhow::Error::new(typed));
        assert!(err.is_timeout());
        assert_eq!(err.state(), StateName::BatchProcess);
        assert_eq!(err.to_string(), "batch timed out in batch_process after 2s");
    }

    #[test]
    fn test_classify_wraps_untyped_errors() {
        let err = PipelineError::classify(
            StateName::BatchProcess,
            anyhow::anyhow!("connection reset"),
        );
        assert!(matches!(err, PipelineError::BatchProcessing { .. }));
        assert!(!err.is_timeout());
        assert!(std::error::Error::source(&err).is_some());
    }
}
