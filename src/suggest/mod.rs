//! Fix suggestions and the model service seam
//!
//! A suggestion is produced for one representative failure and then fanned out
//! to every other member of its group with the owning failure swapped.

pub mod llm;

use crate::failure::Failure;
use crate::patterns::{MatchKind, PatternRecognitionEngine};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Where a suggestion came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    /// Returned by the model for a group representative
    ModelBatch,
    /// Known pattern, no model cost
    PatternDatabase,
}

impl SuggestionSource {
    pub fn label(&self) -> &'static str {
        match self {
            SuggestionSource::ModelBatch => "model-batch",
            SuggestionSource::PatternDatabase => "pattern",
        }
    }
}

/// Machine-generated marker attached to every suggestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: SuggestionSource,
    /// Group this suggestion was produced for, if any
    pub group_key: Option<String>,
    /// Failure the model actually saw
    pub representative_id: Option<String>,
    pub group_size: usize,
    #[serde(default)]
    pub pattern_id: Option<String>,
}

impl Provenance {
    pub fn model_batch(group_key: &str, group_size: usize) -> Self {
        Self {
            source: SuggestionSource::ModelBatch,
            group_key: Some(group_key.to_string()),
            representative_id: Some(group_key.to_string()),
            group_size,
            pattern_id: None,
        }
    }

    pub fn known_pattern(pattern_id: &str) -> Self {
        Self {
            source: SuggestionSource::PatternDatabase,
            group_key: None,
            representative_id: None,
            group_size: 1,
            pattern_id: Some(pattern_id.to_string()),
        }
    }
}

/// A proposed edit to one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChange {
    pub file: PathBuf,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub original: Option<String>,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixSuggestion {
    pub id: Uuid,
    /// Owning failure
    pub failure: Failure,
    pub suggestion_text: String,
    pub explanation: Option<String>,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub code_changes: Vec<CodeChange>,
    pub provenance: Option<Provenance>,
    pub created_at: DateTime<Utc>,
}

impl FixSuggestion {
    pub fn new(failure: Failure, suggestion_text: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            failure,
            suggestion_text: suggestion_text.into(),
            explanation: None,
            confidence: clamp_confidence(confidence),
            code_changes: Vec::new(),
            provenance: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn with_code_changes(mut self, changes: Vec<CodeChange>) -> Self {
        self.code_changes = changes;
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn failure_id(&self) -> &str {
        self.failure.id()
    }

    /// Copy for another group member: new identity, same text and confidence
    pub fn fan_out(&self, member: &Failure) -> Self {
        Self {
            id: Uuid::new_v4(),
            failure: member.clone(),
            ..self.clone()
        }
    }

    pub fn is_model_generated(&self) -> bool {
        matches!(
            self.provenance,
            Some(Provenance {
                source: SuggestionSource::ModelBatch,
                ..
            })
        )
    }
}

/// NaN maps to 0
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Answer failures with an exact known-pattern hit locally.
///
/// Returns the local suggestions and the failures that still need the model,
/// both in input order.
pub fn known_pattern_suggestions(
    engine: &PatternRecognitionEngine,
    failures: &[Failure],
) -> (Vec<FixSuggestion>, Vec<Failure>) {
    let mut answered = Vec::new();
    let mut remaining = Vec::new();

    for failure in failures {
        match engine.classify(&failure.failure_type, &failure.message) {
            Some(hit) if hit.kind == MatchKind::Exact => answered.push(
                FixSuggestion::new(failure.clone(), hit.suggested_fix, hit.score)
                    .with_explanation(format!("Matches known pattern '{}'", hit.pattern_id))
                    .with_provenance(Provenance::known_pattern(&hit.pattern_id)),
            ),
            _ => remaining.push(failure.clone()),
        }
    }
    (answered, remaining)
}

/// Model-backed suggestion provider
#[async_trait]
pub trait SuggestionService: Send + Sync {
    /// Suggestions keyed by failure identity; failures without an entry get none
    async fn batch_suggest_fixes(
        &self,
        representatives: &[Failure],
    ) -> anyhow::Result<HashMap<String, Vec<FixSuggestion>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(id: &str) -> Failure {
        Failure::new(id, "tests/test_x.py", "KeyError", "'k'")
    }

    #[test]
    fn test_new_clamps_confidence() {
        assert_eq!(FixSuggestion::new(failure("a"), "x", 1.7).confidence, 1.0);
        assert_eq!(FixSuggestion::new(failure("a"), "x", -0.2).confidence, 0.0);
        assert_eq!(FixSuggestion::new(failure("a"), "x", f64::NAN).confidence, 0.0);
    }

    #[test]
    fn test_fan_out_swaps_owner_and_identity_only() {
        let original = FixSuggestion::new(failure("t::a"), "use .get()", 0.8)
            .with_explanation("key may be absent")
            .with_provenance(Provenance::model_batch("t::a", 2));
        let copy = original.fan_out(&failure("t::b"));

        assert_ne!(copy.id, original.id);
        assert_eq!(copy.failure_id(), "t::b");
        assert_eq!(copy.suggestion_text, original.suggestion_text);
        assert_eq!(copy.confidence, original.confidence);
        assert_eq!(copy.explanation, original.explanation);
        assert_eq!(copy.provenance, original.provenance);
        assert!(copy.is_model_generated());
    }

    #[test]
    fn test_known_pattern_suggestions_split_input() {
        let engine = PatternRecognitionEngine::with_seed_patterns();
        let failures = vec![
            Failure::new("t::a", "tests/test_x.py", "ZeroDivisionError", "division by zero"),
            Failure::new("t::b", "tests/test_x.py", "FluxError", "capacitor misaligned"),
        ];
        let (answered, remaining) = known_pattern_suggestions(&engine, &failures);

        assert_eq!(answered.len(), 1);
        assert_eq!(answered[0].failure_id(), "t::a");
        assert_eq!(
            answered[0].provenance.as_ref().unwrap().pattern_id.as_deref(),
            Some("division-by-zero")
        );
        assert!(!answered[0].is_model_generated());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), "t::b");
    }

    #[test]
    fn test_provenance_serializes_source_label() {
        let json = serde_json::to_string(&Provenance::model_batch("g", 3)).unwrap();
        assert!(json.contains("\"model_batch\""));
        assert_eq!(SuggestionSource::ModelBatch.label(), "model-batch");
    }
}
