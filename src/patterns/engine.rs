//! Pattern recognition: classify, rank and cluster failures without a model call
//!
//! Classification runs in two passes against one database snapshot:
//! 1. exact: the multi-pattern detector over `"<type>: <message>"`
//! 2. fuzzy: message vs. each pattern's base message, narrowed to patterns of
//!    the same failure type whenever any exist
//!
//! Failures that match nothing are kept as unknown patterns with a default impact.

use super::fuzzy::{FuzzyMatcher, DEFAULT_FUZZY_THRESHOLD};
use super::{KnownPattern, PatternDatabase, PatternIndex, UpsertSummary};
use crate::failure::Failure;
use crate::report::{self, ReportEntry};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Impact assigned to failures that match no known pattern
pub const DEFAULT_UNKNOWN_IMPACT: f64 = 0.3;
/// Confidence attached to unknown-pattern records
pub const UNKNOWN_PATTERN_CONFIDENCE: f64 = 0.1;

const MESSAGE_LENGTH_SCALE: f64 = 200.0;
const TRACEBACK_DEPTH_SCALE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

/// Result of classifying one message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub kind: MatchKind,
    /// 1.0 for exact hits, the similarity score for fuzzy ones
    pub score: f64,
    pub impact_score: f64,
    pub suggested_fix: String,
}

impl PatternMatch {
    fn from_pattern(pattern: &KnownPattern, kind: MatchKind, score: f64) -> Self {
        Self {
            pattern_id: pattern.id.clone(),
            kind,
            score,
            impact_score: pattern.impact_score,
            suggested_fix: pattern.suggested_fix.clone(),
        }
    }
}

/// One distinct (location, type, message) occurrence found in a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedFailurePattern {
    pub location: String,
    pub failure_type: String,
    pub message: String,
    /// Raw occurrences merged into this record
    pub frequency: usize,
    pub traceback_depth: usize,
    pub complexity_score: f64,
    pub impact_score: f64,
    pub is_known_pattern: bool,
    pub known_pattern_id: Option<String>,
    pub match_kind: Option<MatchKind>,
    pub confidence: f64,
    pub suggested_fix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedFailure {
    pub pattern: DetectedFailurePattern,
    pub priority_score: f64,
    pub suggested_fix: Option<String>,
}

/// Failures of one type that can be addressed together
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkFixCandidate {
    pub fix_type: String,
    /// Number of ranked entries in the cluster
    pub count: usize,
    /// Raw occurrences across the cluster
    pub total_occurrences: usize,
    /// Locations of the affected failures, in rank order
    pub affected: Vec<String>,
    pub suggested_fix: Option<String>,
}

/// Everything `analyze` finds in one report
#[derive(Debug, Clone, Serialize)]
pub struct PatternAnalysis {
    pub patterns: Vec<DetectedFailurePattern>,
    pub ranked: Vec<RankedFailure>,
    pub bulk_fixes: Vec<BulkFixCandidate>,
    pub known_count: usize,
    pub unknown_count: usize,
}

impl PatternAnalysis {
    /// Raw occurrences that already have a fix from the database
    pub fn resolved_without_model(&self) -> usize {
        self.patterns
            .iter()
            .filter(|p| p.is_known_pattern)
            .map(|p| p.frequency)
            .sum()
    }
}

#[derive(Debug, Clone)]
struct Occurrence {
    location: String,
    failure_type: String,
    message: String,
    traceback_depth: usize,
    frequency: usize,
}

pub struct PatternRecognitionEngine {
    database: Arc<PatternDatabase>,
    fuzzy: FuzzyMatcher,
}

impl PatternRecognitionEngine {
    pub fn new(database: Arc<PatternDatabase>) -> Self {
        Self {
            database,
            fuzzy: FuzzyMatcher::new(DEFAULT_FUZZY_THRESHOLD),
        }
    }

    /// Engine over the built-in catalogue
    pub fn with_seed_patterns() -> Self {
        Self::new(Arc::new(PatternDatabase::with_seed_patterns()))
    }

    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy = FuzzyMatcher::new(threshold);
        self
    }

    pub fn database(&self) -> &Arc<PatternDatabase> {
        &self.database
    }

    /// Add or replace patterns by id; the next detection call sees the rebuilt index
    pub fn update_pattern_database(&self, patterns: Vec<KnownPattern>) -> UpsertSummary {
        let count = patterns.len();
        let summary = self.database.upsert(patterns);
        tracing::debug!(
            "Pattern database updated with {} patterns ({} added, {} replaced)",
            count,
            summary.added,
            summary.replaced
        );
        summary
    }

    /// Classify a single message against the current database
    pub fn classify(&self, failure_type: &str, message: &str) -> Option<PatternMatch> {
        let index = self.database.snapshot();
        self.classify_with(&index, failure_type, message)
    }

    fn classify_with(
        &self,
        index: &PatternIndex,
        failure_type: &str,
        message: &str,
    ) -> Option<PatternMatch> {
        exact_match(index, failure_type, message)
            .or_else(|| self.fuzzy_match(index, failure_type, message))
    }

    fn fuzzy_match(
        &self,
        index: &PatternIndex,
        failure_type: &str,
        message: &str,
    ) -> Option<PatternMatch> {
        if message.trim().is_empty() {
            return None;
        }

        let same_type: Vec<&KnownPattern> = index
            .patterns()
            .iter()
            .filter(|p| p.failure_type.eq_ignore_ascii_case(failure_type))
            .collect();
        let candidates: Vec<&KnownPattern> = if same_type.is_empty() {
            index.patterns().iter().collect()
        } else {
            same_type
        };

        let hit = self
            .fuzzy
            .best_match(message, candidates.iter().map(|p| p.base_message.as_str()))?;
        let pattern = candidates[hit.index];
        Some(PatternMatch::from_pattern(pattern, MatchKind::Fuzzy, hit.score))
    }

    /// Extract, merge and classify every failure occurrence in a raw report
    pub fn detect_failure_patterns(&self, raw_text: &str) -> Vec<DetectedFailurePattern> {
        let entries = report::extract_entries(raw_text);
        self.classify_occurrences(merge_occurrences(entries.iter().map(occurrence_from_entry)))
    }

    /// Same as `detect_failure_patterns` for already-structured failures
    pub fn detect_from_failures(&self, failures: &[Failure]) -> Vec<DetectedFailurePattern> {
        self.classify_occurrences(merge_occurrences(failures.iter().map(|f| Occurrence {
            location: f.test_id.clone(),
            failure_type: f.failure_type.clone(),
            message: f.message.trim().to_string(),
            traceback_depth: f.traceback_depth(),
            frequency: 1,
        })))
    }

    fn classify_occurrences(&self, occurrences: Vec<Occurrence>) -> Vec<DetectedFailurePattern> {
        if occurrences.is_empty() {
            return Vec::new();
        }
        let index = self.database.snapshot();

        occurrences
            .into_par_iter()
            .map(|occ| {
                let matched = self.classify_with(&index, &occ.failure_type, &occ.message);
                build_detected(occ, matched)
            })
            .collect()
    }

    /// Detect, rank and cluster in one call
    pub fn analyze(&self, raw_text: &str, min_bulk_count: usize) -> PatternAnalysis {
        let patterns = self.detect_failure_patterns(raw_text);
        let ranked = rank_failures(&patterns);
        let bulk_fixes = identify_bulk_fixes(&ranked, min_bulk_count);
        let known_count = patterns.iter().filter(|p| p.is_known_pattern).count();
        let unknown_count = patterns.len() - known_count;

        tracing::debug!(
            "Analyzed report: {} patterns ({} known, {} unknown), {} bulk-fix candidates",
            patterns.len(),
            known_count,
            unknown_count,
            bulk_fixes.len()
        );

        PatternAnalysis {
            patterns,
            ranked,
            bulk_fixes,
            known_count,
            unknown_count,
        }
    }
}

/// Exact pass: prefer hits of the same failure type, then the longest pattern,
/// then the highest impact; remaining ties keep the earliest registered pattern.
fn exact_match(index: &PatternIndex, failure_type: &str, message: &str) -> Option<PatternMatch> {
    let text = format!("{}: {}", failure_type, message);
    let hits = index.detector().matching_patterns(&text);

    let mut best: Option<&KnownPattern> = None;
    let mut best_key = (false, 0usize, f64::MIN);
    let mut best_idx = usize::MAX;
    for i in hits {
        let pattern = &index.patterns()[i];
        let key = (
            pattern.failure_type.eq_ignore_ascii_case(failure_type),
            pattern.pattern.len(),
            pattern.impact_score,
        );
        let better = match best {
            None => true,
            Some(_) => {
                key.0 > best_key.0
                    || (key.0 == best_key.0 && key.1 > best_key.1)
                    || (key.0 == best_key.0 && key.1 == best_key.1 && key.2 > best_key.2)
                    || (key.0 == best_key.0
                        && key.1 == best_key.1
                        && key.2 == best_key.2
                        && i < best_idx)
            }
        };
        if better {
            best = Some(pattern);
            best_key = key;
            best_idx = i;
        }
    }

    best.map(|p| PatternMatch::from_pattern(p, MatchKind::Exact, 1.0))
}

fn occurrence_from_entry(entry: &ReportEntry) -> Occurrence {
    Occurrence {
        location: entry.location.clone(),
        failure_type: entry.failure_type.clone(),
        message: entry.message.trim().to_string(),
        traceback_depth: entry.traceback_depth(),
        frequency: 1,
    }
}

/// Merge identical (location, type, message) triples, keeping first-seen order
fn merge_occurrences(occurrences: impl Iterator<Item = Occurrence>) -> Vec<Occurrence> {
    let mut merged: Vec<Occurrence> = Vec::new();
    let mut seen: HashMap<(String, String, String), usize> = HashMap::new();

    for occ in occurrences {
        let key = (
            occ.location.clone(),
            occ.failure_type.clone(),
            occ.message.clone(),
        );
        match seen.get(&key) {
            Some(&i) => {
                let existing = &mut merged[i];
                existing.frequency += occ.frequency;
                existing.traceback_depth = existing.traceback_depth.max(occ.traceback_depth);
            }
            None => {
                seen.insert(key, merged.len());
                merged.push(occ);
            }
        }
    }
    merged
}

/// Complexity in [0, 1] from message length and traceback depth
pub fn complexity_score(message: &str, traceback_depth: usize) -> f64 {
    let length = (message.chars().count() as f64 / MESSAGE_LENGTH_SCALE).min(1.0);
    let depth = (traceback_depth as f64 / TRACEBACK_DEPTH_SCALE).min(1.0);
    0.5 * length + 0.5 * depth
}

fn build_detected(occ: Occurrence, matched: Option<PatternMatch>) -> DetectedFailurePattern {
    let complexity = complexity_score(&occ.message, occ.traceback_depth);
    match matched {
        Some(m) => DetectedFailurePattern {
            location: occ.location,
            failure_type: occ.failure_type,
            message: occ.message,
            frequency: occ.frequency,
            traceback_depth: occ.traceback_depth,
            complexity_score: complexity,
            impact_score: m.impact_score,
            is_known_pattern: true,
            known_pattern_id: Some(m.pattern_id),
            match_kind: Some(m.kind),
            confidence: m.score,
            suggested_fix: Some(m.suggested_fix),
        },
        None => DetectedFailurePattern {
            location: occ.location,
            failure_type: occ.failure_type,
            message: occ.message,
            frequency: occ.frequency,
            traceback_depth: occ.traceback_depth,
            complexity_score: complexity,
            impact_score: DEFAULT_UNKNOWN_IMPACT,
            is_known_pattern: false,
            known_pattern_id: None,
            match_kind: None,
            confidence: UNKNOWN_PATTERN_CONFIDENCE,
            suggested_fix: None,
        },
    }
}

pub fn priority_score(pattern: &DetectedFailurePattern) -> f64 {
    pattern.frequency as f64 * pattern.impact_score * (1.0 + pattern.complexity_score)
}

/// Highest priority first; equal scores keep input order
pub fn rank_failures(patterns: &[DetectedFailurePattern]) -> Vec<RankedFailure> {
    let mut ranked: Vec<RankedFailure> = patterns
        .iter()
        .map(|p| RankedFailure {
            priority_score: priority_score(p),
            suggested_fix: p.suggested_fix.clone(),
            pattern: p.clone(),
        })
        .collect();
    ranked.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
    ranked
}

/// Cluster ranked failures by type; clusters smaller than `min_count` are dropped.
/// Larger clusters come first, equal sizes keep the rank order of their best member.
pub fn identify_bulk_fixes(ranked: &[RankedFailure], min_count: usize) -> Vec<BulkFixCandidate> {
    let min_count = min_count.max(1);
    let mut clusters: Vec<BulkFixCandidate> = Vec::new();
    let mut by_type: HashMap<&str, usize> = HashMap::new();

    for entry in ranked {
        let failure_type = entry.pattern.failure_type.as_str();
        let slot = match by_type.get(failure_type) {
            Some(&i) => i,
            None => {
                by_type.insert(failure_type, clusters.len());
                clusters.push(BulkFixCandidate {
                    fix_type: failure_type.to_string(),
                    count: 0,
                    total_occurrences: 0,
                    affected: Vec::new(),
                    suggested_fix: None,
                });
                clusters.len() - 1
            }
        };
        let cluster = &mut clusters[slot];
        cluster.count += 1;
        cluster.total_occurrences += entry.pattern.frequency;
        cluster.affected.push(entry.pattern.location.clone());
        if cluster.suggested_fix.is_none() {
            cluster.suggested_fix = entry.suggested_fix.clone();
        }
    }

    clusters.retain(|c| c.count >= min_count);
    clusters.sort_by(|a, b| b.count.cmp(&a.count));
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(id: &str, pattern: &str, failure_type: &str, base: &str, impact: f64) -> KnownPattern {
        KnownPattern {
            id: id.to_string(),
            pattern: pattern.to_string(),
            failure_type: failure_type.to_string(),
            base_message: base.to_string(),
            suggested_fix: format!("apply {}", id),
            impact_score: impact,
        }
    }

    fn engine_with(patterns: Vec<KnownPattern>) -> PatternRecognitionEngine {
        PatternRecognitionEngine::new(Arc::new(PatternDatabase::new(patterns)))
    }

    fn detected(location: &str, failure_type: &str, frequency: usize, impact: f64) -> DetectedFailurePattern {
        DetectedFailurePattern {
            location: location.to_string(),
            failure_type: failure_type.to_string(),
            message: "m".to_string(),
            frequency,
            traceback_depth: 0,
            complexity_score: 0.0,
            impact_score: impact,
            is_known_pattern: false,
            known_pattern_id: None,
            match_kind: None,
            confidence: UNKNOWN_PATTERN_CONFIDENCE,
            suggested_fix: None,
        }
    }

    #[test]
    fn test_registered_pattern_is_detected_verbatim() {
        let engine = engine_with(Vec::new());
        engine.update_pattern_database(vec![known(
            "stale-token",
            "token has expired",
            "AuthError",
            "token has expired",
            0.9,
        )]);

        let report = "FAILED tests/test_auth.py::test_refresh - AuthError: token has expired at 12:00\n";
        let patterns = engine.detect_failure_patterns(report);
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].is_known_pattern);
        assert_eq!(patterns[0].known_pattern_id.as_deref(), Some("stale-token"));
        assert_eq!(patterns[0].match_kind, Some(MatchKind::Exact));
        assert_eq!(patterns[0].suggested_fix.as_deref(), Some("apply stale-token"));
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        let engine = PatternRecognitionEngine::with_seed_patterns();
        assert!(engine.detect_failure_patterns("").is_empty());
        assert!(engine.detect_failure_patterns("  \n \t ").is_empty());
        assert!(engine.detect_from_failures(&[]).is_empty());
    }

    #[test]
    fn test_duplicate_triples_merge_into_frequency() {
        let engine = PatternRecognitionEngine::with_seed_patterns();
        let report = "\
ValueError: bad input
ValueError: bad input
ValueError: other input
";
        let patterns = engine.detect_failure_patterns(report);
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].message, "bad input");
        assert_eq!(patterns[0].frequency, 2);
        assert_eq!(patterns[1].frequency, 1);
    }

    #[test]
    fn test_unknown_type_is_kept_with_low_confidence() {
        let engine = engine_with(vec![known("a", "alpha", "ValueError", "alpha", 0.9)]);
        let failures = vec![Failure::new(
            "t.py::test_x",
            "t.py",
            "QuantumFluxError",
            "flux capacitor misaligned",
        )];
        let patterns = engine.detect_from_failures(&failures);
        assert_eq!(patterns.len(), 1);
        assert!(!patterns[0].is_known_pattern);
        assert!(patterns[0].known_pattern_id.is_none());
        assert_eq!(patterns[0].impact_score, DEFAULT_UNKNOWN_IMPACT);
        assert_eq!(patterns[0].confidence, UNKNOWN_PATTERN_CONFIDENCE);
    }

    #[test]
    fn test_exact_pass_prefers_same_type_then_longest() {
        let engine = PatternRecognitionEngine::with_seed_patterns();
        let hit = engine
            .classify("AttributeError", "'NoneType' object has no attribute 'email'")
            .unwrap();
        assert_eq!(hit.pattern_id, "none-attribute");
        assert_eq!(hit.kind, MatchKind::Exact);

        let hit = engine.classify("KeyError", "'user_id'").unwrap();
        assert_eq!(hit.pattern_id, "key-error");
    }

    #[test]
    fn test_fuzzy_fallback_when_no_exact_hit() {
        let engine = engine_with(vec![known(
            "db-locked",
            "database is locked",
            "OperationalError",
            "database is locked",
            0.7,
        )]);
        let hit = engine
            .classify("OperationalError", "database was locked")
            .unwrap();
        assert_eq!(hit.pattern_id, "db-locked");
        assert_eq!(hit.kind, MatchKind::Fuzzy);
        assert!(hit.score >= DEFAULT_FUZZY_THRESHOLD);
    }

    #[test]
    fn test_fuzzy_narrows_to_matching_failure_type() {
        let engine = engine_with(vec![
            known(
                "generic",
                "zz-no-literal-hit-1",
                "ValueError",
                "resource temporarily unavailable",
                0.4,
            ),
            known(
                "blocking",
                "zz-no-literal-hit-2",
                "BlockingIOError",
                "resource temporarily unavailable now",
                0.6,
            ),
        ]);
        let hit = engine
            .classify("BlockingIOError", "resource temporarily unavailable")
            .unwrap();
        assert_eq!(hit.pattern_id, "blocking");

        let hit = engine
            .classify("SomeOtherError", "resource temporarily unavailable")
            .unwrap();
        assert_eq!(hit.pattern_id, "generic");
    }

    #[test]
    fn test_fuzzy_threshold_rejects_weak_matches() {
        let engine = engine_with(vec![known(
            "db-locked",
            "database is locked",
            "OperationalError",
            "database is locked",
            0.7,
        )])
        .with_fuzzy_threshold(0.95);
        assert!(engine.classify("OperationalError", "database was locked").is_none());
    }

    #[test]
    fn test_update_is_visible_to_next_detection() {
        let engine = engine_with(Vec::new());
        let failures = vec![Failure::new("t.py::a", "t.py", "RuntimeError", "event loop is closed")];
        assert!(!engine.detect_from_failures(&failures)[0].is_known_pattern);

        engine.update_pattern_database(vec![known(
            "loop-closed",
            "event loop is closed",
            "RuntimeError",
            "event loop is closed",
            0.8,
        )]);
        let patterns = engine.detect_from_failures(&failures);
        assert!(patterns[0].is_known_pattern);
        assert_eq!(patterns[0].known_pattern_id.as_deref(), Some("loop-closed"));
    }

    #[test]
    fn test_complexity_is_bounded() {
        assert_eq!(complexity_score("", 0), 0.0);
        assert_eq!(complexity_score(&"x".repeat(1000), 500), 1.0);
        let mid = complexity_score(&"x".repeat(100), 10);
        assert!((mid - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rank_is_descending_and_stable() {
        let patterns = vec![
            detected("a", "TypeError", 1, 0.5),
            detected("b", "TypeError", 3, 0.5),
            detected("c", "KeyError", 1, 0.5),
            detected("d", "KeyError", 2, 0.9),
        ];
        let ranked = rank_failures(&patterns);
        let order: Vec<&str> = ranked.iter().map(|r| r.pattern.location.as_str()).collect();
        assert_eq!(order, vec!["d", "b", "a", "c"]);
        assert!((ranked[0].priority_score - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_bulk_fixes_respect_min_count() {
        let patterns = vec![
            detected("a", "TypeError", 1, 0.5),
            detected("b", "TypeError", 3, 0.5),
            detected("c", "KeyError", 1, 0.5),
            detected("d", "ImportError", 1, 0.9),
            detected("e", "TypeError", 1, 0.1),
            detected("f", "KeyError", 1, 0.2),
        ];
        let ranked = rank_failures(&patterns);
        let bulk = identify_bulk_fixes(&ranked, 2);

        assert_eq!(bulk.len(), 2);
        assert_eq!(bulk[0].fix_type, "TypeError");
        assert_eq!(bulk[0].count, 3);
        assert_eq!(bulk[0].total_occurrences, 5);
        assert_eq!(bulk[0].affected, vec!["b", "a", "e"]);
        assert_eq!(bulk[1].fix_type, "KeyError");
        assert_eq!(bulk[1].count, 2);

        assert_eq!(identify_bulk_fixes(&ranked, 4).len(), 0);
        assert_eq!(identify_bulk_fixes(&ranked, 1).len(), 3);
    }

    #[test]
    fn test_analyze_counts_known_and_unknown() {
        let engine = PatternRecognitionEngine::with_seed_patterns();
        let report = "\
FAILED tests/test_a.py::test_one - ModuleNotFoundError: No module named 'yaml'
FAILED tests/test_a.py::test_two - ModuleNotFoundError: No module named 'toml'
FAILED tests/test_b.py::test_three - FrobnicationError: widget wobbled
";
        let analysis = engine.analyze(report, 2);
        assert_eq!(analysis.patterns.len(), 3);
        assert_eq!(analysis.known_count, 2);
        assert_eq!(analysis.unknown_count, 1);
        assert_eq!(analysis.resolved_without_model(), 2);
        assert_eq!(analysis.bulk_fixes.len(), 1);
        assert_eq!(analysis.bulk_fixes[0].fix_type, "ModuleNotFoundError");
        assert_eq!(analysis.ranked[0].pattern.failure_type, "ModuleNotFoundError");
    }
}
