//! Failure grouping
//!
//! Collapses failures that differ only by incidental values (numbers, quoted
//! literals, paths, addresses) so one representative per group can stand in
//! for the rest. The fingerprint function is pluggable:
//! - `MessageFingerprint`: failure type + normalized message
//! - `PatternFingerprint`: the recognition engine's known-pattern id, falling
//!   back to the message fingerprint for unknown failures
//!
//! Groups keep first-appearance order, and members keep input order.

use crate::failure::Failure;
use crate::patterns::PatternRecognitionEngine;
use crate::util::collapse_whitespace;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

static RE_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]+").expect("valid regex"));
static RE_UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("valid regex")
});
static RE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[A-Za-z]:)?(?:[\w.-]*/)+[\w.-]+").expect("valid regex"));
static RE_SINGLE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'[^']*'").expect("valid regex"));
static RE_DOUBLE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*""#).expect("valid regex"));
static RE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?\b\d+(?:\.\d+)?\b").expect("valid regex"));

/// Replace incidental values in a failure message with placeholders
pub fn normalize_message(message: &str) -> String {
    let normalized = RE_ADDRESS.replace_all(message, "<ADDR>");
    let normalized = RE_UUID.replace_all(&normalized, "<ID>");
    let normalized = RE_PATH.replace_all(&normalized, "<PATH>");
    let normalized = RE_SINGLE_QUOTED.replace_all(&normalized, "<STR>");
    let normalized = RE_DOUBLE_QUOTED.replace_all(&normalized, "<STR>");
    let normalized = RE_NUMBER.replace_all(&normalized, "<N>");
    collapse_whitespace(&normalized.to_lowercase())
}

/// Signature under which failures are considered duplicates
pub trait FailureFingerprint: Send + Sync {
    fn fingerprint(&self, failure: &Failure) -> String;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFingerprint;

impl FailureFingerprint for MessageFingerprint {
    fn fingerprint(&self, failure: &Failure) -> String {
        format!(
            "{}|{}",
            failure.failure_type.trim(),
            normalize_message(&failure.message)
        )
    }

    fn name(&self) -> &'static str {
        "message"
    }
}

pub struct PatternFingerprint {
    engine: Arc<PatternRecognitionEngine>,
}

impl PatternFingerprint {
    pub fn new(engine: Arc<PatternRecognitionEngine>) -> Self {
        Self { engine }
    }
}

impl FailureFingerprint for PatternFingerprint {
    fn fingerprint(&self, failure: &Failure) -> String {
        match self.engine.classify(&failure.failure_type, &failure.message) {
            Some(hit) => format!("pattern:{}", hit.pattern_id),
            None => MessageFingerprint.fingerprint(failure),
        }
    }

    fn name(&self) -> &'static str {
        "pattern"
    }
}

/// Which member of a group is sent to the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentativePolicy {
    /// First failure encountered
    #[default]
    First,
    /// Shortest traceback; ties keep the first encountered
    ShortestTraceback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureGroup {
    /// Identity of the representative chosen by the grouper's policy
    pub key: String,
    pub fingerprint: String,
    pub members: Vec<Failure>,
}

impl FailureGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_ids(&self) -> Vec<&str> {
        self.members.iter().map(Failure::id).collect()
    }
}

/// Ordered collection of groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureGroups {
    groups: Vec<FailureGroup>,
}

impl FailureGroups {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FailureGroup> {
        self.groups.iter()
    }

    pub fn get(&self, key: &str) -> Option<&FailureGroup> {
        self.groups.iter().find(|g| g.key == key)
    }

    pub fn total_failures(&self) -> usize {
        self.groups.iter().map(FailureGroup::len).sum()
    }

    /// `group_key -> member ids`, convenient for comparisons and reporting
    pub fn membership(&self) -> HashMap<String, Vec<String>> {
        self.groups
            .iter()
            .map(|g| {
                (
                    g.key.clone(),
                    g.members.iter().map(|f| f.test_id.clone()).collect(),
                )
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a FailureGroups {
    type Item = &'a FailureGroup;
    type IntoIter = std::slice::Iter<'a, FailureGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

#[derive(Clone)]
pub struct FailureGrouper {
    fingerprint: Arc<dyn FailureFingerprint>,
    policy: RepresentativePolicy,
}

impl Default for FailureGrouper {
    fn default() -> Self {
        Self::new(Arc::new(MessageFingerprint))
    }
}

impl std::fmt::Debug for FailureGrouper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureGrouper")
            .field("fingerprint", &self.fingerprint.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl FailureGrouper {
    pub fn new(fingerprint: Arc<dyn FailureFingerprint>) -> Self {
        Self {
            fingerprint,
            policy: RepresentativePolicy::First,
        }
    }

    pub fn with_policy(mut self, policy: RepresentativePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RepresentativePolicy {
        self.policy
    }

    pub fn group_failures(&self, failures: &[Failure]) -> FailureGroups {
        let fingerprints: Vec<String> = failures
            .par_iter()
            .map(|f| self.fingerprint.fingerprint(f))
            .collect();

        let mut groups: Vec<FailureGroup> = Vec::new();
        let mut slots: HashMap<&str, usize> = HashMap::new();

        for (failure, fingerprint) in failures.iter().zip(fingerprints.iter()) {
            match slots.get(fingerprint.as_str()) {
                Some(&i) => groups[i].members.push(failure.clone()),
                None => {
                    slots.insert(fingerprint.as_str(), groups.len());
                    groups.push(FailureGroup {
                        key: failure.test_id.clone(),
                        fingerprint: fingerprint.clone(),
                        members: vec![failure.clone()],
                    });
                }
            }
        }

        if self.policy != RepresentativePolicy::First {
            for group in &mut groups {
                if let Some(key) = self.select_representative(group).map(|f| f.test_id.clone()) {
                    group.key = key;
                }
            }
        }

        FailureGroups { groups }
    }

    /// Deterministic for identical member order; `None` only for an empty group
    pub fn select_representative<'a>(&self, group: &'a FailureGroup) -> Option<&'a Failure> {
        match self.policy {
            RepresentativePolicy::First => group.members.first(),
            RepresentativePolicy::ShortestTraceback => group
                .members
                .iter()
                .enumerate()
                .min_by_key(|(i, f)| (f.traceback_depth(), *i))
                .map(|(_, f)| f),
        }
    }
}
