//! Known failure patterns and the pattern database
//!
//! The database hands out immutable snapshots (`Arc<PatternIndex>`). An update
//! builds a complete new index, including the search automaton, before it is
//! swapped in, so a reader holds either the old index or the new one and never
//! anything in between.

pub mod detector;
pub mod engine;
pub mod fuzzy;
pub mod seed;

use anyhow::Context;
use detector::MultiPatternDetector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

pub use engine::{
    BulkFixCandidate, DetectedFailurePattern, MatchKind, PatternAnalysis, PatternMatch,
    PatternRecognitionEngine, RankedFailure,
};

/// A registered failure signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownPattern {
    pub id: String,
    /// Literal text searched for in failure messages
    pub pattern: String,
    pub failure_type: String,
    /// Canonical message used for fuzzy comparison
    pub base_message: String,
    pub suggested_fix: String,
    pub impact_score: f64,
}

/// Immutable view of the catalogue plus its search automaton
#[derive(Debug)]
pub struct PatternIndex {
    patterns: Vec<KnownPattern>,
    detector: MultiPatternDetector,
    by_id: HashMap<String, usize>,
    generation: u64,
}

impl PatternIndex {
    fn build(patterns: Vec<KnownPattern>, generation: u64) -> Self {
        let detector = MultiPatternDetector::build(patterns.iter().map(|p| &p.pattern), true);
        let by_id = patterns
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        Self {
            patterns,
            detector,
            by_id,
            generation,
        }
    }

    pub fn patterns(&self) -> &[KnownPattern] {
        &self.patterns
    }

    pub fn detector(&self) -> &MultiPatternDetector {
        &self.detector
    }

    pub fn get(&self, id: &str) -> Option<&KnownPattern> {
        self.by_id.get(id).map(|&i| &self.patterns[i])
    }

    /// Bumped on every rebuild
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Counts from an upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub added: usize,
    pub replaced: usize,
}

#[derive(Debug)]
pub struct PatternDatabase {
    index: RwLock<Arc<PatternIndex>>,
    /// Serializes writers so concurrent upserts cannot drop each other's changes
    update_lock: Mutex<()>,
}

impl Default for PatternDatabase {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PatternDatabase {
    /// Build a database; later entries replace earlier ones with the same id
    pub fn new(patterns: Vec<KnownPattern>) -> Self {
        let mut merged: Vec<KnownPattern> = Vec::with_capacity(patterns.len());
        merge_by_id(&mut merged, patterns);
        Self {
            index: RwLock::new(Arc::new(PatternIndex::build(merged, 0))),
            update_lock: Mutex::new(()),
        }
    }

    pub fn with_seed_patterns() -> Self {
        Self::new(seed::seed_patterns())
    }

    /// Current snapshot; cheap to clone and safe to hold across updates
    pub fn snapshot(&self) -> Arc<PatternIndex> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Append new patterns and replace existing ones by id, then rebuild the index
    pub fn upsert(&self, patterns: Vec<KnownPattern>) -> UpsertSummary {
        let _writer = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();

        let mut merged = current.patterns.clone();
        let summary = merge_by_id(&mut merged, patterns);
        let rebuilt = Arc::new(PatternIndex::build(merged, current.generation + 1));

        *self.index.write().unwrap_or_else(PoisonError::into_inner) = rebuilt;
        summary
    }

    pub fn len(&self) -> usize {
        self.snapshot().patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<KnownPattern> {
        self.snapshot().get(id).cloned()
    }

    /// Load a JSON array of patterns
    pub fn load_json(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(read_patterns_json(path)?))
    }

    /// Write the current catalogue as a JSON array (temp file + rename)
    pub fn save_json(&self, path: &Path) -> anyhow::Result<()> {
        let snapshot = self.snapshot();
        let content = serde_json::to_string_pretty(snapshot.patterns())
            .context("Failed to serialize pattern database")?;

        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err).with_context(|| format!("Failed to replace {}", path.display()));
        }
        Ok(())
    }
}

pub fn read_patterns_json(path: &Path) -> anyhow::Result<Vec<KnownPattern>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read patterns from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse patterns in {}", path.display()))
}

fn merge_by_id(existing: &mut Vec<KnownPattern>, incoming: Vec<KnownPattern>) -> UpsertSummary {
    let mut positions: HashMap<String, usize> = existing
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.clone(), i))
        .collect();
    let mut summary = UpsertSummary::default();

    for pattern in incoming {
        match positions.get(&pattern.id) {
            Some(&i) => {
                existing[i] = pattern;
                summary.replaced += 1;
            }
            None => {
                positions.insert(pattern.id.clone(), existing.len());
                existing.push(pattern);
                summary.added += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(id: &str, text: &str) -> KnownPattern {
        KnownPattern {
            id: id.to_string(),
            pattern: text.to_string(),
            failure_type: "ValueError".to_string(),
            base_message: text.to_string(),
            suggested_fix: format!("fix {}", id),
            impact_score: 0.5,
        }
    }

    #[test]
    fn test_new_dedupes_by_id_keeping_last() {
        let db = PatternDatabase::new(vec![pattern("a", "first"), pattern("a", "second")]);
        assert_eq!(db.len(), 1);
        assert_eq!(db.get("a").unwrap().pattern, "second");
    }

    #[test]
    fn test_upsert_appends_and_replaces_then_rebuilds() {
        let db = PatternDatabase::new(vec![pattern("a", "alpha failure")]);
        let before = db.snapshot();
        assert!(!before.detector().is_match("beta failure"));

        let summary = db.upsert(vec![pattern("a", "alpha v2"), pattern("b", "beta failure")]);
        assert_eq!(summary, UpsertSummary { added: 1, replaced: 1 });

        let after = db.snapshot();
        assert_eq!(after.generation(), before.generation() + 1);
        assert!(after.detector().is_match("saw a beta failure here"));
        assert!(!after.detector().is_match("alpha failure"));
        assert_eq!(after.patterns()[0].id, "a");
        assert_eq!(after.patterns()[1].id, "b");

        // Old snapshot is untouched
        assert_eq!(before.patterns().len(), 1);
        assert!(before.detector().is_match("alpha failure"));
    }

    #[test]
    fn test_seeded_database_is_searchable() {
        let db = PatternDatabase::with_seed_patterns();
        assert!(!db.is_empty());
        let snapshot = db.snapshot();
        let hits = snapshot
            .detector()
            .matching_patterns("ModuleNotFoundError: No module named 'yaml'");
        let ids: Vec<&str> = hits
            .iter()
            .map(|&i| snapshot.patterns()[i].id.as_str())
            .collect();
        assert!(ids.contains(&"module-not-found"));
    }

    #[test]
    fn test_json_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");

        let db = PatternDatabase::new(vec![pattern("a", "alpha"), pattern("b", "beta")]);
        db.save_json(&path).unwrap();

        let loaded = PatternDatabase::load_json(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("b").unwrap().suggested_fix, "fix b");
        assert!(!dir.path().join("patterns.tmp").exists());
    }

    #[test]
    fn test_load_json_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PatternDatabase::load_json(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read patterns"));
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let db = Arc::new(PatternDatabase::new(vec![pattern("p0", "needle 0")]));
        let writer = {
            let db = Arc::clone(&db);
            std::thread::spawn(move || {
                for i in 1..50 {
                    db.upsert(vec![pattern(&format!("p{}", i), &format!("needle {}", i))]);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snap = db.snapshot();
                        assert_eq!(snap.detector().pattern_count(), snap.patterns().len());
                        assert_eq!(snap.patterns().len() as u64, snap.generation() + 1);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(db.len(), 50);
    }
}
