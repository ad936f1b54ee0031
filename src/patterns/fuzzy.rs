//! Fuzzy string matching for failure messages
//!
//! The score is the better of two views of the same pair:
//! - normalized Levenshtein similarity over characters (catches typos, small edits)
//! - Jaccard similarity over word tokens (catches reordered or padded messages)
//!
//! Both inputs are lowercased and whitespace-collapsed first. Scores are in [0.0, 1.0].

use crate::util::collapse_whitespace;
use std::collections::HashSet;

/// Default acceptance threshold for a fuzzy hit
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.7;

/// Best candidate found by `FuzzyMatcher::best_match`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyMatch {
    /// Position of the candidate in the iterator passed to `best_match`
    pub index: usize,
    pub score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct FuzzyMatcher {
    threshold: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FUZZY_THRESHOLD)
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Normalized similarity between two strings: the better of character-level
    /// Levenshtein and word-set Jaccard, so reordered messages still match
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let a = normalize(a);
        let b = normalize(b);
        if a == b {
            return 1.0;
        }
        normalized_levenshtein(&a, &b).max(token_jaccard(&a, &b))
    }

    /// Highest-scoring candidate at or above the threshold; ties keep the earliest
    pub fn best_match<'a, I>(&self, query: &str, candidates: I) -> Option<FuzzyMatch>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<FuzzyMatch> = None;
        for (index, candidate) in candidates.into_iter().enumerate() {
            let score = self.similarity(query, candidate);
            if score < self.threshold {
                continue;
            }
            match best {
                Some(current) if current.score >= score => {}
                _ => best = Some(FuzzyMatch { index, score }),
            }
        }
        best
    }
}

fn normalize(s: &str) -> String {
    collapse_whitespace(&s.to_lowercase())
}

/// Minimum single-character edits between two strings (two-row DP)
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (curr[j - 1] + 1)
                .min(prev[j] + 1)
                .min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

fn normalized_levenshtein(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f64 / max_len as f64
}

fn tokens(s: &str) -> HashSet<&str> {
    s.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .collect()
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}
