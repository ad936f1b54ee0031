//! Multi-pattern substring search
//!
//! An Aho-Corasick automaton over ASCII-case-folded bytes. Building is
//! O(total pattern length); a search is a single pass over the text that
//! reports every occurrence of every pattern, overlapping ones included.
//! Case folding is ASCII-only, so byte offsets in the results always line
//! up with the original text.

use std::collections::{BTreeMap, VecDeque};

const ROOT: usize = 0;

/// One occurrence of a pattern in a searched text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DetectorMatch {
    /// Index of the pattern in the order it was given to `build`
    pub pattern: usize,
    /// Byte offset of the first matched byte
    pub start: usize,
    /// Byte offset one past the last matched byte
    pub end: usize,
}

#[derive(Debug, Clone, Default)]
struct Node {
    next: BTreeMap<u8, usize>,
    fail: usize,
    /// Patterns ending here, including those inherited through fail links
    outputs: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct MultiPatternDetector {
    nodes: Vec<Node>,
    pattern_lens: Vec<usize>,
    case_insensitive: bool,
}

impl Default for MultiPatternDetector {
    fn default() -> Self {
        Self::build(std::iter::empty::<&str>(), true)
    }
}

impl MultiPatternDetector {
    /// Build the automaton. Empty patterns are kept in the index space but never match.
    pub fn build<I, S>(patterns: I, case_insensitive: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut detector = Self {
            nodes: vec![Node::default()],
            pattern_lens: Vec::new(),
            case_insensitive,
        };

        for (index, pattern) in patterns.into_iter().enumerate() {
            let bytes = pattern.as_ref().as_bytes();
            detector.pattern_lens.push(bytes.len());
            if bytes.is_empty() {
                continue;
            }
            detector.insert(bytes, index);
        }

        detector.link_failures();
        detector
    }

    fn fold(&self, byte: u8) -> u8 {
        if self.case_insensitive {
            byte.to_ascii_lowercase()
        } else {
            byte
        }
    }

    fn insert(&mut self, bytes: &[u8], pattern: usize) {
        let mut state = ROOT;
        for &raw in bytes {
            let byte = self.fold(raw);
            state = match self.nodes[state].next.get(&byte) {
                Some(&next) => next,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[state].next.insert(byte, next);
                    next
                }
            };
        }
        self.nodes[state].outputs.push(pattern);
    }

    /// Breadth-first pass computing fail links and merging outputs along them
    fn link_failures(&mut self) {
        let mut queue = VecDeque::new();

        let root_children: Vec<usize> = self.nodes[ROOT].next.values().copied().collect();
        for child in root_children {
            self.nodes[child].fail = ROOT;
            queue.push_back(child);
        }

        while let Some(state) = queue.pop_front() {
            let edges: Vec<(u8, usize)> = self.nodes[state]
                .next
                .iter()
                .map(|(&byte, &child)| (byte, child))
                .collect();

            for (byte, child) in edges {
                let mut fallback = self.nodes[state].fail;
                let fail = loop {
                    if let Some(&target) = self.nodes[fallback].next.get(&byte) {
                        break target;
                    }
                    if fallback == ROOT {
                        break ROOT;
                    }
                    fallback = self.nodes[fallback].fail;
                };

                self.nodes[child].fail = fail;
                let inherited = self.nodes[fail].outputs.clone();
                self.nodes[child].outputs.extend(inherited);
                queue.push_back(child);
            }
        }
    }

    fn step(&self, mut state: usize, byte: u8) -> usize {
        loop {
            if let Some(&next) = self.nodes[state].next.get(&byte) {
                return next;
            }
            if state == ROOT {
                return ROOT;
            }
            state = self.nodes[state].fail;
        }
    }

    /// Every occurrence of every pattern, ordered by end offset then pattern index
    pub fn find_all(&self, text: &str) -> Vec<DetectorMatch> {
        let mut matches = Vec::new();
        if self.is_empty() {
            return matches;
        }

        let mut state = ROOT;
        for (offset, &raw) in text.as_bytes().iter().enumerate() {
            state = self.step(state, self.fold(raw));
            let end = offset + 1;
            let mut hits: Vec<usize> = self.nodes[state].outputs.clone();
            hits.sort_unstable();
            for pattern in hits {
                matches.push(DetectorMatch {
                    pattern,
                    start: end - self.pattern_lens[pattern],
                    end,
                });
            }
        }
        matches
    }

    /// Distinct pattern indices that occur in `text`, in first-seen order
    pub fn matching_patterns(&self, text: &str) -> Vec<usize> {
        let mut seen = vec![false; self.pattern_lens.len()];
        let mut found = Vec::new();
        for hit in self.find_all(text) {
            if !seen[hit.pattern] {
                seen[hit.pattern] = true;
                found.push(hit.pattern);
            }
        }
        found
    }

    pub fn is_match(&self, text: &str) -> bool {
        if self.is_empty() {
            return false;
        }
        let mut state = ROOT;
        for &raw in text.as_bytes() {
            state = self.step(state, self.fold(raw));
            if !self.nodes[state].outputs.is_empty() {
                return true;
            }
        }
        false
    }

    /// Number of patterns the detector was built from
    pub fn pattern_count(&self) -> usize {
        self.pattern_lens.len()
    }

    /// True when no non-empty pattern was registered
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classic_overlapping_patterns() {
        let detector = MultiPatternDetector::build(["he", "she", "his", "hers"], false);
        let hits = detector.find_all("ushers");

        let found: Vec<(usize, usize, usize)> =
            hits.iter().map(|m| (m.pattern, m.start, m.end)).collect();
        assert_eq!(found, vec![(0, 2, 4), (1, 1, 4), (3, 2, 6)]);
    }

    #[test]
    fn test_case_insensitive_keeps_offsets() {
        let detector = MultiPatternDetector::build(["no module named"], true);
        let text = "ModuleNotFoundError: No Module Named 'yaml'";
        let hits = detector.find_all(text);
        assert_eq!(hits.len(), 1);
        assert_eq!(&text[hits[0].start..hits[0].end], "No Module Named");
    }

    #[test]
    fn test_case_sensitive_mode() {
        let detector = MultiPatternDetector::build(["KeyError"], false);
        assert!(detector.is_match("raised KeyError"));
        assert!(!detector.is_match("raised keyerror"));
    }

    #[test]
    fn test_empty_detector_and_empty_patterns() {
        let detector = MultiPatternDetector::default();
        assert!(detector.is_empty());
        assert!(detector.find_all("anything").is_empty());

        let detector = MultiPatternDetector::build(["", "abc"], true);
        assert_eq!(detector.pattern_count(), 2);
        let hits = detector.find_all("xabcx");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pattern, 1);
    }

    #[test]
    fn test_duplicate_patterns_both_reported() {
        let detector = MultiPatternDetector::build(["index out of range", "index out of range"], true);
        assert_eq!(
            detector.matching_patterns("IndexError: list index out of range"),
            vec![0, 1]
        );
    }

    #[test]
    fn test_pattern_that_is_suffix_of_another() {
        let detector = MultiPatternDetector::build(["object has no attribute", "no attribute"], true);
        let hits = detector.matching_patterns("'NoneType' object has no attribute 'id'");
        assert_eq!(hits, vec![0, 1]);
    }

    fn naive_find_all(patterns: &[String], text: &str) -> Vec<DetectorMatch> {
        let mut out = Vec::new();
        for (index, pattern) in patterns.iter().enumerate() {
            if pattern.is_empty() {
                continue;
            }
            let mut from = 0;
            while let Some(pos) = text[from..].find(pattern.as_str()) {
                let start = from + pos;
                out.push(DetectorMatch {
                    pattern: index,
                    start,
                    end: start + pattern.len(),
                });
                from = start + 1;
            }
        }
        out.sort_by_key(|m| (m.end, m.pattern));
        out
    }

    proptest! {
        #[test]
        fn prop_agrees_with_naive_search(
            patterns in prop::collection::vec("[ab]{1,4}", 1..6),
            text in "[abc]{0,40}",
        ) {
            let detector = MultiPatternDetector::build(&patterns, false);
            prop_assert_eq!(detector.find_all(&text), naive_find_all(&patterns, &text));
        }
    }
}
