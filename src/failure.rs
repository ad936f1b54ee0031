//! Failing-test records that enter the suggestion pipeline
//!
//! A `Failure` is owned by the caller and treated as read-only everywhere
//! in this crate. Suggestions refer back to the failure they belong to.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One failing test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Stable test identity, e.g. `tests/test_math.py::test_add`
    pub test_id: String,
    /// File that contains the test
    pub file: PathBuf,
    /// Exception or failure class, e.g. `AssertionError`
    pub failure_type: String,
    /// First line of the failure message
    pub message: String,
    /// Full traceback as reported by the test runner
    #[serde(default)]
    pub traceback: String,
    /// Source lines around the failing assertion, when the runner provides them
    #[serde(default)]
    pub source_snippet: Option<String>,
    #[serde(default)]
    pub line_number: Option<u32>,
}

impl Failure {
    pub fn new(
        test_id: impl Into<String>,
        file: impl Into<PathBuf>,
        failure_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            file: file.into(),
            failure_type: failure_type.into(),
            message: message.into(),
            traceback: String::new(),
            source_snippet: None,
            line_number: None,
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = traceback.into();
        self
    }

    pub fn with_source_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.source_snippet = Some(snippet.into());
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line_number = Some(line);
        self
    }

    /// Identity used to key model responses and suggestion caps
    pub fn id(&self) -> &str {
        &self.test_id
    }

    /// Number of non-empty traceback lines
    pub fn traceback_depth(&self) -> usize {
        self.traceback
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count()
    }

    /// Short test name (the part after the last `::`)
    pub fn test_name(&self) -> &str {
        self.test_id
            .rsplit("::")
            .next()
            .unwrap_or(self.test_id.as_str())
    }
}

/// Parse a JSON array of failures
pub fn parse_failures_json(content: &str) -> anyhow::Result<Vec<Failure>> {
    let failures: Vec<Failure> = serde_json::from_str(content)?;
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_and_name() {
        let failure = Failure::new(
            "tests/test_math.py::TestAdd::test_negative",
            "tests/test_math.py",
            "AssertionError",
            "assert -1 == 1",
        );
        assert_eq!(failure.id(), "tests/test_math.py::TestAdd::test_negative");
        assert_eq!(failure.test_name(), "test_negative");
    }

    #[test]
    fn test_traceback_depth_ignores_blank_lines() {
        let failure = Failure::new("t::a", "t.py", "KeyError", "'x'")
            .with_traceback("line one\n\n   \nline two\nline three\n");
        assert_eq!(failure.traceback_depth(), 3);
    }

    #[test]
    fn test_parse_failures_json_defaults_optional_fields() {
        let json = r#"[{"test_id": "t.py::test_a", "file": "t.py", "failure_type": "KeyError", "message": "'a'"}]"#;
        let failures = parse_failures_json(json).unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].traceback.is_empty());
        assert!(failures[0].source_snippet.is_none());
        assert!(failures[0].line_number.is_none());
    }

    #[test]
    fn test_parse_failures_json_rejects_garbage() {
        assert!(parse_failures_json("{not json").is_err());
    }
}
