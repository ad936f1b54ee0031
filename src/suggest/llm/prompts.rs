use crate::failure::Failure;
use crate::util::truncate;
use serde::Serialize;

/// Traceback budget per failure, in characters (tail is kept)
const MAX_TRACEBACK_CHARS: usize = 2000;
const MAX_SNIPPET_CHARS: usize = 1500;

pub const BATCH_FIX_SYSTEM: &str = r#"You are a senior engineer triaging failing tests. For each failing test you receive, propose the most likely fix.

Each failure stands for a group of near-identical failures, so describe the fix in terms that apply to the underlying cause rather than the specific literal values in one message.

OUTPUT FORMAT (JSON):
{
  "suggestions": [
    {
      "test_id": "exact test_id from the input",
      "suggestion": "1-3 sentence description of the fix",
      "explanation": "why this failure happens",
      "confidence": 0.0,
      "code_changes": [
        {
          "file": "path/to/file.py",
          "line": 42,
          "original": "exact text being replaced (optional)",
          "replacement": "new text"
        }
      ]
    }
  ]
}

RULES:
- Use the exact test_id values you were given; never invent new ones
- confidence is a number between 0 and 1
- Give at most 3 suggestions per test_id, best first
- code_changes may be empty when the fix is not a local edit (missing dependency, environment)
- Return only the JSON object"#;

#[derive(Serialize)]
struct PromptFailure<'a> {
    test_id: &'a str,
    file: String,
    failure_type: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    traceback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_snippet: Option<String>,
}

/// Keep the last `max_chars` characters; the failing frame is at the bottom
fn tail_chars(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        return s.to_string();
    }
    let tail: String = s.chars().skip(count - max_chars).collect();
    format!("...{}", tail)
}

pub fn batch_fix_user_prompt(failures: &[Failure]) -> String {
    let entries: Vec<PromptFailure<'_>> = failures
        .iter()
        .map(|f| PromptFailure {
            test_id: &f.test_id,
            file: f.file.display().to_string(),
            failure_type: &f.failure_type,
            message: &f.message,
            line: f.line_number,
            traceback: tail_chars(&f.traceback, MAX_TRACEBACK_CHARS),
            source_snippet: f
                .source_snippet
                .as_deref()
                .map(|s| truncate(s, MAX_SNIPPET_CHARS)),
        })
        .collect();

    let listing = serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string());
    format!(
        "FAILING TESTS ({}):\n{}\n\nReturn suggestions for every test_id above.",
        failures.len(),
        listing
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_every_failure() {
        let failures = vec![
            Failure::new("t::a", "tests/a.py", "KeyError", "'x'").with_line(7),
            Failure::new("t::b", "tests/b.py", "TypeError", "bad operand"),
        ];
        let prompt = batch_fix_user_prompt(&failures);
        assert!(prompt.starts_with("FAILING TESTS (2):"));
        assert!(prompt.contains("\"test_id\": \"t::a\""));
        assert!(prompt.contains("\"line\": 7"));
        assert!(prompt.contains("\"test_id\": \"t::b\""));
        assert!(!prompt.contains("source_snippet"));
    }

    #[test]
    fn test_long_traceback_keeps_tail() {
        let traceback = format!("{}FINAL FRAME", "x".repeat(5000));
        let trimmed = tail_chars(&traceback, 100);
        assert!(trimmed.ends_with("FINAL FRAME"));
        assert_eq!(trimmed.chars().count(), 103);
    }
}
