use crate::failure::Failure;
use crate::suggest::{CodeChange, FixSuggestion};
use crate::util::truncate_str;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Confidence used when the model leaves it out
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Strip markdown code fences from a response
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// Extract a JSON fragment between matching delimiters
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (start <= end).then(|| &text[start..=end])
}

/// Try to fix common JSON issues from model responses
fn fix_json_issues(json: &str) -> String {
    json.replace(",]", "]")
        .replace(",}", "}")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

#[derive(Deserialize)]
struct BatchResponseJson {
    suggestions: Vec<SuggestionJson>,
}

#[derive(Deserialize)]
struct SuggestionJson {
    test_id: String,
    suggestion: String,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    code_changes: Vec<CodeChangeJson>,
}

#[derive(Deserialize)]
struct CodeChangeJson {
    file: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    original: Option<String>,
    replacement: String,
}

fn parse_entries(text: &str) -> Option<Vec<SuggestionJson>> {
    // Object form {"suggestions": [...]} first, then a bare array
    if let Some(obj) = extract_json_fragment(text, '{', '}') {
        if let Ok(parsed) = serde_json::from_str::<BatchResponseJson>(obj) {
            return Some(parsed.suggestions);
        }
    }
    let array = extract_json_fragment(text, '[', ']')?;
    serde_json::from_str::<Vec<SuggestionJson>>(array).ok()
}

/// Parse a batch response into suggestions keyed by failure identity.
///
/// Entries for test ids that were not in `chunk` are dropped.
pub fn parse_batch_response(
    response: &str,
    chunk: &[Failure],
) -> anyhow::Result<HashMap<String, Vec<FixSuggestion>>> {
    let clean = strip_markdown_fences(response);
    let entries = parse_entries(clean)
        .or_else(|| parse_entries(&fix_json_issues(clean)))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Suggestions could not be parsed. Response preview: {}",
                truncate_str(clean, 200)
            )
        })?;

    let by_id: HashMap<&str, &Failure> = chunk.iter().map(|f| (f.id(), f)).collect();
    let mut out: HashMap<String, Vec<FixSuggestion>> = HashMap::new();

    for entry in entries {
        let Some(failure) = by_id.get(entry.test_id.as_str()) else {
            debug!("Dropping suggestion for unknown test id {}", entry.test_id);
            continue;
        };
        if entry.suggestion.trim().is_empty() {
            continue;
        }

        let changes = entry
            .code_changes
            .into_iter()
            .map(|c| CodeChange {
                file: PathBuf::from(c.file),
                line: c.line,
                original: c.original,
                replacement: c.replacement,
            })
            .collect();

        let mut suggestion = FixSuggestion::new(
            (*failure).clone(),
            entry.suggestion.trim(),
            entry.confidence.unwrap_or(DEFAULT_CONFIDENCE),
        )
        .with_code_changes(changes);
        if let Some(explanation) = entry.explanation.filter(|e| !e.trim().is_empty()) {
            suggestion = suggestion.with_explanation(explanation);
        }

        out.entry(entry.test_id).or_default().push(suggestion);
    }

    Ok(out)
}
