//! Raw test-report extraction
//!
//! Pulls failure occurrences out of pytest-style console output. Three shapes
//! are recognized, in order of preference:
//! - short summary lines (`FAILED tests/test_a.py::test_x - KeyError: 'id'`)
//! - failure sections (`____ test_x ____` followed by `E   ...` lines)
//! - bare exception lines (`ValueError: bad input`) when neither is present
//!
//! Summary entries borrow traceback text from the matching section, so the
//! same failure is never reported twice.

use crate::failure::Failure;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Location used when a failure cannot be tied to a test
pub const UNKNOWN_LOCATION: &str = "<unknown>";

static RE_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:FAILED|ERROR)\s+(\S+)(?:\s+-\s+(.*))?$").expect("valid regex")
});
static RE_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_{3,}\s+(.+?)\s+_{3,}\s*$").expect("valid regex"));
static RE_BANNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^={3,}").expect("valid regex"));
static RE_E_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^E\s+(.*)$").expect("valid regex"));
static RE_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+\.py):(\d+):\s+([A-Za-z_][\w.]*)\s*$").expect("valid regex")
});
static RE_TYPED_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([A-Za-z_][\w.]*(?:Error|Exception|Failure|Failed|Exit|Interrupt|Warning|Timeout))(?:\s*:\s*(.*))?$",
    )
    .expect("valid regex")
});
static RE_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][\w.]*(?:Error|Exception))\s*:\s*(.+)$").expect("valid regex")
});

/// One failure occurrence found in a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    /// Test identity when known, otherwise `UNKNOWN_LOCATION`
    pub location: String,
    pub file: Option<PathBuf>,
    pub failure_type: String,
    pub message: String,
    pub traceback: String,
    pub line_number: Option<u32>,
}

impl ReportEntry {
    pub fn traceback_depth(&self) -> usize {
        self.traceback
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count()
    }

    pub fn into_failure(self) -> Failure {
        let file = self.file.unwrap_or_else(|| {
            if self.location.starts_with(UNKNOWN_LOCATION) {
                return PathBuf::from(UNKNOWN_LOCATION);
            }
            PathBuf::from(self.location.split("::").next().unwrap_or(UNKNOWN_LOCATION))
        });
        Failure {
            test_id: self.location,
            file,
            failure_type: self.failure_type,
            message: self.message,
            traceback: self.traceback,
            source_snippet: None,
            line_number: self.line_number,
        }
    }
}

#[derive(Debug, Default)]
struct Section {
    name: String,
    lines: Vec<String>,
    typed: Option<(String, String)>,
    first_e_line: Option<String>,
    location: Option<(PathBuf, u32, String)>,
}

impl Section {
    fn new(name: &str) -> Self {
        let name = name
            .trim_start_matches("ERROR at setup of ")
            .trim_start_matches("ERROR at teardown of ")
            .trim()
            .to_string();
        Self {
            name,
            ..Default::default()
        }
    }

    fn push_line(&mut self, line: &str) {
        if let Some(caps) = RE_E_LINE.captures(line) {
            let body = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if self.typed.is_none() {
                if let Some((failure_type, message)) = split_typed_message(body) {
                    self.typed = Some((failure_type, message));
                }
            }
            if self.first_e_line.is_none() && !body.is_empty() {
                self.first_e_line = Some(body.to_string());
            }
        } else if let Some(caps) = RE_LOCATION.captures(line.trim()) {
            let file = PathBuf::from(&caps[1]);
            let line_no = caps[2].parse().unwrap_or(0);
            self.location = Some((file, line_no, short_type(&caps[3]).to_string()));
        }
        self.lines.push(line.to_string());
    }

    fn failure_type_and_message(&self) -> (String, String) {
        if let Some((failure_type, message)) = &self.typed {
            return (failure_type.clone(), message.clone());
        }
        let message = self.first_e_line.clone().unwrap_or_default();
        let failure_type = match &self.location {
            Some((_, _, failure_type)) => failure_type.clone(),
            None => infer_type(&message).to_string(),
        };
        (failure_type, message)
    }

    fn traceback(&self) -> String {
        self.lines.join("\n").trim().to_string()
    }

    fn into_entry(self) -> ReportEntry {
        let (failure_type, message) = self.failure_type_and_message();
        let traceback = self.traceback();
        let (file, line_number, location) = match &self.location {
            Some((file, line, _)) => (
                Some(file.clone()),
                Some(*line),
                format!("{}::{}", file.display(), self.name.replace('.', "::")),
            ),
            None => (None, None, self.name.clone()),
        };
        ReportEntry {
            location,
            file,
            failure_type,
            message,
            traceback,
            line_number,
        }
    }
}

/// Split `Type: message` into its parts, keeping only the last segment of dotted types
fn split_typed_message(text: &str) -> Option<(String, String)> {
    let caps = RE_TYPED_MESSAGE.captures(text.trim())?;
    let failure_type = short_type(caps.get(1)?.as_str()).to_string();
    let message = caps
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    Some((failure_type, message))
}

fn short_type(failure_type: &str) -> &str {
    failure_type.rsplit('.').next().unwrap_or(failure_type)
}

fn infer_type(message: &str) -> &'static str {
    if message.trim_start().starts_with("assert") {
        "AssertionError"
    } else {
        "UnknownError"
    }
}

/// Key a summary test id the way pytest titles its failure sections
fn section_key(test_id: &str) -> String {
    match test_id.split_once("::") {
        Some((_, rest)) => rest.replace("::", "."),
        None => test_id.to_string(),
    }
}

fn parse_summary_line(line: &str) -> Option<ReportEntry> {
    let caps = RE_SUMMARY.captures(line.trim())?;
    let test_id = caps.get(1)?.as_str().to_string();
    let detail = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
    let (failure_type, message) = split_typed_message(detail)
        .unwrap_or_else(|| (infer_type(detail).to_string(), detail.to_string()));
    let file = test_id
        .split("::")
        .next()
        .filter(|f| f.ends_with(".py"))
        .map(PathBuf::from);

    Some(ReportEntry {
        location: test_id,
        file,
        failure_type,
        message,
        traceback: String::new(),
        line_number: None,
    })
}

fn parse_sections(raw: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;

    for line in raw.lines() {
        if let Some(caps) = RE_SECTION.captures(line) {
            if let Some(done) = current.take() {
                sections.push(done);
            }
            current = Some(Section::new(&caps[1]));
            continue;
        }
        if RE_BANNER.is_match(line) {
            if let Some(done) = current.take() {
                sections.push(done);
            }
            continue;
        }
        if let Some(section) = current.as_mut() {
            section.push_line(line);
        }
    }
    if let Some(done) = current {
        sections.push(done);
    }
    sections
}

/// Extract failure occurrences from raw runner output
pub fn extract_entries(raw: &str) -> Vec<ReportEntry> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    let sections = parse_sections(raw);
    let summaries: Vec<ReportEntry> = raw.lines().filter_map(parse_summary_line).collect();

    if !summaries.is_empty() {
        let mut by_name: HashMap<&str, &Section> = HashMap::new();
        for section in &sections {
            by_name.insert(section.name.as_str(), section);
        }
        return summaries
            .into_iter()
            .map(|mut entry| {
                if let Some(section) = by_name.get(section_key(&entry.location).as_str()) {
                    entry.traceback = section.traceback();
                    if let Some((_, line, _)) = &section.location {
                        entry.line_number = Some(*line);
                    }
                    if entry.message.is_empty() {
                        let (failure_type, message) = section.failure_type_and_message();
                        entry.failure_type = failure_type;
                        entry.message = message;
                    }
                }
                entry
            })
            .collect();
    }

    if !sections.is_empty() {
        return sections.into_iter().map(Section::into_entry).collect();
    }

    raw.lines()
        .filter_map(|line| {
            let caps = RE_BARE.captures(line)?;
            Some(ReportEntry {
                location: UNKNOWN_LOCATION.to_string(),
                file: None,
                failure_type: short_type(&caps[1]).to_string(),
                message: caps[2].trim().to_string(),
                traceback: String::new(),
                line_number: None,
            })
        })
        .collect()
}

/// Convert a raw report straight into pipeline failures.
///
/// Every failure gets a distinct id: unattributed entries are numbered
/// `<unknown>#1`, `<unknown>#2`, ... and a test reported more than once (a
/// failure plus a teardown error, say) is suffixed `#2`, `#3` from its second
/// entry on. `extract_entries` keeps the shared location so identical
/// occurrences still merge during analysis.
pub fn failures_from_report(raw: &str) -> Vec<Failure> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    extract_entries(raw)
        .into_iter()
        .map(|mut entry| {
            let count = seen.entry(entry.location.clone()).or_insert(0);
            *count += 1;
            if entry.location == UNKNOWN_LOCATION || *count > 1 {
                entry.location = format!("{}#{}", entry.location, count);
            }
            entry.into_failure()
        })
        .collect()
}
