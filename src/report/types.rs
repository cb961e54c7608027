//! Report data handed to the summary renderer

use serde::Serialize;
use std::collections::HashMap;

/// Test identifier to traceback text
pub type TracebackMap = HashMap<String, String>;

/// One remote-control action and its outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub command: String,
    /// `OK` for successful commands, the raw result otherwise; empty when
    /// the log never recorded one
    pub result: String,
    pub return_value: Option<String>,
    /// Only set for `captureScreenshot` commands
    #[serde(rename = "screenshotURL")]
    pub screenshot_url: Option<String>,
}

/// Everything known about one executed test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Position in the summary input
    pub id: usize,
    pub test_name: String,
    pub session_id: String,
    pub reported_error: String,
    pub commands: Vec<CommandRecord>,
    #[serde(rename = "lastScreenshotURL")]
    pub last_screenshot_url: String,
    #[serde(rename = "videoURL")]
    pub video_url: String,
    #[serde(rename = "seleniumLogURL")]
    pub selenium_log_url: String,
    pub traceback: Option<String>,
    /// Why the session log could not be downloaded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_fetch_error: Option<String>,
}

/// One `testName|sessionId|error` line of the summary input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEntry {
    pub test_name: String,
    pub session_id: String,
    pub error: String,
}

impl SummaryEntry {
    /// Parse one summary line; the error field may itself contain `|`
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.splitn(3, '|');
        let test_name = fields.next()?;
        let session_id = fields.next()?;
        let error = fields.next()?;
        Some(Self {
            test_name: test_name.to_string(),
            session_id: session_id.trim().to_string(),
            error: error.to_string(),
        })
    }
}

/// Parse the summary input, skipping blank and malformed lines
///
/// Malformed lines don't consume a position, so ids stay dense.
pub fn parse_summary(text: &str) -> Vec<SummaryEntry> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let entry = SummaryEntry::parse(line);
            if entry.is_none() {
                tracing::warn!(line, "Skipping malformed summary line");
            }
            entry
        })
        .collect()
}
