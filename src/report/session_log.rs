//! Selenium RC session log parsing
//!
//! Sauce Labs serves a `selenium-server.log` per job. Each physical line
//! starts with a fixed-width timestamp/level prefix:
//!
//! ```text
//! 17:08:04.248 INFO - Command request: click[//a[@id='login'], ] on session f53271cf
//! 17:08:04.670 INFO - Got result: OK on session f53271cf
//! 17:08:04.280 INFO - Command request: captureScreenshot[shot_35.png, ] on session f53271cf
//! ```
//!
//! The log is diagnostic text rather than a protocol, so parsing is
//! best-effort: anything that doesn't fit yields partial records.

use super::types::CommandRecord;

/// Width of the timestamp/level prefix on every line
const PREFIX_WIDTH: usize = 20;

const COMMAND_MARKER: &str = "Command request:";
const RESULT_MARKER: &str = "Got result:";
const SESSION_MARKER: &str = " on session ";
const SCREENSHOT_COMMAND: &str = "captureScreenshot";
const SHOT_START: &str = "[shot_";
const SHOT_END: &str = ".png, ] on session ";
const OK_WITH_VALUE: &str = "OK,";
const SCREENSHOT_SUFFIX: &str = "screenshot.png";

/// Parses one session log into command records
#[derive(Debug, Clone)]
pub struct SessionLogParser {
    /// Authenticated results URL screenshots are served under
    screenshot_base: String,
}

impl SessionLogParser {
    pub fn new(screenshot_base: impl Into<String>) -> Self {
        Self {
            screenshot_base: screenshot_base.into(),
        }
    }

    /// Pair every command request with the result that follows it
    ///
    /// A command whose result never shows up (end of log, or another command
    /// request first) gets an empty result.
    pub fn parse(&self, log: &str) -> Vec<CommandRecord> {
        let mut lines = log.lines().map(strip_prefix).peekable();
        let mut records = Vec::new();

        while let Some(line) = lines.next() {
            let Some(command) = command_token(line) else {
                continue;
            };

            let screenshot_url = if command.starts_with(SCREENSHOT_COMMAND) {
                self.screenshot_url(line)
            } else {
                None
            };

            let mut outcome = None;
            while let Some(next) = lines.next_if(|l| !l.starts_with(COMMAND_MARKER)) {
                if let Some(parsed) = result_token(next) {
                    outcome = Some(parsed);
                    break;
                }
            }

            let (result, return_value) = outcome.unwrap_or_else(|| {
                tracing::debug!(command, "Command request without a result");
                (String::new(), None)
            });

            records.push(CommandRecord {
                command: command.to_string(),
                result,
                return_value,
                screenshot_url,
            });
        }

        records
    }

    fn screenshot_url(&self, line: &str) -> Option<String> {
        let start = line.find(SHOT_START)? + SHOT_START.len();
        let end = start + line[start..].find(SHOT_END)?;
        let number = &line[start..end];
        if number.is_empty() {
            tracing::debug!(line, "Screenshot command without a shot number");
            return None;
        }
        Some(format!(
            "{}{:0>4}{}",
            self.screenshot_base, number, SCREENSHOT_SUFFIX
        ))
    }
}

/// Drop the timestamp/level prefix
fn strip_prefix(line: &str) -> &str {
    let line = line.trim_end_matches('\r');
    match line.char_indices().nth(PREFIX_WIDTH) {
        Some((idx, _)) => &line[idx..],
        None => "",
    }
}

/// Text between `marker` and the trailing session marker
fn between_markers<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(marker)?;
    let end = rest.rfind(SESSION_MARKER).unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn command_token(line: &str) -> Option<&str> {
    between_markers(line, COMMAND_MARKER)
}

fn result_token(line: &str) -> Option<(String, Option<String>)> {
    let result = between_markers(line, RESULT_MARKER)?;
    Some(match result.strip_prefix(OK_WITH_VALUE) {
        Some(value) => ("OK".to_string(), Some(value.trim().to_string())),
        None => (result.to_string(), None),
    })
}
