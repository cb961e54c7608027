//! Traceback extraction from unittest/nose console output
//!
//! Failures are printed as blocks:
//!
//! ```text
//! ======================================================================
//! FAIL: test_login (tests.LoginTest)
//! ----------------------------------------------------------------------
//! Traceback (most recent call last):
//!   ...
//! AssertionError: ...
//!
//! ----------------------------------------------------------------------
//! Ran 3 tests in 0.100s
//! ```
//!
//! A dash rule only ends the output when the next line starts with `Ran `.
//! Anywhere else it is traceback content (assertion diffs print them), and
//! every dash rule is judged on its own lookahead, so runs of them are kept.

use super::types::TracebackMap;

const SEPARATOR_WIDTH: usize = 70;
const BLOCK_RULE: char = '=';
const SECTION_RULE: char = '-';
const LABEL_SEPARATOR: &str = ": ";
const RUN_SUMMARY: &str = "Ran ";

fn is_rule(line: &str, ch: char) -> bool {
    let line = line.trim_end_matches(['\n', '\r']);
    line.len() == SEPARATOR_WIDTH && line.chars().all(|c| c == ch)
}

/// `FAIL: test_x (mod.Case)` becomes `test_x (mod.Case)`
fn test_id(line: &str) -> String {
    let line = line.trim_end_matches(['\n', '\r']);
    match line.split_once(LABEL_SEPARATOR) {
        Some((_, id)) => id.to_string(),
        None => {
            tracing::debug!(line, "Traceback header without a label");
            line.to_string()
        }
    }
}

/// Map each failing test to its traceback
///
/// Later blocks for the same test replace earlier ones.
pub fn extract_tracebacks(console: &str) -> TracebackMap {
    let mut tracebacks = TracebackMap::new();
    let mut lines = console.split_inclusive('\n').peekable();

    if !lines.by_ref().any(|line| is_rule(line, BLOCK_RULE)) {
        return tracebacks;
    }

    while let Some(header) = lines.next() {
        let id = test_id(header);
        // The line under the header is always the section rule
        if !lines.next().is_some_and(|line| is_rule(line, SECTION_RULE)) {
            tracing::debug!(test = %id, "Traceback block without a section rule");
        }

        let mut body = String::new();
        let mut next_block = false;
        while let Some(line) = lines.next() {
            if is_rule(line, BLOCK_RULE) {
                next_block = true;
                break;
            }
            if is_rule(line, SECTION_RULE)
                && lines.peek().is_some_and(|next| next.starts_with(RUN_SUMMARY))
            {
                break;
            }
            body.push_str(line);
        }

        if tracebacks.insert(id.clone(), body).is_some() {
            tracing::debug!(test = %id, "Duplicate traceback replaced");
        }
        if !next_block {
            break;
        }
    }

    tracebacks
}
