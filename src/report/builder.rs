//! Joins session logs and tracebacks into per-test results

use futures_util::stream::{self, StreamExt};
use std::time::Duration;

use crate::common::Error;

use super::fetch::LogFetcher;
use super::session_log::SessionLogParser;
use super::types::{SummaryEntry, TestResult, TracebackMap};
use super::urls::UrlTemplates;

/// Builds the ordered report for one test run
pub struct ReportBuilder<F> {
    fetcher: F,
    urls: UrlTemplates,
    fetch_timeout: Duration,
    max_concurrent_fetches: usize,
}

impl<F: LogFetcher> ReportBuilder<F> {
    pub fn new(fetcher: F, urls: UrlTemplates, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            urls,
            fetch_timeout,
            max_concurrent_fetches: 8,
        }
    }

    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }

    /// Build one result per summary entry, in input order
    ///
    /// Session logs are fetched concurrently. A failed fetch degrades that
    /// entry only. Tracebacks attach on exact test name match.
    pub async fn build(&self, entries: &[SummaryEntry], tracebacks: &TracebackMap) -> Vec<TestResult> {
        let mut results: Vec<TestResult> = stream::iter(entries.iter().enumerate())
            .map(|(id, entry)| self.build_entry(id, entry))
            .buffered(self.max_concurrent_fetches)
            .collect()
            .await;

        for result in &mut results {
            result.traceback = tracebacks.get(&result.test_name).cloned();
        }

        let degraded = results.iter().filter(|r| r.log_fetch_error.is_some()).count();
        tracing::info!(
            tests = results.len(),
            tracebacks = results.iter().filter(|r| r.traceback.is_some()).count(),
            degraded,
            "Report built"
        );
        results
    }

    async fn build_entry(&self, id: usize, entry: &SummaryEntry) -> TestResult {
        let session = entry.session_id.as_str();
        let url = self.urls.log_fetch_url(session);

        let fetched = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(&url)).await {
            Ok(result) => result,
            Err(_) => Err(Error::log_fetch_failed(
                &url,
                format!("timed out after {} seconds", self.fetch_timeout.as_secs()),
            )),
        };

        let (commands, log_fetch_error) = match fetched {
            Ok(log) => {
                let parser = SessionLogParser::new(self.urls.authed_results_base(session));
                (parser.parse(&log), None)
            }
            Err(e) => {
                tracing::warn!(test = %entry.test_name, session, error = %e, "Session log unavailable");
                (Vec::new(), Some(e.to_string()))
            }
        };

        let last_screenshot_url = commands
            .iter()
            .rev()
            .find_map(|c| c.screenshot_url.clone())
            .unwrap_or_default();

        TestResult {
            id,
            test_name: entry.test_name.clone(),
            session_id: entry.session_id.clone(),
            reported_error: entry.error.clone(),
            commands,
            last_screenshot_url,
            video_url: self.urls.video_url(session),
            selenium_log_url: self.urls.selenium_log_url(session),
            traceback: None,
            log_fetch_error,
        }
    }
}
