//! Test report correlation
//!
//! Combines the per-job Selenium logs from Sauce Labs with the test
//! runner's console tracebacks. Rendering the result is left to the caller.

pub mod builder;
pub mod fetch;
pub mod session_log;
pub mod traceback;
pub mod types;
pub mod urls;

pub use builder::ReportBuilder;
pub use fetch::{basic_auth_header, HttpLogFetcher, LogFetcher};
pub use session_log::SessionLogParser;
pub use traceback::extract_tracebacks;
pub use types::{parse_summary, CommandRecord, SummaryEntry, TestResult, TracebackMap};
pub use urls::UrlTemplates;
