//! Error types for sauceconnect
//!
//! The first three variants of the build taxonomy (`CapabilityMissing`,
//! `TunnelTimeout`, `RemoteCommandFailed`) fail the build step. Log fetch
//! problems are folded into degraded report entries by the report builder and
//! only surface as errors from the fetcher itself.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sauceconnect
#[derive(Error, Debug)]
pub enum Error {
    // === Build-fatal Errors ===
    #[error("Remote host is too old: it does not support {0}")]
    CapabilityMissing(String),

    #[error("Tunnel did not become ready within {0} seconds. The tunnel process may still be running - run 'sauceconnect stop'")]
    TunnelTimeout(u64),

    #[error("Remote command '{command}' failed with exit code {exit_code}: {stderr}")]
    RemoteCommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    // === Recoverable Errors ===
    #[error("Failed to fetch session log from {url}: {reason}")]
    LogFetchFailed { url: String, reason: String },

    // === State Machine Errors ===
    #[error("Invalid tunnel state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a remote command failure from an argv and its captured output
    pub fn remote_command_failed<S: AsRef<str>>(argv: &[S], exit_code: i32, stderr: &str) -> Self {
        Self::RemoteCommandFailed {
            command: argv.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(" "),
            exit_code,
            stderr: stderr.trim().to_string(),
        }
    }

    /// Create a log fetch failure
    pub fn log_fetch_failed(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::LogFetchFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid transition error
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether this error should fail the enclosing build step
    pub fn is_build_fatal(&self) -> bool {
        matches!(
            self,
            Error::CapabilityMissing(_) | Error::TunnelTimeout(_) | Error::RemoteCommandFailed { .. }
        )
    }

    /// Process exit code for this error
    ///
    /// A readiness timeout gets its own code so the supervisor can tell it
    /// apart from a broken readiness helper.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::TunnelTimeout(_) => crate::tunnel::readiness::READY_TIMEOUT_EXIT_CODE,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_fatal_taxonomy() {
        assert!(Error::CapabilityMissing("downloadFile".into()).is_build_fatal());
        assert!(Error::TunnelTimeout(300).is_build_fatal());
        assert!(Error::remote_command_failed(&["/bin/pwd"], 2, "boom").is_build_fatal());
        assert!(!Error::log_fetch_failed("https://x", "401").is_build_fatal());
        assert!(!Error::Internal("x".into()).is_build_fatal());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            Error::TunnelTimeout(300).exit_code(),
            crate::tunnel::readiness::READY_TIMEOUT_EXIT_CODE
        );
        assert_eq!(Error::Config("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_remote_command_failed_joins_argv() {
        let err = Error::remote_command_failed(&["a", "b c"], 1, "  oops\n");
        match err {
            Error::RemoteCommandFailed { command, stderr, .. } => {
                assert_eq!(command, "a b c");
                assert_eq!(stderr, "oops");
            }
            _ => panic!("Expected RemoteCommandFailed"),
        }
    }
}
