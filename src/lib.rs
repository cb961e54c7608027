//! Sauce Labs tunnel build steps
//!
//! Starts and stops a Sauce Labs tunnel on a build slave around a browser
//! test run, and correlates the resulting session logs with test failures.

pub mod cli;
pub mod commands;
pub mod common;
pub mod remote;
pub mod report;
pub mod tunnel;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use tunnel::{TunnelState, TunnelSupervisor};
