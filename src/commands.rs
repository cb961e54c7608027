//! CLI command definitions
//!
//! Defines the clap commands for the sauceconnect CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the tunnel and wait until it is ready
    Start {
        #[command(flatten)]
        credentials: CredentialArgs,

        /// Host to forward tunnel requests to
        #[arg(long)]
        host: Option<String>,

        /// Domain to route through the tunnel
        /// Can be specified multiple times: --domain a.example --domain b.example
        #[arg(long = "domain", short = 'd')]
        domains: Vec<String>,

        /// Port to tunnel (can be specified multiple times)
        #[arg(long = "port", short = 'p')]
        ports: Vec<String>,

        /// Build property used to expand %(name)s placeholders (name=value)
        #[arg(long = "property", short = 'P')]
        properties: Vec<String>,

        /// Tunnel client to push to the build area
        #[arg(long)]
        tunnel_binary: Option<PathBuf>,

        /// Readiness helper to push (default: this executable)
        #[arg(long)]
        check_utility: Option<PathBuf>,

        /// Build area root
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Stop a tunnel started by an earlier `start`
    Stop {
        /// Build area root
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Show whether the tunnel in the build area is alive and ready
    Status {
        /// Build area root
        #[arg(long)]
        root: Option<PathBuf>,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Correlate Sauce Labs session logs with console tracebacks
    Report {
        #[command(flatten)]
        credentials: CredentialArgs,

        /// Test summary file, one `name|session|error` line per test
        #[arg(long)]
        summary: PathBuf,

        /// Captured test runner console output
        #[arg(long)]
        console: Option<PathBuf>,

        /// Write the JSON report here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Block until the ready marker appears (used on the build slave)
    #[command(hide = true)]
    WaitReady {
        /// Marker file written by the tunnel once it is usable
        #[arg(long)]
        readyfile: PathBuf,

        /// Give up after this many seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,

        /// Seconds between checks
        #[arg(long, default_value = "10")]
        interval_secs: u64,
    },
}

/// Sauce Labs account, overriding the `[tunnel]` config section
#[derive(Args, Debug, Clone, Default)]
pub struct CredentialArgs {
    /// Sauce Labs username
    #[arg(long, short = 'u', env = "SAUCE_USERNAME")]
    pub username: Option<String>,

    /// Sauce Labs API key
    #[arg(long, short = 'k', env = "SAUCE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}
