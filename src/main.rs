//! sauceconnect - Sauce Labs tunnel build steps
//!
//! Brings a Sauce Labs tunnel up before browser tests and down afterwards,
//! then builds a per-test report from the Sauce Labs session logs.

use clap::Parser;
use sauceconnect::common::logging;
use sauceconnect::{cli, commands};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sauceconnect", about = "Sauce Labs tunnel build steps")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() {
    logging::init_cli();

    let cli = Cli::parse();

    if let Err(e) = cli::dispatch(cli.command, cli.config.as_deref()).await {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}
