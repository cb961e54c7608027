//! CLI command handling
//!
//! Runs the build steps against the build area and formats output.

use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::commands::{Commands, CredentialArgs};
use crate::common::config::{Config, TunnelSection};
use crate::common::{Error, Properties, Result};
use crate::remote::{LocalExecutor, RemoteExecutor};
use crate::report::{
    extract_tracebacks, parse_summary, HttpLogFetcher, ReportBuilder, TestResult, TracebackMap,
    UrlTemplates,
};
use crate::tunnel::{
    wait_for_marker, ReadinessPolicy, SupervisorSettings, TunnelConfig, TunnelSupervisor,
};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config_path: Option<&Path>) -> Result<()> {
    // The readiness helper runs on the build slave, which has no config file
    let mut config = match command {
        Commands::WaitReady { .. } => Config::default(),
        _ => Config::load(config_path)?,
    };

    match command {
        Commands::Start {
            credentials,
            host,
            domains,
            ports,
            properties,
            tunnel_binary,
            check_utility,
            root,
        } => {
            if tunnel_binary.is_some() {
                config.artifacts.tunnel_binary = tunnel_binary;
            }
            if check_utility.is_some() {
                config.artifacts.check_utility = check_utility;
            }
            if let Some(root) = root {
                config.remote.root = root;
            }

            let mut tunnel = tunnel_config(credentials, &config.tunnel)?;
            if let Some(host) = host {
                tunnel = tunnel.with_host(host);
            }
            if !domains.is_empty() {
                tunnel.domains = domains;
            }
            if !ports.is_empty() {
                tunnel.ports = ports;
            }
            let properties = Properties::from_assignments(&properties)?;

            let settings = SupervisorSettings::from_config(&config)?;
            let executor = LocalExecutor::new(&config.remote.root)?;
            let mut supervisor = TunnelSupervisor::new(executor, tunnel, properties, settings);
            start_tunnel(&mut supervisor).await
        }

        Commands::Stop { root } => {
            if let Some(root) = root {
                config.remote.root = root;
            }
            let settings = SupervisorSettings::from_config(&config)?;
            let executor = LocalExecutor::new(&config.remote.root)?;
            let workdir = executor.root().to_path_buf();
            let mut supervisor = TunnelSupervisor::adopt(executor, settings, Some(workdir));

            supervisor.stop().await?;
            println!("{} Tunnel stopped", "✓".green());
            Ok(())
        }

        Commands::Status { root, json } => {
            let root = root.unwrap_or_else(|| config.remote.root.clone());
            let status = tunnel_status(&root, &config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            Ok(())
        }

        Commands::Report {
            credentials,
            summary,
            console,
            output,
        } => {
            let results = build_report(&config, credentials, &summary, console.as_deref()).await?;
            let json = serde_json::to_string_pretty(&results)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json + "\n")?;
                    println!("Report written to {}", path.display());
                }
                None => println!("{}", json),
            }
            print_report_summary(&results);
            Ok(())
        }

        Commands::WaitReady {
            readyfile,
            timeout_secs,
            interval_secs,
        } => wait_ready(&readyfile, timeout_secs, interval_secs).await,
    }
}

/// Readiness helper run on the build slave
///
/// A timeout surfaces as `TunnelTimeout`, which `main` turns into the
/// readiness timeout exit code.
async fn wait_ready(readyfile: &Path, timeout_secs: u64, interval_secs: u64) -> Result<()> {
    let policy = ReadinessPolicy {
        timeout: Duration::from_secs(timeout_secs),
        poll_interval: Duration::from_secs(interval_secs),
    };
    wait_for_marker(readyfile, &policy).await.map(|_| ())
}

/// Merge command-line credentials over the `[tunnel]` section
fn tunnel_config(credentials: CredentialArgs, section: &TunnelSection) -> Result<TunnelConfig> {
    let username = credentials
        .username
        .or_else(|| section.username.clone())
        .ok_or_else(|| {
            Error::Config("Sauce Labs username not set (--username or [tunnel] username)".to_string())
        })?;
    let api_key = credentials
        .api_key
        .or_else(|| section.api_key.clone())
        .ok_or_else(|| {
            Error::Config("Sauce Labs API key not set (--api-key or [tunnel] api_key)".to_string())
        })?;

    let mut tunnel = TunnelConfig::new(username, api_key)?
        .with_domains(section.domains.iter().cloned())
        .with_ports(section.ports.iter().cloned());
    if let Some(host) = &section.host {
        tunnel = tunnel.with_host(host.clone());
    }
    Ok(tunnel)
}

/// Start the tunnel, tearing it down again if start fails or is interrupted
async fn start_tunnel<E: RemoteExecutor>(supervisor: &mut TunnelSupervisor<E>) -> Result<()> {
    let outcome = tokio::select! {
        result = supervisor.start() => result,
        _ = abort_signal() => {
            tracing::info!("Build aborted, tearing the tunnel down");
            Err(Error::Internal("Interrupted while starting the tunnel".to_string()))
        }
    };

    let error = match outcome {
        Ok(()) => {
            let workdir = supervisor
                .session()
                .working_directory
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            println!("{} Tunnel running in {}", "✓".green(), workdir.dimmed());
            return Ok(());
        }
        Err(e) => e,
    };

    println!("{} Tunnel start failed ({})", "✗".red(), supervisor.state());
    if let Some(tail) = &supervisor.session().log_tail {
        println!("  Tunnel log:");
        for line in tail.lines() {
            println!("    {}", line.dimmed());
        }
    }

    // Nothing was launched unless the build directory was resolved
    if supervisor.session().working_directory.is_some() {
        match supervisor.stop().await {
            Ok(()) => println!("  Tunnel stopped after failed start"),
            Err(stop_error) => {
                tracing::warn!(error = %stop_error, "Teardown after failed start did not succeed")
            }
        }
    }
    Err(error)
}

/// Resolves when the build is aborted (SIGINT, or SIGTERM on unix)
async fn abort_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => return,
                    _ = tokio::signal::ctrl_c() => return,
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}

/// Tunnel status as reported by `status`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TunnelStatus {
    root: PathBuf,
    pid: Option<u32>,
    alive: bool,
    ready: bool,
}

fn tunnel_status(root: &Path, config: &Config) -> Result<TunnelStatus> {
    let pid_file = root.join(&config.remote.pidfile);
    let pid = match std::fs::read_to_string(&pid_file) {
        Ok(content) => Some(content.trim().parse::<u32>().map_err(|e| {
            Error::Config(format!(
                "Invalid PID in file '{}': {}",
                pid_file.display(),
                e
            ))
        })?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(Error::FileRead {
                path: pid_file.display().to_string(),
                error: e.to_string(),
            })
        }
    };

    Ok(TunnelStatus {
        root: root.to_path_buf(),
        pid,
        alive: pid.is_some_and(process_alive),
        ready: root.join(&config.remote.readyfile).exists(),
    })
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // kill(0) or a negative pid would address a process group
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 tests process existence without side effects
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

fn print_status(status: &TunnelStatus) {
    match status.pid {
        None => println!("No tunnel in {}", status.root.display()),
        Some(pid) => {
            let state = match (status.alive, status.ready) {
                (true, true) => "running".green(),
                (true, false) => "starting".yellow(),
                (false, _) => "not running".red(),
            };
            println!("Tunnel {} (pid {})", state, pid);
            println!("  Build area: {}", status.root.display().to_string().dimmed());
        }
    }
}

async fn build_report(
    config: &Config,
    credentials: CredentialArgs,
    summary: &Path,
    console: Option<&Path>,
) -> Result<Vec<TestResult>> {
    let tunnel = tunnel_config(credentials, &config.tunnel)?;
    let entries = parse_summary(&read_input(summary)?);
    let tracebacks = match console {
        Some(path) => extract_tracebacks(&read_input(path)?),
        None => TracebackMap::new(),
    };

    let timeout = Duration::from_secs(config.report.fetch_timeout_secs);
    let fetcher = HttpLogFetcher::new(&tunnel.username, &tunnel.api_key, timeout)?;
    let urls = UrlTemplates::new(&tunnel.username, &tunnel.api_key, &config.report);
    let builder = ReportBuilder::new(fetcher, urls, timeout)
        .with_max_concurrent_fetches(config.report.max_concurrent_fetches);

    Ok(builder.build(&entries, &tracebacks).await)
}

fn read_input(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })
}

fn print_report_summary(results: &[TestResult]) {
    let failed = results.iter().filter(|r| !r.reported_error.is_empty()).count();
    let degraded = results.iter().filter(|r| r.log_fetch_error.is_some()).count();

    let line = format!("{} tests, {} failed", results.len(), failed);
    if failed == 0 {
        eprintln!("{} {}", "✓".green(), line);
    } else {
        eprintln!("{} {}", "✗".red(), line);
    }
    if degraded > 0 {
        eprintln!(
            "  {} session logs could not be fetched",
            degraded.to_string().yellow()
        );
    }
}
