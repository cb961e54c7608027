//! Command lines for launching, checking, and stopping the tunnel
//!
//! The tunnel runs under start-stop-daemon, which backgrounds it, writes the
//! pidfile, and later performs the signal escalation on stop.

use std::fmt;
use std::path::Path;

use crate::common::config::RemoteConfig;
use crate::common::{Error, Properties, Result};
use crate::remote::RemoteCommand;

use super::readiness::ReadinessPolicy;

/// Account and routing arguments for one tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub username: String,
    pub api_key: String,
    /// Host to forward requests to
    pub host: Option<String>,
    pub domains: Vec<String>,
    pub ports: Vec<String>,
}

impl TunnelConfig {
    /// Create a config, rejecting empty credentials
    pub fn new(username: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let username = username.into();
        let api_key = api_key.into();
        if username.trim().is_empty() {
            return Err(Error::Config("Sauce Labs username is required".to_string()));
        }
        if api_key.trim().is_empty() {
            return Err(Error::Config("Sauce Labs API key is required".to_string()));
        }
        Ok(Self {
            username,
            api_key,
            host: None,
            domains: Vec::new(),
            ports: Vec::new(),
        })
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ports = ports.into_iter().map(Into::into).collect();
        self
    }

    /// Render `-<flag> <value>` pairs for the tunnel binary
    ///
    /// List fields repeat the flag once per element; absent fields are
    /// omitted entirely.
    pub fn tunnel_args(&self, properties: &Properties) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: &str| {
            args.push(format!("-{flag}"));
            args.push(properties.render(value));
        };

        push("u", &self.username);
        push("k", &self.api_key);
        if let Some(host) = &self.host {
            push("s", host);
        }
        for domain in &self.domains {
            push("d", domain);
        }
        for port in &self.ports {
            push("p", port);
        }
        args
    }
}

/// A signal named in a stop schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopSignal {
    Term,
    Quit,
    Int,
    Hup,
    Kill,
    Number(u32),
}

impl StopSignal {
    fn parse(token: &str) -> Option<Self> {
        let name = token.strip_prefix("SIG").unwrap_or(token);
        Some(match name {
            "TERM" => Self::Term,
            "QUIT" => Self::Quit,
            "INT" => Self::Int,
            "HUP" => Self::Hup,
            "KILL" => Self::Kill,
            _ => Self::Number(name.parse().ok()?),
        })
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Term => write!(f, "TERM"),
            Self::Quit => write!(f, "QUIT"),
            Self::Int => write!(f, "INT"),
            Self::Hup => write!(f, "HUP"),
            Self::Kill => write!(f, "KILL"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Send `signal`, then wait up to `timeout_secs` for the process to exit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopStage {
    pub signal: StopSignal,
    pub timeout_secs: u64,
}

/// Escalating stop policy, rendered as start-stop-daemon's `--retry` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSchedule {
    stages: Vec<StopStage>,
}

impl StopSchedule {
    /// Parse `SIGNAL/TIMEOUT/SIGNAL/TIMEOUT...`
    pub fn parse(schedule: &str) -> Result<Self> {
        let invalid = |why: &str| Error::Config(format!("Invalid stop schedule '{schedule}': {why}"));

        let tokens: Vec<&str> = schedule.trim().split('/').collect();
        if tokens.len() % 2 != 0 || tokens.iter().any(|t| t.is_empty()) {
            return Err(invalid("expected SIGNAL/TIMEOUT pairs"));
        }

        let mut stages = Vec::with_capacity(tokens.len() / 2);
        for pair in tokens.chunks(2) {
            let signal = StopSignal::parse(pair[0])
                .ok_or_else(|| invalid(&format!("unknown signal '{}'", pair[0])))?;
            let timeout_secs = pair[1]
                .parse()
                .map_err(|_| invalid(&format!("bad timeout '{}'", pair[1])))?;
            stages.push(StopStage {
                signal,
                timeout_secs,
            });
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[StopStage] {
        &self.stages
    }
}

impl Default for StopSchedule {
    fn default() -> Self {
        let stage = |signal| StopStage {
            signal,
            timeout_secs: 10,
        };
        Self {
            stages: vec![
                stage(StopSignal::Quit),
                stage(StopSignal::Quit),
                stage(StopSignal::Quit),
                stage(StopSignal::Kill),
            ],
        }
    }
}

impl fmt::Display for StopSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .stages
            .iter()
            .map(|s| format!("{}/{}", s.signal, s.timeout_secs))
            .collect();
        write!(f, "{}", parts.join("/"))
    }
}

fn remote_path(workdir: &Path, name: &str) -> String {
    workdir.join(name).display().to_string()
}

/// Command that backgrounds the tunnel under the process supervisor
pub fn launch_command(
    config: &TunnelConfig,
    properties: &Properties,
    remote: &RemoteConfig,
    workdir: &Path,
) -> RemoteCommand {
    let mut argv = vec![
        remote.daemon.clone(),
        "--background".to_string(),
        "--make-pidfile".to_string(),
        "--start".to_string(),
        "--quiet".to_string(),
        "--pidfile".to_string(),
        remote.pidfile.clone(),
        "--exec".to_string(),
        remote_path(workdir, &remote.tunnel_name),
        "--".to_string(),
    ];
    argv.extend(config.tunnel_args(properties));
    argv.extend([
        "--logfile".to_string(),
        remote_path(workdir, &remote.logfile),
        "--readyfile".to_string(),
        remote_path(workdir, &remote.readyfile),
    ]);
    RemoteCommand::new(argv)
}

/// Command that blocks until the ready marker appears or the deadline passes
pub fn check_command(remote: &RemoteConfig, workdir: &Path, policy: &ReadinessPolicy) -> RemoteCommand {
    RemoteCommand::new([
        remote_path(workdir, &remote.check_name),
        "wait-ready".to_string(),
        "--readyfile".to_string(),
        remote_path(workdir, &remote.readyfile),
        "--timeout-secs".to_string(),
        policy.timeout.as_secs().to_string(),
        "--interval-secs".to_string(),
        policy.poll_interval.as_secs().to_string(),
    ])
}

/// Command that stops the tunnel recorded in the pidfile
pub fn stop_command(remote: &RemoteConfig, schedule: &StopSchedule) -> RemoteCommand {
    RemoteCommand::new([
        remote.daemon.clone(),
        "--stop".to_string(),
        "--retry".to_string(),
        schedule.to_string(),
        "--pidfile".to_string(),
        remote.pidfile.clone(),
    ])
}

/// Command that prints the last `lines` lines of the tunnel log
pub fn log_tail_command(logfile: &Path, lines: usize) -> RemoteCommand {
    RemoteCommand::new([
        "tail".to_string(),
        "-n".to_string(),
        lines.to_string(),
        logfile.display().to_string(),
    ])
}
