//! Tunnel lifecycle state machine
//!
//! Start pushes the support files, resolves the absolute build directory,
//! launches the tunnel under the process supervisor, and then blocks on the
//! remote readiness helper. Stop hands the whole signal escalation to the
//! process supervisor in a single invocation.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::common::config::{Config, RemoteConfig};
use crate::common::{Error, Properties, Result};
use crate::remote::{Capability, RemoteCommand, RemoteExecutor};

use super::command::{
    check_command, launch_command, log_tail_command, stop_command, StopSchedule, TunnelConfig,
};
use super::readiness::{ReadinessPolicy, READY_TIMEOUT_EXIT_CODE};

/// Permission bits for uploaded support files
const EXECUTABLE_MODE: u32 = 0o755;

/// Tunnel log lines captured when start fails
const LOG_TAIL_LINES: usize = 50;

/// Remote features start depends on
const REQUIRED_CAPABILITIES: [Capability; 2] = [Capability::DownloadFile, Capability::Shell];

/// Tunnel session state
///
/// Variants are declared in lifecycle order; a session only ever moves
/// forward through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TunnelState {
    /// Nothing launched yet
    Pending,
    /// Uploading support files and launching
    Starting,
    /// Tunnel launched, waiting for the ready marker
    AwaitingReady,
    /// Tunnel is usable
    Running,
    /// Stop escalation in progress
    Stopping,
    /// Tunnel process is gone
    Stopped,
    /// Start or stop failed
    Failed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Starting => write!(f, "starting"),
            Self::AwaitingReady => write!(f, "awaiting-ready"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Local support files pushed to the build area before launch
#[derive(Debug, Clone)]
pub struct SupportArtifacts {
    pub tunnel_binary: PathBuf,
    pub check_utility: PathBuf,
}

/// Everything the supervisor needs besides the tunnel arguments
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub remote: RemoteConfig,
    /// Only needed to start; a stop-only supervisor runs without them
    pub artifacts: Option<SupportArtifacts>,
    pub readiness: ReadinessPolicy,
    pub stop_schedule: StopSchedule,
}

impl SupervisorSettings {
    /// Build settings from configuration
    ///
    /// The readiness helper defaults to the running executable, which
    /// provides the `wait-ready` subcommand. Without a tunnel binary the
    /// settings can stop a tunnel but not start one.
    pub fn from_config(config: &Config) -> Result<Self> {
        let artifacts = match &config.artifacts.tunnel_binary {
            Some(tunnel_binary) => {
                let check_utility = match &config.artifacts.check_utility {
                    Some(path) => path.clone(),
                    None => std::env::current_exe().map_err(|e| {
                        Error::Internal(format!("Failed to get current executable path: {}", e))
                    })?,
                };
                Some(SupportArtifacts {
                    tunnel_binary: tunnel_binary.clone(),
                    check_utility,
                })
            }
            None => None,
        };

        Ok(Self {
            remote: config.remote.clone(),
            artifacts,
            readiness: ReadinessPolicy::from(&config.readiness),
            stop_schedule: StopSchedule::parse(&config.stop.schedule)?,
        })
    }
}

/// One tunnel lifecycle
#[derive(Debug, Clone)]
pub struct TunnelSession {
    /// Tunnel arguments; absent for a session adopted only to be stopped
    pub config: Option<TunnelConfig>,
    /// Absolute build directory on the remote host, known once resolved
    pub working_directory: Option<PathBuf>,
    pub ready_file_path: Option<PathBuf>,
    pub pid_file_path: Option<PathBuf>,
    pub log_file_path: Option<PathBuf>,
    /// Last lines of the tunnel log, captured when start fails
    pub log_tail: Option<String>,
    state: TunnelState,
}

impl TunnelSession {
    fn new(config: Option<TunnelConfig>) -> Self {
        Self {
            config,
            working_directory: None,
            ready_file_path: None,
            pid_file_path: None,
            log_file_path: None,
            log_tail: None,
            state: TunnelState::Pending,
        }
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    fn set_working_directory(&mut self, workdir: &Path, remote: &RemoteConfig) {
        self.working_directory = Some(workdir.to_path_buf());
        self.ready_file_path = Some(workdir.join(&remote.readyfile));
        self.pid_file_path = Some(workdir.join(&remote.pidfile));
        self.log_file_path = Some(workdir.join(&remote.logfile));
    }

    fn transition(&mut self, next: TunnelState) -> Result<()> {
        if next <= self.state {
            return Err(Error::invalid_transition(self.state, next));
        }
        tracing::debug!(from = %self.state, to = %next, "Tunnel state transition");
        self.state = next;
        Ok(())
    }
}

/// Owns one tunnel session on one remote host
pub struct TunnelSupervisor<E> {
    executor: E,
    properties: Properties,
    settings: SupervisorSettings,
    session: TunnelSession,
}

impl<E: RemoteExecutor> TunnelSupervisor<E> {
    pub fn new(
        executor: E,
        config: TunnelConfig,
        properties: Properties,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            executor,
            properties,
            settings,
            session: TunnelSession::new(Some(config)),
        }
    }

    /// Take over a tunnel started by an earlier build step so it can be stopped
    ///
    /// Stopping only needs the pidfile, so no credentials are involved.
    pub fn adopt(executor: E, settings: SupervisorSettings, working_directory: Option<PathBuf>) -> Self {
        let mut session = TunnelSession::new(None);
        if let Some(workdir) = working_directory {
            session.set_working_directory(&workdir, &settings.remote);
        }
        session.state = TunnelState::Running;
        Self {
            executor,
            properties: Properties::new(),
            settings,
            session,
        }
    }

    pub fn session(&self) -> &TunnelSession {
        &self.session
    }

    pub fn state(&self) -> TunnelState {
        self.session.state
    }

    /// Bring the tunnel up and wait until it is ready
    ///
    /// On any failure the session ends in `Failed`. After a `TunnelTimeout`
    /// the tunnel process may still be alive, so callers must still `stop`.
    #[tracing::instrument(
        skip(self),
        fields(user = self.session.config.as_ref().map(|c| c.username.as_str()))
    )]
    pub async fn start(&mut self) -> Result<()> {
        if self.session.state != TunnelState::Pending {
            return Err(Error::invalid_transition(
                self.session.state,
                TunnelState::Starting,
            ));
        }

        // Checked before touching the remote host at all
        if self.settings.artifacts.is_none() {
            self.session.transition(TunnelState::Failed)?;
            return Err(Error::Config(
                "artifacts.tunnel_binary must point at the tunnel client".to_string(),
            ));
        }
        if let Some(missing) = REQUIRED_CAPABILITIES
            .into_iter()
            .find(|c| !self.executor.supports(*c))
        {
            self.session.transition(TunnelState::Failed)?;
            return Err(Error::CapabilityMissing(missing.to_string()));
        }

        match self.start_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, state = %self.session.state, "Tunnel start failed");
                self.capture_log_tail().await;
                self.session.transition(TunnelState::Failed)?;
                Err(e)
            }
        }
    }

    /// Keep the end of the tunnel log for diagnosing a failed start
    ///
    /// Only attempted once the build directory is known. A missing or
    /// unreadable log is not an error.
    async fn capture_log_tail(&mut self) {
        let Some(log_file) = &self.session.log_file_path else {
            return;
        };
        let tail = log_tail_command(log_file, LOG_TAIL_LINES);
        match self.executor.run(&tail).await {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
                tracing::warn!(
                    logfile = %log_file.display(),
                    "Tunnel log before failure:\n{}",
                    output.stdout.trim_end()
                );
                self.session.log_tail = Some(output.stdout);
            }
            Ok(output) => {
                tracing::debug!(exit_code = output.exit_code, "No tunnel log to show");
            }
            Err(e) => tracing::debug!(error = %e, "Failed to read tunnel log"),
        }
    }

    async fn start_inner(&mut self) -> Result<()> {
        self.session.transition(TunnelState::Starting)?;

        let remote = &self.settings.remote;
        let artifacts = self
            .settings
            .artifacts
            .as_ref()
            .ok_or_else(|| Error::Internal("Support artifacts not configured".to_string()))?;
        self.executor
            .upload_file(&artifacts.tunnel_binary, &remote.tunnel_name, EXECUTABLE_MODE)
            .await?;
        self.executor
            .upload_file(&artifacts.check_utility, &remote.check_name, EXECUTABLE_MODE)
            .await?;

        // start-stop-daemon needs an absolute --exec path
        let workdir = self.resolve_workdir().await?;
        self.session.set_working_directory(&workdir, &self.settings.remote);

        let config = self
            .session
            .config
            .as_ref()
            .ok_or_else(|| Error::Internal("Adopted session cannot be started".to_string()))?;
        let launch = launch_command(
            config,
            &self.properties,
            &self.settings.remote,
            &workdir,
        );
        tracing::info!(workdir = %workdir.display(), "Launching tunnel");
        self.executor.run(&launch).await?.check(&launch)?;

        self.session.transition(TunnelState::AwaitingReady)?;
        let check = check_command(&self.settings.remote, &workdir, &self.settings.readiness);
        let output = self.executor.run(&check).await?;
        match output.exit_code {
            0 => {
                self.session.transition(TunnelState::Running)?;
                tracing::info!("Tunnel running");
                Ok(())
            }
            READY_TIMEOUT_EXIT_CODE => Err(Error::TunnelTimeout(
                self.settings.readiness.timeout.as_secs(),
            )),
            _ => output.check(&check).map(|_| ()),
        }
    }

    async fn resolve_workdir(&self) -> Result<PathBuf> {
        let pwd = RemoteCommand::new(["/bin/pwd"]);
        let output = self.executor.run(&pwd).await?.check(&pwd)?;
        let workdir = output.stdout.trim();
        if workdir.is_empty() {
            return Err(Error::Internal(
                "Remote pwd returned an empty path".to_string(),
            ));
        }
        Ok(PathBuf::from(workdir))
    }

    /// Stop the tunnel with the configured signal escalation
    ///
    /// The escalation runs inside one process supervisor invocation; a
    /// non-zero exit is reported as `RemoteCommandFailed` without retrying.
    /// Stopping a `Failed` session is best-effort teardown and leaves the
    /// state at `Failed`.
    #[tracing::instrument(skip(self), fields(state = %self.session.state))]
    pub async fn stop(&mut self) -> Result<()> {
        let teardown_only = match self.session.state {
            TunnelState::Pending | TunnelState::Stopped => {
                return Err(Error::invalid_transition(
                    self.session.state,
                    TunnelState::Stopping,
                ));
            }
            TunnelState::Failed => true,
            TunnelState::Stopping => false,
            _ => {
                self.session.transition(TunnelState::Stopping)?;
                false
            }
        };

        let stop = stop_command(&self.settings.remote, &self.settings.stop_schedule);
        tracing::info!(schedule = %self.settings.stop_schedule, "Stopping tunnel");
        let result = match self.executor.run(&stop).await {
            Ok(output) => output.check(&stop).map(|_| ()),
            Err(e) => Err(e),
        };

        if !teardown_only {
            let next = if result.is_ok() {
                TunnelState::Stopped
            } else {
                TunnelState::Failed
            };
            self.session.transition(next)?;
        }
        result
    }
}
