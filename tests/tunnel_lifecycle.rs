//! Tunnel lifecycle tests against stub remote hosts
//!
//! The stub executors stand in for the build slave: they record every
//! command and decide exit codes the way the real tools would.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sauceconnect::common::config::{Config, RemoteConfig};
use sauceconnect::common::Properties;
use sauceconnect::remote::{Capability, CommandOutput, RemoteCommand, RemoteExecutor};
use sauceconnect::tunnel::{
    ReadinessPolicy, StopSchedule, SupervisorSettings, SupportArtifacts, TunnelConfig,
};
use sauceconnect::{Error, Result, TunnelState, TunnelSupervisor};

/// Build slave whose process supervisor honours the `--retry` schedule
///
/// The tunnel ignores the first `ignored_stages` signals; the escalation
/// succeeds if a later stage kills it.
struct EscalatingHost {
    ignored_stages: usize,
    commands: Mutex<Vec<Vec<String>>>,
    signals_sent: Mutex<Vec<String>>,
    /// Readiness checks never return
    hang_on_check: bool,
}

impl EscalatingHost {
    fn new(ignored_stages: usize) -> Self {
        Self {
            ignored_stages,
            commands: Mutex::new(Vec::new()),
            signals_sent: Mutex::new(Vec::new()),
            hang_on_check: false,
        }
    }

    fn stop_invocations(&self) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|argv| argv.iter().any(|a| a == "--stop"))
            .count()
    }

    fn escalate(&self, argv: &[String]) -> i32 {
        let retry = argv
            .iter()
            .position(|a| a == "--retry")
            .and_then(|i| argv.get(i + 1))
            .expect("stop command carries --retry");
        let schedule = StopSchedule::parse(retry).expect("valid schedule");

        for (n, stage) in schedule.stages().iter().enumerate() {
            self.signals_sent.lock().unwrap().push(stage.signal.to_string());
            if n >= self.ignored_stages {
                return 0;
            }
        }
        // start-stop-daemon: process still running after the schedule ran out
        2
    }
}

#[async_trait]
impl RemoteExecutor for EscalatingHost {
    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    async fn upload_file(&self, _local: &Path, _remote_name: &str, _mode: u32) -> Result<()> {
        Ok(())
    }

    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        self.commands.lock().unwrap().push(command.argv.clone());

        if command.program() == "/bin/pwd" {
            return Ok(CommandOutput {
                stdout: "/var/lib/buildslave/full\n".to_string(),
                ..Default::default()
            });
        }
        if command.argv.iter().any(|a| a == "wait-ready") && self.hang_on_check {
            std::future::pending::<()>().await;
        }
        if command.argv.iter().any(|a| a == "--stop") {
            return Ok(CommandOutput {
                exit_code: self.escalate(&command.argv),
                ..Default::default()
            });
        }
        Ok(CommandOutput::default())
    }
}

fn settings() -> SupervisorSettings {
    SupervisorSettings {
        remote: RemoteConfig::default(),
        artifacts: Some(SupportArtifacts {
            tunnel_binary: PathBuf::from("/opt/sauce/sauce_tunnel"),
            check_utility: PathBuf::from("/opt/sauce/sauceconnect"),
        }),
        readiness: ReadinessPolicy::default(),
        stop_schedule: StopSchedule::default(),
    }
}

fn tunnel() -> TunnelConfig {
    TunnelConfig::new("%(sauce_user)s", "secret")
        .unwrap()
        .with_domains(["%(branch:-trunk)s.example.com"])
        .with_ports(["80"])
}

#[tokio::test]
async fn stop_escalation_runs_in_a_single_invocation() {
    let host = Arc::new(EscalatingHost::new(2));
    let mut sup = TunnelSupervisor::adopt(host.clone(), settings(), None);

    sup.stop().await.unwrap();

    assert_eq!(sup.state(), TunnelState::Stopped);
    assert_eq!(host.stop_invocations(), 1);
    assert_eq!(
        *host.signals_sent.lock().unwrap(),
        vec!["QUIT", "QUIT", "QUIT"]
    );
}

#[tokio::test]
async fn exhausted_escalation_fails_without_retrying() {
    let host = Arc::new(EscalatingHost::new(usize::MAX));
    let mut sup = TunnelSupervisor::adopt(host.clone(), settings(), None);

    let err = sup.stop().await.unwrap_err();
    assert!(matches!(err, Error::RemoteCommandFailed { exit_code: 2, .. }));
    assert!(err.is_build_fatal());
    assert_eq!(sup.state(), TunnelState::Failed);
    assert_eq!(host.stop_invocations(), 1);
    assert_eq!(host.signals_sent.lock().unwrap().last().unwrap(), "KILL");
}

#[tokio::test]
async fn launch_arguments_are_expanded_from_build_properties() {
    let host = Arc::new(EscalatingHost::new(0));
    let mut properties = Properties::new();
    properties.set("sauce_user", "alice");
    let mut sup = TunnelSupervisor::new(host.clone(), tunnel(), properties, settings());

    sup.start().await.unwrap();
    assert_eq!(sup.state(), TunnelState::Running);

    let commands = host.commands.lock().unwrap();
    let launch = commands
        .iter()
        .find(|argv| argv.iter().any(|a| a == "--start"))
        .unwrap();
    let args = &launch[launch.iter().position(|a| a == "--").unwrap() + 1..];
    assert_eq!(
        args,
        [
            "-u",
            "alice",
            "-k",
            "secret",
            "-d",
            "trunk.example.com",
            "-p",
            "80",
            "--logfile",
            "/var/lib/buildslave/full/sauce_tunnel.log",
            "--readyfile",
            "/var/lib/buildslave/full/sauce_tunnel.ready",
        ]
    );
}

#[tokio::test]
async fn aborted_readiness_wait_still_stops_the_tunnel() {
    let mut host = EscalatingHost::new(0);
    host.hang_on_check = true;
    let host = Arc::new(host);
    let mut sup = TunnelSupervisor::new(host.clone(), tunnel(), Properties::new(), settings());

    let aborted = tokio::time::timeout(Duration::from_millis(50), sup.start()).await;
    assert!(aborted.is_err());
    assert_eq!(sup.state(), TunnelState::AwaitingReady);

    sup.stop().await.unwrap();
    assert_eq!(sup.state(), TunnelState::Stopped);
    assert_eq!(host.stop_invocations(), 1);
}

#[test]
fn malformed_stop_schedule_is_a_config_error() {
    let config = Config::from_toml("[stop]\nschedule = \"QUIT/soon\"\n").unwrap();
    assert!(matches!(
        SupervisorSettings::from_config(&config).unwrap_err(),
        Error::Config(_)
    ));
}

/// Full round trip on this machine: stub start-stop-daemon and tunnel
/// scripts, with this crate's own binary as the readiness helper.
#[cfg(unix)]
mod local {
    use super::*;
    use sauceconnect::remote::LocalExecutor;
    use std::os::unix::fs::PermissionsExt;

    const FAKE_DAEMON: &str = r#"#!/bin/sh
echo "$@" >> daemon.calls
case " $* " in
  *" --stop "*)
    [ -f sauce_tunnel.pid ] || exit 1
    kill "$(cat sauce_tunnel.pid)" 2>/dev/null
    rm -f sauce_tunnel.pid
    exit 0
    ;;
esac
exe=""
while [ $# -gt 0 ]; do
  case "$1" in
    --exec) exe="$2"; shift 2 ;;
    --) shift; break ;;
    *) shift ;;
  esac
done
"$exe" "$@" </dev/null >/dev/null 2>&1 &
echo $! > sauce_tunnel.pid
"#;

    const FAKE_TUNNEL: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    --readyfile) ready="$2"; shift 2 ;;
    *) shift ;;
  esac
done
touch "$ready"
exec sleep 30
"#;

    const STALLED_TUNNEL: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    --logfile) log="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "Connecting to Sauce Labs REST API" >> "$log"
echo "Tunnel host is not responding" >> "$log"
exec sleep 30
"#;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Supervisor over a fresh build area; the temp dirs must outlive it
    fn local_supervisor(
        tunnel_body: &str,
        timeout_secs: u64,
    ) -> (
        [tempfile::TempDir; 2],
        PathBuf,
        TunnelSupervisor<LocalExecutor>,
    ) {
        let tools = tempfile::tempdir().unwrap();
        let area = tempfile::tempdir().unwrap();
        let daemon = script(tools.path(), "start-stop-daemon", FAKE_DAEMON);
        let tunnel_binary = script(tools.path(), "tunnel", tunnel_body);

        let config = Config::from_toml(&format!(
            r#"
[readiness]
timeout_secs = {}
poll_interval_secs = 1

[remote]
daemon = "{}"

[artifacts]
tunnel_binary = "{}"
check_utility = "{}"
"#,
            timeout_secs,
            daemon.display(),
            tunnel_binary.display(),
            env!("CARGO_BIN_EXE_sauceconnect"),
        ))
        .unwrap();

        let executor = LocalExecutor::new(area.path()).unwrap();
        let root = executor.root().to_path_buf();
        let settings = SupervisorSettings::from_config(&config).unwrap();
        let sup = TunnelSupervisor::new(
            executor,
            TunnelConfig::new("alice", "secret").unwrap(),
            Properties::new(),
            settings,
        );
        ([tools, area], root, sup)
    }

    #[tokio::test]
    async fn start_and_stop_against_local_build_area() {
        let (_dirs, root, mut sup) = local_supervisor(FAKE_TUNNEL, 20);

        sup.start().await.unwrap();
        assert_eq!(sup.state(), TunnelState::Running);
        assert_eq!(sup.session().working_directory.as_deref(), Some(root.as_path()));
        assert!(root.join("sauce_tunnel.ready").exists());
        assert!(root.join("sauce_tunnel.pid").exists());

        sup.stop().await.unwrap();
        assert_eq!(sup.state(), TunnelState::Stopped);
        assert!(!root.join("sauce_tunnel.pid").exists());

        let calls = std::fs::read_to_string(root.join("daemon.calls")).unwrap();
        assert!(calls.contains("--retry QUIT/10/QUIT/10/QUIT/10/KILL/10"));
    }

    #[tokio::test]
    async fn stalled_tunnel_times_out_with_its_log_attached() {
        let (_dirs, root, mut sup) = local_supervisor(STALLED_TUNNEL, 1);

        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, Error::TunnelTimeout(1)), "{err}");
        assert_eq!(sup.state(), TunnelState::Failed);
        let tail = sup.session().log_tail.as_deref().unwrap();
        assert!(tail.contains("Tunnel host is not responding"), "{tail}");

        // Best-effort teardown leaves the session Failed
        sup.stop().await.unwrap();
        assert_eq!(sup.state(), TunnelState::Failed);
        assert!(!root.join("sauce_tunnel.pid").exists());
    }
}
