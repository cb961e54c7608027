//! Remote execution contract
//!
//! The tunnel supervisor only needs two things from the build slave: file
//! upload and command execution with captured output. Detaching the tunnel
//! is left to the process supervisor utility it is launched under.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::common::{Error, Result};

/// Optional features a remote host may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Receive files from the build master
    DownloadFile,
    /// Run shell commands
    Shell,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DownloadFile => write!(f, "downloadFile"),
            Self::Shell => write!(f, "shell"),
        }
    }
}

/// A command to run on the remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub argv: Vec<String>,
    /// Working directory relative to the remote build area
    pub workdir: PathBuf,
}

impl RemoteCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            workdir: PathBuf::from("."),
        }
    }

    pub fn in_dir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Program name, used in logs and errors
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }
}

/// Exit status and captured output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Check if the command succeeded (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into `RemoteCommandFailed`
    pub fn check(self, command: &RemoteCommand) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::remote_command_failed(
                &command.argv,
                self.exit_code,
                &self.stderr,
            ))
        }
    }
}

/// Executes work on the build slave
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Whether the remote side advertises a capability
    fn supports(&self, capability: Capability) -> bool;

    /// Push a local file into the root of the remote build area
    async fn upload_file(&self, local: &Path, remote_name: &str, mode: u32) -> Result<()>;

    /// Run a command to completion
    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput>;
}

#[async_trait]
impl<T: RemoteExecutor + ?Sized> RemoteExecutor for Arc<T> {
    fn supports(&self, capability: Capability) -> bool {
        (**self).supports(capability)
    }

    async fn upload_file(&self, local: &Path, remote_name: &str, mode: u32) -> Result<()> {
        (**self).upload_file(local, remote_name, mode).await
    }

    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        (**self).run(command).await
    }
}
