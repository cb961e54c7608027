//! Executor for a build area on this machine
//!
//! Used when sauceconnect itself runs on the build slave: uploads become
//! copies into the build area and commands run as child processes.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use super::executor::{Capability, CommandOutput, RemoteCommand, RemoteExecutor};
use crate::common::{Error, Result};

/// Runs commands in a local directory
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    root: PathBuf,
}

impl LocalExecutor {
    /// Create an executor rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_workdir(&self, workdir: &Path) -> PathBuf {
        if workdir.is_absolute() {
            workdir.to_path_buf()
        } else {
            self.root.join(workdir)
        }
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    async fn upload_file(&self, local: &Path, remote_name: &str, mode: u32) -> Result<()> {
        let data = tokio::fs::read(local).await.map_err(|e| Error::FileRead {
            path: local.display().to_string(),
            error: e.to_string(),
        })?;

        let dest = self.root.join(remote_name);
        let mut staged = tempfile::NamedTempFile::new_in(&self.root)?;
        staged.write_all(&data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            staged
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        staged
            .persist(&dest)
            .map_err(|e| Error::Io(e.error))?;

        tracing::debug!(
            src = %local.display(),
            dest = %dest.display(),
            bytes = data.len(),
            "Uploaded file"
        );
        Ok(())
    }

    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        if command.argv.is_empty() {
            return Err(Error::Internal("Cannot run an empty command".to_string()));
        }
        let cwd = self.resolve_workdir(&command.workdir);

        tracing::debug!(argv = ?command.argv, cwd = %cwd.display(), "Running command");
        let output = tokio::process::Command::new(command.program())
            .args(&command.argv[1..])
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::Internal(format!("Failed to run '{}': {}", command.program(), e))
            })?;

        Ok(CommandOutput {
            // Killed by a signal: report like a shell would
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("tool");
        std::fs::write(&src, b"#!/bin/sh\necho hi\n").unwrap();

        let area = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(area.path()).unwrap();
        exec.upload_file(&src, "tool", 0o755).await.unwrap();

        let dest = exec.root().join("tool");
        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(std::fs::read(&dest).unwrap(), b"#!/bin/sh\necho hi\n");
    }

    #[tokio::test]
    async fn test_run_captures_output_and_exit_code() {
        let area = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(area.path()).unwrap();

        let out = exec
            .run(&RemoteCommand::new(["/bin/sh", "-c", "pwd; echo err >&2; exit 4"]))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 4);
        assert_eq!(out.stdout.trim(), exec.root().display().to_string());
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_run_rejects_empty_argv() {
        let area = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(area.path()).unwrap();
        let empty: [&str; 0] = [];
        assert!(exec.run(&RemoteCommand::new(empty)).await.is_err());
    }
}
