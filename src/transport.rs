use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::chain::Error;

/// Captured result of one remote command.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_command_timeout() -> u64 {
    300
}

fn default_jump() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SshConfig {
    pub user: String,
    pub key_path: PathBuf,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Reach private-subnet nodes through the operator node's public address.
    #[serde(default = "default_jump")]
    pub jump_via_operator: bool,
}

/// The remote command transport. Commands are single explicit script strings
/// with captured exit codes; file pushes stream bytes to a remote path.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn exec(&self, address: &str, script: &str) -> Result<ExecOutput, Error>;

    async fn push(&self, address: &str, content: &[u8], remote_path: &str) -> Result<(), Error>;

    /// A shell that reaches its targets through the given jump host.
    fn with_jump(&self, address: &str) -> Box<dyn RemoteShell>;
}

/// Drives the system `ssh` binary. BatchMode keeps every failure
/// non-interactive; exit status 255 is the client's own "session failed"
/// code and is reported as a connectivity error rather than a task failure.
#[derive(Clone)]
pub struct SshShell {
    config: SshConfig,
    port: u16,
    jump: Option<String>,
}

impl SshShell {
    pub fn new(config: SshConfig, port: u16) -> SshShell {
        SshShell {
            config,
            port,
            jump: None,
        }
    }

    fn ssh_args(&self, address: &str) -> Vec<String> {
        let mut args = vec![
            "-i".into(),
            self.config.key_path.display().to_string(),
            "-p".into(),
            self.port.to_string(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
        ];
        if let Some(jump) = &self.jump {
            args.push("-J".into());
            args.push(format!("{}@{}", self.config.user, jump));
        }
        args.push(format!("{}@{}", self.config.user, address));
        args
    }

    async fn run_ssh(
        &self,
        address: &str,
        script: &str,
        stdin: Option<&[u8]>,
    ) -> Result<ExecOutput, Error> {
        let mut command = Command::new("ssh");
        command.args(self.ssh_args(address));
        command.arg("--");
        command.arg(script);
        command
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("ssh {} :: {}", address, script);
        let mut child = command.spawn()?;

        if let Some(content) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle.write_all(content).await?;
                handle.shutdown().await?;
            }
        }

        let wait = Duration::from_secs(self.config.command_timeout_secs);
        let output = match timeout(wait, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Ok(ExecOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                    timed_out: true,
                })
            }
        };

        let result = ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            timed_out: false,
        };

        if result.exit_code == Some(255) {
            return Err(Error::UnableToConnect {
                node: address.to_string(),
                reason: result.stderr.trim().to_string(),
            });
        }

        Ok(result)
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, address: &str, script: &str) -> Result<ExecOutput, Error> {
        self.run_ssh(address, script, None).await
    }

    async fn push(&self, address: &str, content: &[u8], remote_path: &str) -> Result<(), Error> {
        let script = format!("cat > {}", remote_path);
        let result = self.run_ssh(address, &script, Some(content)).await?;
        if !result.success() {
            return Err(Error::RemoteTaskFailed {
                node: address.to_string(),
                command: script,
                code: result.exit_code.unwrap_or(-1),
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn with_jump(&self, address: &str) -> Box<dyn RemoteShell> {
        let mut scoped = self.clone();
        scoped.jump = Some(address.to_string());
        Box::new(scoped)
    }
}
