// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ssh transport: argv construction, checked commands, key management,
//! and the rsync overlay.

use super::command::{is_connect_failure, RunningCommand};
use super::keys::SessionKey;
use super::{exec, ExecStatus, ShellConnector, ShellError, WorkerConn, PROBE_TIMEOUT};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Connection options: no host-key prompting, identity auth only.
const SSH_OPTS: [&str; 2] = ["StrictHostKeyChecking=no", "PasswordAuthentication=no"];

/// Opens [`SshShell`] connections with the session identity.
#[derive(Clone)]
pub struct SshConnector {
    key: Arc<SessionKey>,
    user: String,
}

impl SshConnector {
    pub fn new(key: Arc<SessionKey>, user: impl Into<String>) -> Self {
        Self {
            key,
            user: user.into(),
        }
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    type Conn = SshShell;

    async fn connect(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<SshShell, ShellError> {
        let shell = SshShell {
            address: address.to_string(),
            key: Arc::clone(&self.key),
            user: self.user.clone(),
            cancel: cancel.clone(),
        };

        // Construction blocks on a liveness probe.
        match shell.ping().await {
            Ok(()) => Ok(shell),
            Err(ShellError::Cancelled) => Err(ShellError::Cancelled),
            Err(e) => Err(ShellError::Unreachable(e.to_string())),
        }
    }
}

/// One ssh channel to a worker host.
pub struct SshShell {
    address: String,
    key: Arc<SessionKey>,
    user: String,
    cancel: CancellationToken,
}

impl SshShell {
    /// Build the ssh argv for one remote command.
    fn argv(&self, command: &str, pty: bool) -> Vec<String> {
        let mut argv = self.transport_argv(pty);
        argv.push(self.address.clone());
        argv.push(command.to_string());
        argv
    }

    /// The bare transport invocation, shared with rsync's `-e`.
    fn transport_argv(&self, pty: bool) -> Vec<String> {
        let mut argv = vec!["ssh".to_string()];
        if pty {
            argv.push("-t".to_string());
        }
        argv.push("-i".to_string());
        argv.push(self.key.identity_path().display().to_string());
        argv.push("-l".to_string());
        argv.push(self.user.clone());
        for opt in SSH_OPTS {
            argv.push("-o".to_string());
            argv.push(opt.to_string());
        }
        argv
    }

    /// Run a remote command to completion within `timeout`, collecting
    /// output and failing on non-zero exit.
    async fn run_checked(
        &self,
        command: &str,
        stdin: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<(), ShellError> {
        let argv = self.argv(command, false);
        let mut rc = RunningCommand::spawn(&argv, stdin)?;
        let Some(mut stream) = rc.take_output() else {
            return Err(ShellError::Io(std::io::Error::other(
                "command output already consumed",
            )));
        };

        let deadline = Instant::now() + timeout;
        let mut output = String::new();

        loop {
            tokio::select! {
                chunk = stream.recv() => match chunk {
                    Some(buf) => output.push_str(&String::from_utf8_lossy(&buf)),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    rc.terminate();
                    return Err(ShellError::Timeout(timeout.as_secs()));
                }
                _ = self.cancel.cancelled() => {
                    rc.terminate();
                    return Err(ShellError::Cancelled);
                }
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let code = match tokio::time::timeout(remaining, rc.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                rc.terminate();
                return Err(ShellError::Timeout(timeout.as_secs()));
            }
        };

        let stderr = rc.stderr_tail();
        if is_connect_failure(code, &stderr) {
            return Err(ShellError::Unreachable(stderr.trim().to_string()));
        }
        if code != 0 {
            return Err(ShellError::CommandFailed {
                command: command.to_string(),
                output: output.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerConn for SshShell {
    fn address(&self) -> &str {
        &self.address
    }

    async fn install_key(&self) -> Result<(), ShellError> {
        let line = format!("{}\n", self.key.authorized_line());
        self.run_checked(
            "mkdir -p $HOME/.ssh; cat >> $HOME/.ssh/authorized_keys",
            Some(line.into_bytes()),
            PROBE_TIMEOUT,
        )
        .await
    }

    async fn remove_key(&self) -> Result<(), ShellError> {
        let command = format!(
            "sed -i \"/{}/d\" $HOME/.ssh/authorized_keys",
            self.key.fingerprint()
        );
        self.run_checked(&command, None, PROBE_TIMEOUT).await
    }

    async fn apply_overlay(&self, dir: &Path) -> Result<(), ShellError> {
        if !dir.is_dir() {
            return Err(ShellError::CommandFailed {
                command: "rsync".to_string(),
                output: format!("overlay path '{}' is not a directory", dir.display()),
            });
        }

        let source = format!("{}/", dir.display().to_string().trim_end_matches('/'));
        let argv = vec![
            "rsync".to_string(),
            format!("--timeout={}", PROBE_TIMEOUT.as_secs()),
            "-rHEL".to_string(),
            "-e".to_string(),
            self.transport_argv(false).join(" "),
            source,
            format!("{}:/", self.address),
        ];

        let mut rc = RunningCommand::spawn(&argv, None)?;
        let Some(mut stream) = rc.take_output() else {
            return Err(ShellError::Io(std::io::Error::other(
                "command output already consumed",
            )));
        };

        let mut output = String::new();
        loop {
            tokio::select! {
                chunk = stream.recv() => match chunk {
                    Some(buf) => output.push_str(&String::from_utf8_lossy(&buf)),
                    None => break,
                },
                _ = self.cancel.cancelled() => {
                    rc.terminate();
                    return Err(ShellError::Cancelled);
                }
            }
        }

        let code = rc.wait().await?;
        if code != 0 {
            return Err(ShellError::CommandFailed {
                command: "rsync".to_string(),
                output: format!("rsync failed: {}", output.trim()),
            });
        }
        Ok(())
    }

    async fn run_hook(&self, command: &str) -> Result<(), ShellError> {
        self.run_checked(command, None, PROBE_TIMEOUT).await
    }

    async fn execute(
        &self,
        command: &str,
        sink: &mut (dyn for<'a> FnMut(&'a str) + Send),
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecStatus, ShellError> {
        let argv = self.argv(command, false);
        let rc = RunningCommand::spawn(&argv, None)?;
        exec::drive(
            rc,
            sink,
            timeout,
            PROBE_TIMEOUT,
            || async { self.ping().await.is_ok() },
            cancel,
        )
        .await
    }

    async fn ping(&self) -> Result<(), ShellError> {
        self.run_checked("true", None, PROBE_TIMEOUT).await
    }
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;
