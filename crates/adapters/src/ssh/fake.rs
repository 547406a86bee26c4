// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted in-memory shell for tests.

use super::{ExecStatus, ShellConnector, ShellError, WorkerConn};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a scripted command does when executed.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Exit with this code, no output.
    Exit(i32),
    /// Emit `text` on the stream, then exit with `code`.
    Output { text: String, code: i32 },
    /// Sleep, then exit with `code`; cancellable mid-sleep.
    Delayed { millis: u64, code: i32 },
    /// Report a whole-command timeout.
    Timeout,
    /// The peer stops answering liveness probes.
    PeerDead,
    /// The peer dies on the first matching execution; later matching
    /// executions succeed.
    PeerDeadOnce,
    /// Block until cancelled.
    HangUntilCancel,
}

#[derive(Debug, Default)]
struct FakeShellState {
    /// Command-prefix matchers, later entries win.
    behaviors: Vec<(String, FakeBehavior)>,
    /// Every executed command with the address it ran on.
    executed: Vec<(String, String)>,
    /// Addresses whose connect probe fails.
    unreachable: HashSet<String>,
    installed_keys: Vec<String>,
    removed_keys: Vec<String>,
    hooks: Vec<(String, String)>,
    overlays: Vec<PathBuf>,
}

/// Scripted shell connector; clones share one ledger.
#[derive(Debug, Clone, Default)]
pub struct FakeShell {
    state: Arc<Mutex<FakeShellState>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script commands starting with `prefix` to behave as given.
    pub fn on(&self, prefix: impl Into<String>, behavior: FakeBehavior) {
        self.state.lock().behaviors.push((prefix.into(), behavior));
    }

    /// Make the connect probe fail for `address`.
    pub fn mark_unreachable(&self, address: impl Into<String>) {
        self.state.lock().unreachable.insert(address.into());
    }

    /// Every executed command, in execution order.
    pub fn executions(&self) -> Vec<String> {
        self.state
            .lock()
            .executed
            .iter()
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    /// Commands executed on one address.
    pub fn executions_on(&self, address: &str) -> Vec<String> {
        self.state
            .lock()
            .executed
            .iter()
            .filter(|(addr, _)| addr == address)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    /// Addresses that had the session key installed.
    pub fn installed_keys(&self) -> Vec<String> {
        self.state.lock().installed_keys.clone()
    }

    /// Addresses that had the session key removed.
    pub fn removed_keys(&self) -> Vec<String> {
        self.state.lock().removed_keys.clone()
    }

    /// Hook commands run, with their addresses.
    pub fn hooks(&self) -> Vec<(String, String)> {
        self.state.lock().hooks.clone()
    }

    pub fn overlays(&self) -> Vec<PathBuf> {
        self.state.lock().overlays.clone()
    }

    fn behavior_for(&self, command: &str) -> FakeBehavior {
        let mut state = self.state.lock();
        let Some(index) = state
            .behaviors
            .iter()
            .rposition(|(prefix, _)| command.starts_with(prefix.as_str()))
        else {
            return FakeBehavior::Exit(0);
        };
        let behavior = state.behaviors[index].1.clone();
        if matches!(behavior, FakeBehavior::PeerDeadOnce) {
            state.behaviors[index].1 = FakeBehavior::Exit(0);
        }
        behavior
    }
}

#[async_trait]
impl ShellConnector for FakeShell {
    type Conn = FakeConn;

    async fn connect(
        &self,
        address: &str,
        _cancel: &CancellationToken,
    ) -> Result<FakeConn, ShellError> {
        if self.state.lock().unreachable.contains(address) {
            return Err(ShellError::Unreachable(format!(
                "ssh: connect to host {} port 22: Connection timed out",
                address
            )));
        }
        Ok(FakeConn {
            address: address.to_string(),
            shell: self.clone(),
        })
    }
}

/// One scripted connection.
pub struct FakeConn {
    address: String,
    shell: FakeShell,
}

#[async_trait]
impl WorkerConn for FakeConn {
    fn address(&self) -> &str {
        &self.address
    }

    async fn install_key(&self) -> Result<(), ShellError> {
        self.shell
            .state
            .lock()
            .installed_keys
            .push(self.address.clone());
        Ok(())
    }

    async fn remove_key(&self) -> Result<(), ShellError> {
        self.shell
            .state
            .lock()
            .removed_keys
            .push(self.address.clone());
        Ok(())
    }

    async fn apply_overlay(&self, dir: &Path) -> Result<(), ShellError> {
        self.shell.state.lock().overlays.push(dir.to_path_buf());
        Ok(())
    }

    async fn run_hook(&self, command: &str) -> Result<(), ShellError> {
        self.shell
            .state
            .lock()
            .hooks
            .push((self.address.clone(), command.to_string()));
        Ok(())
    }

    async fn execute(
        &self,
        command: &str,
        sink: &mut (dyn for<'a> FnMut(&'a str) + Send),
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecStatus, ShellError> {
        self.shell
            .state
            .lock()
            .executed
            .push((self.address.clone(), command.to_string()));

        match self.shell.behavior_for(command) {
            FakeBehavior::Exit(code) => Ok(ExecStatus::Exited(code)),
            FakeBehavior::Output { text, code } => {
                sink(&text);
                Ok(ExecStatus::Exited(code))
            }
            FakeBehavior::Delayed { millis, code } => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(millis)) => {
                        Ok(ExecStatus::Exited(code))
                    }
                    _ = cancel.cancelled() => Ok(ExecStatus::Cancelled),
                }
            }
            FakeBehavior::Timeout => Ok(ExecStatus::Timeout),
            FakeBehavior::PeerDead | FakeBehavior::PeerDeadOnce => Err(ShellError::PeerDead),
            FakeBehavior::HangUntilCancel => {
                cancel.cancelled().await;
                Ok(ExecStatus::Cancelled)
            }
        }
    }

    async fn ping(&self) -> Result<(), ShellError> {
        Ok(())
    }
}
