// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote shell access to worker hosts.
//!
//! One [`WorkerConn`] represents one authenticated channel to a worker:
//! it runs commands with live output streaming, probes liveness, applies
//! the file-tree overlay, and installs/removes the ephemeral session key.
//! The engine is generic over [`ShellConnector`] so tests can substitute
//! the scripted fake.

mod command;
mod exec;
pub mod keys;
mod shell;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use keys::SessionKey;
pub use shell::{SshConnector, SshShell};

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Liveness-probe timeout; also the read-idle window during execution.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(120);

/// Liveness probes attempted before a silent peer is declared dead.
pub const PING_RETRIES: u32 = 3;

/// Errors raised by the remote shell.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The peer can't be reached at the transport level. Raised on a
    /// failed connect probe and on ssh's 255/connect-failure signature
    /// mid-run; distinguishes worker death from job failure.
    #[error("worker unreachable: {0}")]
    Unreachable(String),
    /// The peer stopped answering liveness probes during a read.
    #[error("worker stopped responding to liveness probes")]
    PeerDead,
    #[error("command timed out after {0} seconds")]
    Timeout(u64),
    #[error("command failed: {command}: {output}")]
    CommandFailed { command: String, output: String },
    #[error("cancelled")]
    Cancelled,
    #[error("key generation failed: {0}")]
    KeyGen(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How a remote command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// The remote process exited with this code.
    Exited(i32),
    /// The whole-command timer expired; the process was terminated.
    Timeout,
    /// The stop signal fired; the process was terminated.
    Cancelled,
}

/// Opens authenticated shells to worker hosts.
#[async_trait]
pub trait ShellConnector: Send + Sync + 'static {
    type Conn: WorkerConn + 'static;

    /// Connect to `address`, blocking until a liveness probe succeeds.
    ///
    /// Fails with [`ShellError::Unreachable`] when the probe can't get
    /// through within the probe timeout.
    async fn connect(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<Self::Conn, ShellError>;
}

/// One authenticated channel to a worker host.
#[async_trait]
pub trait WorkerConn: Send + Sync {
    fn address(&self) -> &str;

    /// Append the session's public key to the remote `authorized_keys`.
    async fn install_key(&self) -> Result<(), ShellError>;

    /// Remove the session's public key, matching by fingerprint.
    async fn remove_key(&self) -> Result<(), ShellError>;

    /// Mirror `dir/` onto the remote root, preserving links.
    async fn apply_overlay(&self, dir: &Path) -> Result<(), ShellError>;

    /// Run a setup/teardown hook command, failing on non-zero exit.
    async fn run_hook(&self, command: &str) -> Result<(), ShellError>;

    /// Run one job command, streaming output chunks into `sink`.
    ///
    /// Enforces the whole-command timeout and the read-idle window; an
    /// idle stream triggers liveness probes before the peer is declared
    /// dead. Cancellation terminates the remote process group.
    async fn execute(
        &self,
        command: &str,
        sink: &mut (dyn for<'a> FnMut(&'a str) + Send),
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecStatus, ShellError>;

    /// Liveness probe (`true` over the transport).
    async fn ping(&self) -> Result<(), ShellError>;
}
