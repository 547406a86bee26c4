// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cloud-provisioner capability.
//!
//! `launch` streams `(ip, instance-id)` pairs into a channel as instances
//! finish booting, in boot-ready order. Cancelling the token puts an
//! in-flight launch into drain mode: no new creations, already-created
//! instances are destroyed as soon as they reach `running`, and the call
//! finishes with [`ProvisionError::Stopped`].

pub mod hub;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use async_trait::async_trait;
use ct_core::TaskConf;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A provisioned cloud host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub address: String,
    pub instance_id: String,
}

/// Placement options forwarded to the provider on launch.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub region: String,
    pub size: String,
    pub kind: String,
    pub label: String,
    pub ami_id: Option<String>,
    pub snapshot_id: Option<String>,
    pub backup_id: Option<u64>,
}

impl From<&TaskConf> for LaunchOptions {
    fn from(conf: &TaskConf) -> Self {
        Self {
            region: conf.ec2_region.clone(),
            size: conf.ec2_size.clone(),
            kind: conf.ec2_type.clone(),
            label: conf.launch_label(),
            ami_id: conf.ami_id.clone(),
            snapshot_id: conf.snapshot_id.clone(),
            backup_id: conf.backup_id,
        }
    }
}

/// Errors surfaced by a provisioner.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid hub credentials")]
    InvalidCredentials,
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("launch stopped before completion")]
    Stopped,
    #[error("provider error: {0}")]
    Api(String),
}

impl ProvisionError {
    /// Fatal errors abort immediately; the rest are retried in place.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProvisionError::InvalidCredentials | ProvisionError::NotFound(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProvisionError::Transient(_))
    }
}

/// Launches and destroys cloud instances.
#[async_trait]
pub trait Provisioner: Send + Sync + 'static {
    /// Launch up to `n` instances, sending each on `ready` once booted.
    ///
    /// Returns `Ok(())` when all `n` were yielded, `Err(Stopped)` when
    /// cancelled and fully drained, and a fatal error otherwise.
    async fn launch(
        &self,
        n: u32,
        options: &LaunchOptions,
        ready: mpsc::Sender<Instance>,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError>;

    /// Best-effort destroy by address.
    ///
    /// Returns the subset actually destroyed; an address absent from the
    /// result must be treated as possibly still running.
    async fn destroy(&self, addresses: &[String]) -> Result<Vec<Instance>, ProvisionError>;
}
