// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task configuration, immutable once a session starts.
//!
//! Resolution order for every field: built-in default, then a
//! `CLOUDTASK_<NAME>` environment variable, then the command-line flag
//! (highest precedence). The CLI layer performs the env/flag resolution;
//! this type owns defaults, validation, and the persisted snapshot.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;

/// Default per-job wall-clock timeout in seconds.
pub const DEFAULT_TIMEOUT: u64 = 3600;

/// Default remote login name.
pub const DEFAULT_USER: &str = "root";

pub const DEFAULT_EC2_REGION: &str = "us-east-1";
pub const DEFAULT_EC2_SIZE: &str = "m1.small";
pub const DEFAULT_EC2_TYPE: &str = "s3";

/// Errors produced by [`TaskConf`] validation and persistence.
#[derive(Debug, thiserror::Error)]
pub enum TaskConfError {
    #[error("--snapshot-id and --ami-id can't be used together")]
    ConflictingImages,
    #[error("please provide a hub API key or more pre-launched workers")]
    MissingApiKey,
    #[error("no command configured")]
    MissingCommand,
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The immutable run configuration.
///
/// The persisted snapshot never contains `hub_apikey`; a resumed session
/// re-resolves the key from the environment or flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConf {
    /// Remote login name.
    pub user: String,
    /// Job command prefix; per-line stdin arguments are appended.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub command: Option<String>,
    /// Worker setup command, run once after connect.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pre: Option<String>,
    /// Worker cleanup command, run during teardown.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub post: Option<String>,
    /// Local directory tree rsynced onto each worker during setup.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub overlay: Option<PathBuf>,
    /// Per-job wall-clock timeout in seconds.
    pub timeout: u64,
    /// Per-job retry limit.
    pub retries: u32,
    /// Consecutive-failure worker retirement threshold (0 = disabled).
    pub strikes: u32,
    /// Parallel worker count.
    pub split: u32,
    /// Pre-launched worker addresses.
    pub workers: Vec<String>,
    /// Provisioner credential. Never persisted.
    #[serde(skip_serializing, default)]
    pub hub_apikey: Option<String>,
    pub ec2_region: String,
    pub ec2_size: String,
    pub ec2_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ami_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub snapshot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub backup_id: Option<u64>,
    /// Post-run reporting hook, `<kind>:<expr>`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub report: Option<String>,
}

impl Default for TaskConf {
    fn default() -> Self {
        Self {
            user: DEFAULT_USER.to_string(),
            command: None,
            pre: None,
            post: None,
            overlay: None,
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
            strikes: 0,
            split: 1,
            workers: Vec::new(),
            hub_apikey: None,
            ec2_region: DEFAULT_EC2_REGION.to_string(),
            ec2_size: DEFAULT_EC2_SIZE.to_string(),
            ec2_type: DEFAULT_EC2_TYPE.to_string(),
            ami_id: None,
            snapshot_id: None,
            backup_id: None,
            report: None,
        }
    }
}

impl TaskConf {
    /// True when the run must launch instances beyond the pre-launched list.
    pub fn needs_apikey(&self) -> bool {
        (self.split as usize) > self.workers.len()
    }

    /// Hub description label for launched instances.
    pub fn launch_label(&self) -> String {
        format!("Cloudtask: {}", self.command.as_deref().unwrap_or(""))
    }

    /// Validate field combinations that the flag parser can't express.
    pub fn validate(&self) -> Result<(), TaskConfError> {
        if self.command.is_none() {
            return Err(TaskConfError::MissingCommand);
        }
        if self.snapshot_id.is_some() && self.ami_id.is_some() {
            return Err(TaskConfError::ConflictingImages);
        }
        if self.needs_apikey() && self.hub_apikey.is_none() {
            return Err(TaskConfError::MissingApiKey);
        }
        Ok(())
    }

    /// Human-readable view of the non-empty fields, secrets omitted.
    ///
    /// Shown by the confirmation prompt and embedded in reports.
    pub fn fmt(&self) -> String {
        let mut out = String::new();
        let mut field = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                let _ = writeln!(out, "    {:<16} {}", name, value);
            }
        };

        field("command", self.command.clone());
        let fleet = if self.workers.is_empty() {
            format!(
                "{} x ({} : {} : {})",
                self.split, self.ec2_region, self.ec2_size, self.ec2_type
            )
        } else {
            self.workers.join(" ")
        };
        field("workers", Some(fleet));
        field("ami-id", self.ami_id.clone());
        field("snapshot-id", self.snapshot_id.clone());
        field("backup-id", self.backup_id.map(|id| id.to_string()));
        field(
            "overlay",
            self.overlay.as_ref().map(|p| p.display().to_string()),
        );
        field("pre", self.pre.clone());
        field("post", self.post.clone());
        field("timeout", Some(self.timeout.to_string()));
        if self.retries > 0 {
            field("retries", Some(self.retries.to_string()));
        }
        if self.strikes > 0 {
            field("strikes", Some(self.strikes.to_string()));
        }
        field("report", self.report.clone());

        out
    }

    /// Serialize the snapshot persisted in the session's `conf` file.
    pub fn to_toml(&self) -> Result<String, TaskConfError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load a snapshot written by [`TaskConf::to_toml`].
    pub fn from_toml(s: &str) -> Result<Self, TaskConfError> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
#[path = "taskconf_tests.rs"]
mod tests;
