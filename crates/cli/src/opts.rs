// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flag parsing and config resolution.
//!
//! Every option resolves command line > `CLOUDTASK_<NAME>` environment
//! variable > built-in default (clap's `env` fallback gives the first
//! two). On `--resume`/`--retry` the persisted session config replaces
//! the defaults, and only flags literally present on the command line
//! override it.

use anyhow::{bail, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, Parser};
use ct_core::TaskConf;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "cloudtask",
    version,
    about = "Execute shell jobs in parallel on a fleet of cloud workers",
    long_about = "Execute shell jobs in parallel on a fleet of cloud workers.\n\n\
        Jobs are read from standard input, one per line; each line is\n\
        shell-tokenized and appended to the command prefix.\n\n\
        Examples:\n\
        \x20   seq 10 | cloudtask echo\n\
        \x20   seq 10 | cloudtask --split=3 echo\n\
        \x20   cloudtask --resume=1 --timeout=6\n\
        \x20   cloudtask --retry=2 --split=1"
)]
pub struct Cli {
    /// Provisioner credential; required when launching workers
    #[arg(long, env = "CLOUDTASK_HUB_APIKEY", hide_env_values = true)]
    pub hub_apikey: Option<String>,

    /// Launch instances from a snapshot
    #[arg(long, env = "CLOUDTASK_SNAPSHOT_ID", value_name = "ID")]
    pub snapshot_id: Option<String>,

    /// Backup to restore on launch
    #[arg(long, env = "CLOUDTASK_BACKUP_ID", value_name = "ID")]
    pub backup_id: Option<u64>,

    /// Launch a specific machine image
    #[arg(long, env = "CLOUDTASK_AMI_ID", value_name = "ID")]
    pub ami_id: Option<String>,

    /// Region for instance launch
    #[arg(long, env = "CLOUDTASK_EC2_REGION", value_name = "REGION")]
    pub ec2_region: Option<String>,

    /// Instance launch size
    #[arg(long, env = "CLOUDTASK_EC2_SIZE", value_name = "SIZE")]
    pub ec2_size: Option<String>,

    /// Instance launch type
    #[arg(long, env = "CLOUDTASK_EC2_TYPE", value_name = "TYPE")]
    pub ec2_type: Option<String>,

    /// Sessions root [default: ~/.cloudtask]
    #[arg(long, env = "CLOUDTASK_SESSIONS", value_name = "PATH")]
    pub sessions: Option<PathBuf>,

    /// Remote login name
    #[arg(long, env = "CLOUDTASK_USER", value_name = "NAME")]
    pub user: Option<String>,

    /// Worker setup command
    #[arg(long, env = "CLOUDTASK_PRE", value_name = "COMMAND")]
    pub pre: Option<String>,

    /// Worker cleanup command
    #[arg(long, env = "CLOUDTASK_POST", value_name = "COMMAND")]
    pub post: Option<String>,

    /// Directory tree rsynced onto each worker
    #[arg(long, env = "CLOUDTASK_OVERLAY", value_name = "PATH")]
    pub overlay: Option<PathBuf>,

    /// Per-job timeout in seconds
    #[arg(long, env = "CLOUDTASK_TIMEOUT", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Per-job retry limit
    #[arg(long, env = "CLOUDTASK_RETRIES", value_name = "N")]
    pub retries: Option<u32>,

    /// Consecutive failures before a worker is dismissed (0 = disabled)
    #[arg(long, env = "CLOUDTASK_STRIKES", value_name = "N")]
    pub strikes: Option<u32>,

    /// Parallel worker count
    #[arg(long, env = "CLOUDTASK_SPLIT", value_name = "N")]
    pub split: Option<u32>,

    /// Pre-launched worker addresses: a list, or a path to a file
    #[arg(long, env = "CLOUDTASK_WORKERS", value_name = "LIST|PATH")]
    pub workers: Option<String>,

    /// Post-run reporting hook: sh:<command>, py:<code> or mail:<addr>
    #[arg(long, env = "CLOUDTASK_REPORT", value_name = "KIND:EXPR")]
    pub report: Option<String>,

    /// Skip interactive confirmation
    #[arg(long)]
    pub force: bool,

    /// Re-run the pending jobs of a session
    #[arg(long, value_name = "ID", conflicts_with = "retry")]
    pub resume: Option<u32>,

    /// Move a session's failed jobs back to pending and rerun them
    #[arg(long, value_name = "ID")]
    pub retry: Option<u32>,

    /// Command prefix; stdin lines are appended as arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// Fold the parsed options into `conf`.
    ///
    /// With `cmdline_only`, values that came from the environment or from
    /// clap defaults are ignored - used when a persisted session config is
    /// the baseline.
    pub fn apply(&self, conf: &mut TaskConf, matches: &ArgMatches, cmdline_only: bool) -> Result<()> {
        let set = |id: &str| {
            !cmdline_only || matches.value_source(id) == Some(ValueSource::CommandLine)
        };

        if set("hub_apikey") {
            if let Some(v) = &self.hub_apikey {
                conf.hub_apikey = Some(v.clone());
            }
        }
        if set("snapshot_id") {
            if let Some(v) = &self.snapshot_id {
                conf.snapshot_id = Some(v.clone());
            }
        }
        if set("backup_id") {
            if let Some(v) = self.backup_id {
                if v < 1 {
                    bail!("--backup-id can't be smaller than 1");
                }
                conf.backup_id = Some(v);
            }
        }
        if set("ami_id") {
            if let Some(v) = &self.ami_id {
                conf.ami_id = Some(v.clone());
            }
        }
        if set("ec2_region") {
            if let Some(v) = &self.ec2_region {
                conf.ec2_region = v.clone();
            }
        }
        if set("ec2_size") {
            if let Some(v) = &self.ec2_size {
                conf.ec2_size = v.clone();
            }
        }
        if set("ec2_type") {
            if let Some(v) = &self.ec2_type {
                conf.ec2_type = v.clone();
            }
        }
        if set("user") {
            if let Some(v) = &self.user {
                conf.user = v.clone();
            }
        }
        if set("pre") {
            if let Some(v) = &self.pre {
                conf.pre = Some(v.clone());
            }
        }
        if set("post") {
            if let Some(v) = &self.post {
                conf.post = Some(v.clone());
            }
        }
        if set("overlay") {
            if let Some(v) = &self.overlay {
                if !v.is_dir() {
                    bail!("overlay '{}' is not a directory", v.display());
                }
                conf.overlay = Some(v.canonicalize()?);
            }
        }
        if set("timeout") {
            if let Some(v) = self.timeout {
                conf.timeout = v;
            }
        }
        if set("retries") {
            if let Some(v) = self.retries {
                conf.retries = v;
            }
        }
        if set("strikes") {
            if let Some(v) = self.strikes {
                conf.strikes = v;
            }
        }
        if set("split") {
            if let Some(v) = self.split {
                if v < 1 {
                    bail!("bad --split value '{}'", v);
                }
                conf.split = v;
            }
        }
        if set("workers") {
            if let Some(v) = &self.workers {
                conf.workers = parse_workers(v)?;
            }
        }
        if set("report") {
            if let Some(v) = &self.report {
                conf.report = Some(v.clone());
            }
        }

        Ok(())
    }
}

/// Parse `--workers`: a path to a file of addresses, or an inline
/// comma/whitespace-separated list.
pub fn parse_workers(value: &str) -> Result<Vec<String>> {
    let addresses: Vec<String> = if Path::new(value).is_file() {
        std::fs::read_to_string(value)?
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    } else {
        value
            .split([',', ' ', '\t', '\n'])
            .map(|addr| addr.trim().to_string())
            .filter(|addr| !addr.is_empty())
            .collect()
    };
    Ok(addresses)
}

/// Default sessions root: `$HOME/.cloudtask`.
pub fn default_sessions_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cloudtask")
}

#[cfg(test)]
#[path = "opts_tests.rs"]
mod tests;
