// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance ledger parsed from worker logs.
//!
//! Workers record `launched worker <id>` when they obtain an instance and
//! `destroyed worker <id>` after tearing it down. The watchdog's reaper
//! scans these lines to find instances that were launched but never
//! destroyed.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^# \d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2} \[([^\]]*)\] (.*)$")
        .expect("constant regex pattern is valid")
});

/// One worker's instance history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLedger {
    pub worker_id: u32,
    /// Address the instance was reached at.
    pub address: String,
    pub launched: Option<String>,
    pub destroyed: Option<String>,
}

impl WorkerLedger {
    /// Launched, never destroyed.
    pub fn is_zombie(&self) -> bool {
        self.launched.is_some() && self.destroyed.is_none()
    }
}

/// Parse one worker log's status lines into its instance history.
pub fn parse_worker_log(worker_id: u32, content: &str) -> WorkerLedger {
    let mut ledger = WorkerLedger {
        worker_id,
        address: String::new(),
        launched: None,
        destroyed: None,
    };

    for captures in STATUS_LINE.captures_iter(content) {
        let address = &captures[1];
        let message = &captures[2];

        if let Some(id) = message.strip_prefix("launched worker ") {
            ledger.address = address.to_string();
            ledger.launched = Some(id.trim().to_string());
            // A relaunch invalidates any earlier destruction record.
            ledger.destroyed = None;
        } else if let Some(id) = message.strip_prefix("destroyed worker ") {
            // Only a destruction of the launched instance counts.
            if ledger.launched.as_deref() == Some(id.trim()) {
                ledger.destroyed = Some(id.trim().to_string());
            }
        }
    }

    ledger
}

/// Scan every worker log under `workers_dir`.
pub fn scan(workers_dir: &Path) -> std::io::Result<Vec<WorkerLedger>> {
    let mut ledgers = Vec::new();
    for entry in std::fs::read_dir(workers_dir)? {
        let entry = entry?;
        let Some(worker_id) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        let content = std::fs::read_to_string(entry.path())?;
        ledgers.push(parse_worker_log(worker_id, &content));
    }
    ledgers.sort_by_key(|l| l.worker_id);
    Ok(ledgers)
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
