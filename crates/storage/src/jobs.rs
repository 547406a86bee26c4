// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session's job state file.
//!
//! One line per job, `<STATE>\t<command>` with STATE in `PENDING`,
//! `EXIT=<n>`, `TIMEOUT`. Every job the controller accepted appears exactly
//! once after controller exit, on both the success and failure paths.

use crate::StorageError;
use ct_core::{JobResult, JobStatus};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// In-memory view of the jobs file.
#[derive(Debug)]
pub struct JobsFile {
    path: PathBuf,
    /// Commands still waiting to run.
    pub pending: Vec<String>,
    /// Finished commands with their raw persisted state.
    pub finished: Vec<(String, String)>,
}

impl JobsFile {
    /// Load the jobs file, or an empty view when it doesn't exist yet.
    ///
    /// Unknown state tokens are kept verbatim and treated as finished.
    pub fn load(path: PathBuf) -> Result<Self, StorageError> {
        let mut pending = Vec::new();
        let mut finished = Vec::new();

        if path.exists() {
            for line in fs::read_to_string(&path)?.lines() {
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                let (state, command) = line
                    .split_once('\t')
                    .ok_or_else(|| StorageError::MalformedJobsLine(line.to_string()))?;
                if state == "PENDING" {
                    pending.push(command.to_string());
                } else {
                    finished.push((command.to_string(), state.to_string()));
                }
            }
        }

        Ok(Self {
            path,
            pending,
            finished,
        })
    }

    /// Merge a batch of submitted jobs and their results, then persist.
    ///
    /// Jobs with a result move to finished; submitted jobs without one are
    /// pending. The file is rewritten atomically (write-then-rename).
    pub fn update(
        &mut self,
        submitted: &[String],
        results: &[JobResult],
    ) -> Result<(), StorageError> {
        for result in results {
            self.finished
                .push((result.command.clone(), result.status().to_string()));
        }

        let resolved: HashSet<&str> = results.iter().map(|r| r.command.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut pending = Vec::new();
        for command in self.pending.iter().chain(submitted.iter()) {
            if resolved.contains(command.as_str()) || !seen.insert(command.as_str()) {
                continue;
            }
            pending.push(command.clone());
        }
        self.pending = pending;

        self.persist()
    }

    /// Move every finished job that did not exit 0 back to pending.
    ///
    /// Used by the `--retry` flow. A no-op when everything succeeded.
    pub fn update_retry_failed(&mut self) -> Result<(), StorageError> {
        let (ok, failed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.finished)
            .into_iter()
            .partition(|(_, state)| state == "EXIT=0");

        self.finished = ok;
        self.pending.extend(failed.into_iter().map(|(cmd, _)| cmd));

        self.persist()
    }

    /// Count of finished jobs that exited 0.
    pub fn succeeded(&self) -> usize {
        self.count_state("EXIT=0")
    }

    /// Count of finished jobs that timed out.
    pub fn timeouts(&self) -> usize {
        self.count_state(&JobStatus::Timeout.to_string())
    }

    /// Count of finished jobs that failed with a non-zero exit.
    pub fn errors(&self) -> usize {
        self.finished.len() - self.succeeded() - self.timeouts()
    }

    pub fn total(&self) -> usize {
        self.finished.len() + self.pending.len()
    }

    fn count_state(&self, state: &str) -> usize {
        self.finished.iter().filter(|(_, s)| s == state).count()
    }

    fn persist(&self) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            for (command, state) in &self.finished {
                writeln!(file, "{}\t{}", state, command)?;
            }
            for command in &self.pending {
                writeln!(file, "{}\t{}", JobStatus::Pending, command)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
