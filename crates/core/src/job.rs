// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job, job result, and persisted job state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One command-line invocation to execute on some worker.
///
/// The pool re-enqueues a failed job with `retries + 1` until
/// `retry_limit` is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub command: String,
    pub retries: u32,
    pub retry_limit: u32,
}

impl Job {
    pub fn new(command: impl Into<String>, retry_limit: u32) -> Self {
        Self {
            command: command.into(),
            retries: 0,
            retry_limit,
        }
    }

    /// True while another attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retries < self.retry_limit
    }

    /// The same job, one attempt later.
    pub fn retried(&self) -> Self {
        Self {
            command: self.command.clone(),
            retries: self.retries + 1,
            retry_limit: self.retry_limit,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)
    }
}

/// Terminal outcome of one job attempt.
///
/// `code` is the remote exit code; `None` means the command timed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub command: String,
    pub code: Option<i32>,
}

impl JobResult {
    pub fn new(command: impl Into<String>, code: Option<i32>) -> Self {
        Self {
            command: command.into(),
            code,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self.code {
            Some(code) => JobStatus::Exit(code),
            None => JobStatus::Timeout,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }
}

/// Persisted per-job state, one line per job in the session's jobs file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Exit(i32),
    Timeout,
}

impl JobStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, JobStatus::Exit(0))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Exit(code) => write!(f, "EXIT={}", code),
            JobStatus::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Error parsing a persisted job state token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job state: {0}")]
pub struct ParseJobStatusError(String);

impl FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "TIMEOUT" => Ok(JobStatus::Timeout),
            _ => {
                let code = s
                    .strip_prefix("EXIT=")
                    .and_then(|n| n.parse::<i32>().ok())
                    .ok_or_else(|| ParseJobStatusError(s.to_string()))?;
                Ok(JobStatus::Exit(code))
            }
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
