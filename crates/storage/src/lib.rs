// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable session state: per-session directory, job state file, and logs.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod error;
pub mod jobs;
pub mod logs;
pub mod session;

pub use error::StorageError;
pub use jobs::JobsFile;
pub use logs::{ManagerLog, WorkerLog};
pub use session::{Session, SessionPaths};

/// Timestamp format used in manager and worker log lines.
pub const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time formatted for log lines.
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FMT).to_string()
}
