// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manager and per-worker log sinks.
//!
//! The manager log is append-only and tee'd to stdout. Worker logs carry
//! timestamped status lines interleaved with raw captured output; captured
//! output is filtered of carriage-return progress-bar artifacts before it
//! is written. Logging failures are reported via tracing but never
//! propagate.

use crate::timestamp;
use parking_lot::Mutex;
use regex::Regex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::SystemTime;

#[allow(clippy::expect_used)]
static CONNECTION_CLOSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Connection to \S+ closed\.\r\n").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static TRAILING_CR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r[^\n]*$").expect("constant regex pattern is valid"));

#[allow(clippy::expect_used)]
static CR_BEFORE_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r+\n").expect("constant regex pattern is valid"));

#[allow(clippy::expect_used)]
static OVERWRITTEN_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\r\n]*\r").expect("constant regex pattern is valid"));

/// Strip carriage-return artifacts from captured remote output.
///
/// - drops ssh's `Connection to X closed.` trailer
/// - drops a trailing, newline-less `\r...` fragment
/// - collapses `\r+\n` to `\n`
/// - keeps only the final overwrite of `\r`-rewritten progress lines
pub fn filter_output(buf: &str) -> String {
    let buf = CONNECTION_CLOSED.replace_all(buf, "");
    let buf = TRAILING_CR.replace_all(&buf, "");
    let buf = CR_BEFORE_NEWLINE.replace_all(&buf, "\n");
    OVERWRITTEN_LINE.replace_all(&buf, "").into_owned()
}

/// Append-only manager log, tee'd to stdout.
#[derive(Debug, Clone)]
pub struct ManagerLog {
    path: PathBuf,
}

impl ManagerLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one line and echo it to stdout.
    pub fn writeln(&self, line: &str) {
        self.write(&format!("{}\n", line));
    }

    /// Append raw text and echo it to stdout.
    pub fn write(&self, buf: &str) {
        print!("{}", buf);
        let _ = std::io::stdout().flush();

        if let Err(e) = self.append(buf.as_bytes()) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write manager log");
        }
    }

    fn append(&self, buf: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buf)
    }
}

/// Ceiling on the unresolved tail buffered between output chunks.
const TAIL_LIMIT: usize = 64 * 1024;

/// One worker's log file under the session's `workers/` directory.
///
/// Written only by its owning worker; the watchdog reads mtimes to judge
/// session idleness, so an all-filtered write still touches the file.
///
/// Captured output arrives in arbitrary read-sized chunks, and a
/// `\r`-rewritten progress line can straddle a chunk boundary. Filtering
/// each chunk in isolation would resolve such a line wrongly, so only
/// content up to the last newline is filtered and written per call; the
/// unterminated remainder is buffered (shared across clones) and prepended
/// to the next chunk. Status lines resolve the buffer first, applying the
/// trailing-fragment rule, so log lines stay in order.
#[derive(Debug, Clone)]
pub struct WorkerLog {
    path: PathBuf,
    tail: Arc<Mutex<String>>,
}

impl WorkerLog {
    /// Log for worker `id` under `workers_dir`.
    pub fn new(workers_dir: PathBuf, id: u32) -> Self {
        Self {
            path: workers_dir.join(id.to_string()),
            tail: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append a timestamped status line: `# <ts> [<address>] <msg>`.
    ///
    /// Pending command output lands before the status line.
    pub fn status(&self, address: &str, msg: &str) {
        let line = format!("# {} [{}] {}\n", timestamp(), address, msg);
        let result = self
            .flush_tail()
            .and_then(|()| self.append(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write worker log");
        }
    }

    /// Append captured command output, post-filter.
    ///
    /// Content after the chunk's last newline stays buffered until a later
    /// chunk or status line completes it.
    pub fn output(&self, buf: &str) {
        let settled = {
            let mut tail = self.tail.lock();
            tail.push_str(buf);
            let settled = tail
                .rfind('\n')
                .map(|pos| tail.drain(..=pos).collect::<String>());
            compact_tail(&mut tail);
            settled
        };

        let result = match settled {
            Some(settled) => {
                let filtered = filter_output(&settled);
                if filtered.is_empty() {
                    // Nothing survived the filter: still bump mtime so
                    // the watchdog sees progress.
                    self.touch()
                } else {
                    self.append(filtered.as_bytes())
                }
            }
            // No line completed yet; bytes still arrived.
            None => self.touch(),
        };
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write worker log");
        }
    }

    /// Resolve and write whatever output is still buffered.
    ///
    /// The trailing `\r<fragment>` drop rule applies here: an overwrite
    /// that never completed is discarded. The flushed remainder is
    /// newline-terminated so a following status line starts its own line.
    fn flush_tail(&self) -> std::io::Result<()> {
        let rest = std::mem::take(&mut *self.tail.lock());
        if rest.is_empty() {
            return Ok(());
        }
        let mut filtered = filter_output(&rest);
        if filtered.is_empty() {
            return self.touch();
        }
        if !filtered.ends_with('\n') {
            filtered.push('\n');
        }
        self.append(filtered.as_bytes())
    }

    /// Append a blank separator line after a job's output.
    pub fn blank_line(&self) {
        if let Err(e) = self.append(b"\n") {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write worker log");
        }
    }

    fn append(&self, buf: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buf)
    }

    fn touch(&self) -> std::io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.set_modified(SystemTime::now())
    }
}

/// Bound an unterminated tail that keeps growing without a newline.
///
/// Everything between the first and last carriage return has already been
/// overwritten and can never be emitted, by either the overwrite rule or
/// the trailing-fragment rule, so it is safe to cut.
fn compact_tail(tail: &mut String) {
    if tail.len() <= TAIL_LIMIT {
        return;
    }
    if let (Some(first), Some(last)) = (tail.find('\r'), tail.rfind('\r')) {
        if first < last {
            tail.replace_range(first + 1..last + 1, "");
        }
    }
}

#[cfg(test)]
#[path = "logs_tests.rs"]
mod tests;
