// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A spawned transport command with live output capture.

use parking_lot::Mutex;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;

/// How many bytes of stderr are kept for transport-failure detection.
const STDERR_TAIL_LIMIT: usize = 4096;

/// A running transport process (ssh or rsync).
///
/// The process runs in its own process group so that [`terminate`]
/// reaches the whole remote-command tree. Stdout and stderr are merged
/// into one chunk stream; the stderr tail is additionally retained so the
/// caller can recognize ssh's connect-failure signature.
///
/// [`terminate`]: RunningCommand::terminate
pub(crate) struct RunningCommand {
    child: tokio::process::Child,
    pgid: Option<i32>,
    output: Option<mpsc::Receiver<Vec<u8>>>,
    stderr_tail: Arc<Mutex<String>>,
}

impl RunningCommand {
    /// Spawn `argv`, optionally feeding `stdin_data` to the child's stdin.
    pub fn spawn(argv: &[String], stdin_data: Option<Vec<u8>>) -> io::Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if stdin_data.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let pgid = child.id().map(|id| id as i32);

        if let Some(data) = stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    let _ = stdin.write_all(&data).await;
                    // Dropping stdin closes the pipe and signals EOF.
                });
            }
        }

        let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
        let stderr_tail = Arc::new(Mutex::new(String::new()));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone(), None));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx, Some(Arc::clone(&stderr_tail))));
        }

        Ok(Self {
            child,
            pgid,
            output: Some(rx),
            stderr_tail,
        })
    }

    /// Take the merged output stream. The channel closes when both pipes
    /// reach EOF.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.output.take()
    }

    /// Send SIGTERM to the child's process group.
    pub fn terminate(&self) {
        if let Some(pgid) = self.pgid {
            let _ = nix::sys::signal::killpg(
                nix::unistd::Pid::from_raw(pgid),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
    }

    /// Wait for the child and return its exit code.
    ///
    /// A signal death is reported shell-style as `128 + signal`.
    pub async fn wait(&mut self) -> io::Result<i32> {
        let status = self.child.wait().await?;
        Ok(exit_code(status))
    }

    /// The retained tail of the child's stderr.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.lock().clone()
    }
}

async fn pump(
    mut reader: impl tokio::io::AsyncRead + Unpin,
    tx: mpsc::Sender<Vec<u8>>,
    tail: Option<Arc<Mutex<String>>>,
) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = buf[..n].to_vec();
                if let Some(tail) = &tail {
                    let mut tail = tail.lock();
                    tail.push_str(&String::from_utf8_lossy(&chunk));
                    if tail.len() > STDERR_TAIL_LIMIT {
                        let mut cut = tail.len() - STDERR_TAIL_LIMIT;
                        while !tail.is_char_boundary(cut) {
                            cut += 1;
                        }
                        tail.drain(..cut);
                    }
                }
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

/// ssh exits 255 with this stderr signature when the peer is unreachable.
pub(crate) fn is_connect_failure(code: i32, stderr: &str) -> bool {
    code == 255 && stderr.contains("ssh: connect to host")
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
