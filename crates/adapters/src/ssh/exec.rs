// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job-execution driver: streams command output under two timers.
//!
//! The whole-command timer bounds total wall time; the read-idle timer
//! fires when the stream goes quiet, triggering liveness probes before
//! the peer is declared dead.

use super::command::{is_connect_failure, RunningCommand};
use super::{ExecStatus, ShellError, PING_RETRIES};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Drive one running command to a terminal condition.
///
/// `ping` answers whether the peer is still alive; it is consulted up to
/// [`PING_RETRIES`] times when the read-idle window expires without
/// output.
pub(crate) async fn drive<P, Fut>(
    mut rc: RunningCommand,
    sink: &mut (dyn for<'a> FnMut(&'a str) + Send),
    cmd_timeout: Duration,
    read_timeout: Duration,
    ping: P,
    cancel: &CancellationToken,
) -> Result<ExecStatus, ShellError>
where
    P: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let Some(mut output) = rc.take_output() else {
        return Err(ShellError::Io(std::io::Error::other(
            "command output already consumed",
        )));
    };

    let cmd_deadline = Instant::now() + cmd_timeout;
    let mut read_deadline = Instant::now() + read_timeout;

    loop {
        tokio::select! {
            chunk = output.recv() => match chunk {
                Some(buf) => {
                    sink(&String::from_utf8_lossy(&buf));
                    read_deadline = Instant::now() + read_timeout;
                }
                // Both pipes hit EOF: the remote process ended.
                None => break,
            },
            _ = tokio::time::sleep_until(cmd_deadline) => {
                rc.terminate();
                return Ok(ExecStatus::Timeout);
            }
            _ = tokio::time::sleep_until(read_deadline) => {
                let mut alive = false;
                for _ in 0..PING_RETRIES {
                    if ping().await {
                        alive = true;
                        break;
                    }
                }
                if !alive {
                    rc.terminate();
                    return Err(ShellError::PeerDead);
                }
                read_deadline = Instant::now() + read_timeout;
            }
            _ = cancel.cancelled() => {
                rc.terminate();
                return Ok(ExecStatus::Cancelled);
            }
        }
    }

    let remaining = cmd_deadline.saturating_duration_since(Instant::now());
    match tokio::time::timeout(remaining, rc.wait()).await {
        Ok(Ok(code)) => {
            let stderr = rc.stderr_tail();
            if is_connect_failure(code, &stderr) {
                return Err(ShellError::Unreachable(stderr.trim().to_string()));
            }
            Ok(ExecStatus::Exited(code))
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            rc.terminate();
            Ok(ExecStatus::Timeout)
        }
    }
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
