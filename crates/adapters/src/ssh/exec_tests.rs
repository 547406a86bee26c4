// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::ssh::command::RunningCommand;

fn sh(script: &str) -> RunningCommand {
    let argv = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
    RunningCommand::spawn(&argv, None).unwrap()
}

const LONG: Duration = Duration::from_secs(30);

async fn run(
    rc: RunningCommand,
    cmd_timeout: Duration,
    read_timeout: Duration,
    alive: bool,
    cancel: &CancellationToken,
) -> (Result<ExecStatus, ShellError>, String) {
    let mut captured = String::new();
    let result = drive(
        rc,
        &mut |chunk: &str| captured.push_str(chunk),
        cmd_timeout,
        read_timeout,
        || async move { alive },
        cancel,
    )
    .await;
    (result, captured)
}

#[tokio::test]
async fn streams_output_and_reports_exit() {
    let cancel = CancellationToken::new();
    let (result, captured) = run(sh("echo one; echo two"), LONG, LONG, true, &cancel).await;

    assert!(matches!(result, Ok(ExecStatus::Exited(0))));
    assert_eq!(captured, "one\ntwo\n");
}

#[tokio::test]
async fn reports_nonzero_exit() {
    let cancel = CancellationToken::new();
    let (result, _) = run(sh("exit 3"), LONG, LONG, true, &cancel).await;
    assert!(matches!(result, Ok(ExecStatus::Exited(3))));
}

#[tokio::test]
async fn whole_command_timeout_terminates() {
    let cancel = CancellationToken::new();
    let (result, _) = run(
        sh("sleep 30"),
        Duration::from_millis(100),
        LONG,
        true,
        &cancel,
    )
    .await;
    assert!(matches!(result, Ok(ExecStatus::Timeout)));
}

#[tokio::test]
async fn idle_stream_with_dead_peer_is_peer_death() {
    let cancel = CancellationToken::new();
    let (result, _) = run(
        sh("sleep 30"),
        LONG,
        Duration::from_millis(100),
        false,
        &cancel,
    )
    .await;
    assert!(matches!(result, Err(ShellError::PeerDead)));
}

#[tokio::test]
async fn idle_stream_with_live_peer_keeps_reading() {
    let cancel = CancellationToken::new();
    // Quiet for longer than the read-idle window, then produces output.
    let (result, captured) = run(
        sh("sleep 1; echo done"),
        LONG,
        Duration::from_millis(200),
        true,
        &cancel,
    )
    .await;

    assert!(matches!(result, Ok(ExecStatus::Exited(0))));
    assert_eq!(captured, "done\n");
}

#[tokio::test]
async fn cancellation_terminates_the_command() {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let (result, _) = run(sh("sleep 30"), LONG, LONG, true, &cancel).await;
    assert!(matches!(result, Ok(ExecStatus::Cancelled)));
}

#[tokio::test]
async fn transport_failure_is_unreachable_not_job_failure() {
    let cancel = CancellationToken::new();
    let (result, _) = run(
        sh("echo 'ssh: connect to host 10.0.0.1 port 22: Connection timed out' >&2; exit 255"),
        LONG,
        LONG,
        true,
        &cancel,
    )
    .await;
    assert!(matches!(result, Err(ShellError::Unreachable(_))));
}

#[tokio::test]
async fn plain_255_exit_is_a_job_exit() {
    let cancel = CancellationToken::new();
    let (result, _) = run(sh("exit 255"), LONG, LONG, true, &cancel).await;
    assert!(matches!(result, Ok(ExecStatus::Exited(255))));
}
