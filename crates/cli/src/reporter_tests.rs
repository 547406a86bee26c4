// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn outcome() -> RunOutcome {
    RunOutcome {
        total: 3,
        succeeded: 2,
        pending: 0,
        timeouts: 1,
        errors: 0,
        elapsed_secs: 42,
    }
}

#[test]
fn parses_the_three_hook_kinds() {
    assert_eq!(
        parse("sh: notify-send done").unwrap(),
        Hook::Sh("notify-send done".to_string())
    );
    assert_eq!(
        parse("py: print('done')").unwrap(),
        Hook::Py("print('done')".to_string())
    );
    assert_eq!(
        parse("mail: ops@example.com dev@example.com").unwrap(),
        Hook::Mail(vec![
            "ops@example.com".to_string(),
            "dev@example.com".to_string()
        ])
    );
}

#[test]
fn rejects_malformed_hooks() {
    assert!(parse("no-colon-here").is_err());
    assert!(parse("sh:").is_err());
    assert!(parse("ftp: get it").is_err());
}

#[tokio::test]
async fn sh_hook_runs_with_summary_environment() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = ct_storage::Session::create(dir.path()).unwrap();
    session.jobs.update(&["echo 1".to_string()], &[]).unwrap();

    let marker = dir.path().join("marker");
    let conf = TaskConf {
        command: Some("echo".into()),
        report: Some(format!(
            "sh: echo \"$CLOUDTASK_SESSION_ID $CLOUDTASK_SUCCEEDED/$CLOUDTASK_TOTAL\" > {}",
            marker.display()
        )),
        ..Default::default()
    };

    report(&session, &conf, &outcome()).await.unwrap();

    let content = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(content.trim(), format!("{} 2/3", session.id));
}

#[tokio::test]
async fn failing_hook_surfaces_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let session = ct_storage::Session::create(dir.path()).unwrap();
    let conf = TaskConf {
        report: Some("sh: exit 3".into()),
        ..Default::default()
    };

    assert!(report(&session, &conf, &outcome()).await.is_err());
}

#[tokio::test]
async fn absent_hook_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let session = ct_storage::Session::create(dir.path()).unwrap();
    let conf = TaskConf::default();
    report(&session, &conf, &outcome()).await.unwrap();
}
