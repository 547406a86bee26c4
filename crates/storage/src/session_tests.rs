// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn create_allocates_monotonic_ids() {
    let root = tempfile::tempdir().unwrap();

    let first = Session::create(root.path()).unwrap();
    let second = Session::create(root.path()).unwrap();

    assert_eq!(first.id, 1);
    assert_eq!(second.id, 2);
    assert!(first.paths().workers().is_dir());
    assert!(second.paths().root().is_dir());
}

#[test]
fn create_skips_over_existing_directories() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("7")).unwrap();
    fs::create_dir(root.path().join("notasession")).unwrap();

    let session = Session::create(root.path()).unwrap();
    assert_eq!(session.id, 8);
}

#[test]
fn open_missing_session_fails() {
    let root = tempfile::tempdir().unwrap();
    assert!(matches!(
        Session::open(root.path(), 42),
        Err(StorageError::NoSuchSession(42))
    ));
}

#[test]
fn open_loads_persisted_jobs() {
    let root = tempfile::tempdir().unwrap();
    let session = Session::create(root.path()).unwrap();
    fs::write(
        session.paths().jobs(),
        "EXIT=0\techo 1\nPENDING\techo 2\nTIMEOUT\techo 3\n",
    )
    .unwrap();

    let reopened = Session::open(root.path(), session.id).unwrap();
    assert_eq!(reopened.jobs.pending, vec!["echo 2"]);
    assert_eq!(reopened.jobs.finished.len(), 2);
}

#[test]
fn conf_snapshot_round_trips_without_apikey() {
    let root = tempfile::tempdir().unwrap();
    let session = Session::create(root.path()).unwrap();

    let mut conf = ct_core::TaskConf {
        command: Some("echo".into()),
        ..Default::default()
    };
    conf.hub_apikey = Some("secret".into());
    session.save_conf(&conf).unwrap();

    let raw = fs::read_to_string(session.paths().conf()).unwrap();
    assert!(!raw.contains("secret"));

    let loaded = session.load_conf().unwrap();
    assert_eq!(loaded.command.as_deref(), Some("echo"));
    assert_eq!(loaded.hub_apikey, None);
}
