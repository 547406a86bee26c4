// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const LAUNCHED_AND_DESTROYED: &str = "\
# 2026-03-01 10:00:00 [10.0.0.5] launched worker i-00000001
# 2026-03-01 10:00:05 [10.0.0.5] echo hello
hello
# 2026-03-01 10:00:06 [10.0.0.5] exit 0 # echo hello
# 2026-03-01 10:00:07 [10.0.0.5] destroyed worker i-00000001
";

#[test]
fn parses_a_closed_ledger() {
    let ledger = parse_worker_log(4, LAUNCHED_AND_DESTROYED);
    assert_eq!(ledger.worker_id, 4);
    assert_eq!(ledger.address, "10.0.0.5");
    assert_eq!(ledger.launched.as_deref(), Some("i-00000001"));
    assert_eq!(ledger.destroyed.as_deref(), Some("i-00000001"));
    assert!(!ledger.is_zombie());
}

#[test]
fn launched_without_destroyed_is_a_zombie() {
    let content = "# 2026-03-01 10:00:00 [10.0.0.5] launched worker i-00000002\n";
    let ledger = parse_worker_log(1, content);
    assert!(ledger.is_zombie());
    assert_eq!(ledger.launched.as_deref(), Some("i-00000002"));
}

#[test]
fn static_worker_has_no_ledger_entries() {
    let content = "\
# 2026-03-01 10:00:00 [10.0.0.7] using existing worker
# 2026-03-01 10:00:01 [10.0.0.7] echo hi
";
    let ledger = parse_worker_log(2, content);
    assert_eq!(ledger.launched, None);
    assert!(!ledger.is_zombie());
}

#[test]
fn mismatched_destroy_does_not_close_the_ledger() {
    let content = "\
# 2026-03-01 10:00:00 [10.0.0.5] launched worker i-00000003
# 2026-03-01 10:00:07 [10.0.0.5] destroyed worker i-99999999
";
    let ledger = parse_worker_log(1, content);
    assert!(ledger.is_zombie());
}

#[test]
fn command_output_does_not_confuse_the_parser() {
    let content = "\
# 2026-03-01 10:00:00 [10.0.0.5] launched worker i-00000004
building...
launched worker i-fake-from-output
# 2026-03-01 10:00:07 [10.0.0.5] destroyed worker i-00000004
";
    let ledger = parse_worker_log(1, content);
    assert_eq!(ledger.launched.as_deref(), Some("i-00000004"));
    assert!(!ledger.is_zombie());
}

#[test]
fn scan_reads_numeric_log_files_only() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("1"),
        "# 2026-03-01 10:00:00 [10.0.0.5] launched worker i-1\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("2"), "no status lines here\n").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored\n").unwrap();

    let ledgers = scan(dir.path()).unwrap();
    assert_eq!(ledgers.len(), 2);
    assert!(ledgers[0].is_zombie());
    assert!(!ledgers[1].is_zombie());
}
