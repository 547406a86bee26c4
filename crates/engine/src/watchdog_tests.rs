// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ct_adapters::{FakeProvisioner, FixedWorkerTable, LaunchOptions};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct FakeControl {
    active: AtomicUsize,
    terminated: AtomicBool,
    killed: AtomicBool,
    /// Whether terminate() drops the active count to zero.
    workers_obey: bool,
}

impl FakeControl {
    fn new(active: usize, workers_obey: bool) -> Self {
        Self {
            active: AtomicUsize::new(active),
            terminated: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            workers_obey,
        }
    }
}

impl PoolControl for FakeControl {
    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        if self.workers_obey {
            self.active.store(0, Ordering::SeqCst);
        }
    }

    fn kill_survivors(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.active.store(0, Ordering::SeqCst);
    }

    fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

fn fast_config() -> WatchdogConfig {
    WatchdogConfig {
        job_timeout: Duration::from_millis(50),
        sigterm_grace: Duration::from_millis(100),
        poll: Duration::from_millis(10),
        destroy_retry_window: Duration::from_millis(100),
        destroy_retry_sleep: Duration::from_millis(10),
    }
}

fn old_mtime(path: &std::path::Path) {
    let file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(3600))
        .unwrap();
}

#[test]
fn idle_time_considers_only_active_worker_logs() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("1"), "stale\n").unwrap();
    std::fs::write(dir.path().join("2"), "fresh\n").unwrap();
    std::fs::write(dir.path().join("README"), "not a worker\n").unwrap();
    old_mtime(&dir.path().join("1"));

    // Only the stale worker is active: the session looks idle.
    let table = FixedWorkerTable::new([1]);
    let idle = session_idle_time(dir.path(), &table).unwrap();
    assert!(idle > Duration::from_secs(1800));

    // With the fresh worker active too, the session looks busy.
    let table = FixedWorkerTable::new([1, 2]);
    let idle = session_idle_time(dir.path(), &table).unwrap();
    assert!(idle < Duration::from_secs(60));
}

#[test]
fn no_active_workers_means_no_idle_reading() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("1"), "x\n").unwrap();
    let table = FixedWorkerTable::new([]);
    assert!(session_idle_time(dir.path(), &table).is_none());
}

#[tokio::test]
async fn escalates_when_the_session_stalls() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("1"), "x\n").unwrap();
    old_mtime(&dir.path().join("1"));

    let control = Arc::new(FakeControl::new(1, true));
    let watchdog = Watchdog::spawn::<FakeProvisioner>(
        fast_config(),
        dir.path().to_path_buf(),
        ManagerLog::new(dir.path().join("mlog")),
        Arc::new(FixedWorkerTable::new([1])),
        Arc::clone(&control) as Arc<dyn PoolControl>,
        None,
    );

    // The watchdog escalates on its own; give it a moment.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(control.terminated.load(Ordering::SeqCst));
    assert!(!control.killed.load(Ordering::SeqCst));
    watchdog.stop().await;

    let mlog = std::fs::read_to_string(dir.path().join("mlog")).unwrap();
    assert!(mlog.contains("session idle after"));
}

#[tokio::test]
async fn escalation_kills_workers_that_ignore_the_stop() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("1"), "x\n").unwrap();
    old_mtime(&dir.path().join("1"));

    let control = Arc::new(FakeControl::new(1, false));
    let watchdog = Watchdog::spawn::<FakeProvisioner>(
        fast_config(),
        dir.path().to_path_buf(),
        ManagerLog::new(dir.path().join("mlog")),
        Arc::new(FixedWorkerTable::new([1])),
        Arc::clone(&control) as Arc<dyn PoolControl>,
        None,
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(control.terminated.load(Ordering::SeqCst));
    assert!(control.killed.load(Ordering::SeqCst));
    watchdog.stop().await;
}

#[tokio::test]
async fn a_live_session_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("1"), "x\n").unwrap();

    let control = Arc::new(FakeControl::new(1, true));
    let config = WatchdogConfig {
        // Generous threshold: the session below is never idle that long.
        job_timeout: Duration::from_secs(5),
        ..fast_config()
    };
    let watchdog = Watchdog::spawn::<FakeProvisioner>(
        config,
        dir.path().to_path_buf(),
        ManagerLog::new(dir.path().join("mlog")),
        Arc::new(FixedWorkerTable::new([1])),
        Arc::clone(&control) as Arc<dyn PoolControl>,
        None,
    );

    // Keep the log fresh while the watchdog polls.
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let wlog = WorkerLog::new(dir.path().to_path_buf(), 1);
        wlog.output("tick\n");
    }

    assert!(!control.terminated.load(Ordering::SeqCst));
    watchdog.stop().await;
}

#[tokio::test]
async fn reaper_destroys_instances_launched_but_not_destroyed() {
    let dir = tempfile::tempdir().unwrap();

    // A worker launched an instance and died before destroying it.
    let provisioner = Arc::new(FakeProvisioner::new(["10.0.3.1"]));
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    provisioner
        .launch(1, &LaunchOptions::default(), tx, &CancellationToken::new())
        .await
        .unwrap();
    let instance = rx.recv().await.unwrap();

    let wlog = WorkerLog::new(dir.path().to_path_buf(), 7);
    wlog.status(
        &instance.address,
        &format!("launched worker {}", instance.instance_id),
    );

    let control = Arc::new(FakeControl::new(0, true));
    let watchdog = Watchdog::spawn(
        fast_config(),
        dir.path().to_path_buf(),
        ManagerLog::new(dir.path().join("mlog")),
        Arc::new(FixedWorkerTable::new([])),
        control as Arc<dyn PoolControl>,
        Some(Arc::clone(&provisioner)),
    );
    watchdog.stop().await;

    assert_eq!(provisioner.destroyed(), vec![instance.address.clone()]);

    // The reaper closed the ledger in the owning worker's log.
    let content = std::fs::read_to_string(dir.path().join("7")).unwrap();
    assert!(content.contains(&format!(
        "[watchdog] destroyed worker {}",
        instance.instance_id
    )));

    let mlog = std::fs::read_to_string(dir.path().join("mlog")).unwrap();
    assert!(mlog.contains("destroying zombie instances"));
    assert!(mlog.contains("destroyed zombie instances"));
}

#[tokio::test]
async fn reaper_ignores_sessions_with_closed_ledgers() {
    let dir = tempfile::tempdir().unwrap();
    let wlog = WorkerLog::new(dir.path().to_path_buf(), 1);
    wlog.status("10.0.3.1", "launched worker i-aaaa");
    wlog.status("10.0.3.1", "destroyed worker i-aaaa");

    let provisioner = Arc::new(FakeProvisioner::new(["10.0.3.1"]));
    let control = Arc::new(FakeControl::new(0, true));
    let watchdog = Watchdog::spawn(
        fast_config(),
        dir.path().to_path_buf(),
        ManagerLog::new(dir.path().join("mlog")),
        Arc::new(FixedWorkerTable::new([])),
        control as Arc<dyn PoolControl>,
        Some(Arc::clone(&provisioner)),
    );
    watchdog.stop().await;

    assert!(provisioner.destroyed().is_empty());
}
