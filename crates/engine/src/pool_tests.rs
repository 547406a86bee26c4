// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ct_adapters::{FakeBehavior, FakeProvisioner, FakeShell};
use ct_core::Job;
use tempfile::TempDir;

struct Rig {
    dir: TempDir,
    shell: Arc<FakeShell>,
    provisioner: Arc<FakeProvisioner>,
}

impl Rig {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            shell: Arc::new(FakeShell::new()),
            provisioner: Arc::new(FakeProvisioner::new([
                "10.0.2.1", "10.0.2.2", "10.0.2.3", "10.0.2.4",
            ])),
        }
    }

    fn start(
        &self,
        conf: TaskConf,
        split: u32,
    ) -> (
        Pool<FakeShell, FakeProvisioner>,
        mpsc::UnboundedReceiver<JobResult>,
    ) {
        Pool::start(
            PoolConfig {
                conf: Arc::new(conf),
                split,
                workers_dir: self.dir.path().to_path_buf(),
                mlog: ManagerLog::new(self.dir.path().join("log")),
            },
            Arc::clone(&self.shell),
            Some(Arc::clone(&self.provisioner)),
        )
    }
}

async fn drain_and_collect(
    pool: Pool<FakeShell, FakeProvisioner>,
    mut results_rx: mpsc::UnboundedReceiver<JobResult>,
) -> Vec<JobResult> {
    tokio::time::timeout(Duration::from_secs(10), pool.wait_for_drain())
        .await
        .unwrap();
    pool.stop();
    pool.join().await;

    let mut results = Vec::new();
    while let Some(result) = results_rx.recv().await {
        results.push(result);
    }
    results
}

#[tokio::test]
async fn distributes_jobs_across_static_workers() {
    let rig = Rig::new();
    let conf = TaskConf {
        workers: vec!["10.0.0.1".into(), "10.0.0.2".into()],
        split: 2,
        ..Default::default()
    };
    let (pool, results_rx) = rig.start(conf, 2);

    for i in 1..=4 {
        pool.queue().push(Job::new(format!("echo {}", i), 0));
    }

    let results = drain_and_collect(pool, results_rx).await;
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.code == Some(0)));
    assert_eq!(rig.shell.executions().len(), 4);
    // Nothing was launched: both hosts were pre-provisioned.
    assert!(rig.provisioner.launched().is_empty());
}

#[tokio::test]
async fn launches_the_fleet_remainder() {
    let rig = Rig::new();
    let conf = TaskConf {
        workers: vec!["10.0.0.1".into()],
        split: 3,
        hub_apikey: Some("key".into()),
        ..Default::default()
    };
    let (pool, results_rx) = rig.start(conf, 3);

    for i in 1..=6 {
        pool.queue().push(Job::new(format!("echo {}", i), 0));
    }

    let results = drain_and_collect(pool, results_rx).await;
    assert_eq!(results.len(), 6);
    // Two instances launched for the remainder, both destroyed on exit.
    assert_eq!(rig.provisioner.launched().len(), 2);
    assert!(rig.provisioner.leaked().is_empty());
}

#[tokio::test]
async fn drain_barrier_waits_out_retry_requeues() {
    let rig = Rig::new();
    rig.shell.on("false", FakeBehavior::Exit(1));
    let conf = TaskConf {
        workers: vec!["10.0.0.1".into()],
        split: 1,
        ..Default::default()
    };
    let (pool, results_rx) = rig.start(conf, 1);

    pool.queue().push(Job::new("false", 2));

    let results = drain_and_collect(pool, results_rx).await;
    // The barrier saw the requeues: all three attempts ran before drain.
    assert_eq!(rig.shell.executions().len(), 3);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].code, Some(1));
}

#[tokio::test]
async fn keepalive_respawns_after_strike_out() {
    let rig = Rig::new();
    rig.shell.on("false", FakeBehavior::Exit(1));
    let conf = TaskConf {
        workers: vec!["10.0.0.1".into(), "10.0.0.2".into()],
        split: 2,
        strikes: 1,
        hub_apikey: Some("key".into()),
        ..Default::default()
    };
    let (pool, results_rx) = rig.start(conf, 2);

    for i in 1..=4 {
        pool.queue().push(Job::new(format!("false {}", i), 0));
    }

    let results = drain_and_collect(pool, results_rx).await;
    // Every job finished despite each worker striking out after one job.
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.code == Some(1)));

    let mlog = std::fs::read_to_string(rig.dir.path().join("log")).unwrap();
    assert!(mlog.contains("respawned worker"));
}

#[tokio::test]
async fn stop_interrupts_hung_jobs_and_keeps_the_rest_queued() {
    let rig = Rig::new();
    rig.shell.on("spin", FakeBehavior::HangUntilCancel);
    let conf = TaskConf {
        workers: vec!["10.0.0.1".into()],
        split: 1,
        ..Default::default()
    };
    let (pool, mut results_rx) = rig.start(conf, 1);

    pool.queue().push(Job::new("spin a", 0));
    pool.queue().push(Job::new("spin b", 0));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let queue = Arc::clone(pool.queue());
    pool.stop();
    pool.join().await;

    // The in-flight job was terminated without a result; the other never
    // left the queue.
    assert!(results_rx.recv().await.is_none());
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn control_handle_reports_and_kills() {
    let rig = Rig::new();
    rig.shell.on("spin", FakeBehavior::HangUntilCancel);
    let conf = TaskConf {
        workers: vec!["10.0.0.1".into()],
        split: 1,
        ..Default::default()
    };
    let (pool, _results_rx) = rig.start(conf, 1);
    pool.queue().push(Job::new("spin", 0));

    let control = pool.control();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(control.active_workers(), 1);

    control.terminate();
    pool.join().await;
    assert_eq!(control.active_workers(), 0);
}
