// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Idle-watchdog and zombie-instance reaper.
//!
//! The watchdog observes per-worker log mtimes. When the whole session
//! has been idle for twice the job timeout it escalates: stop signal to
//! every worker, a grace period, then a hard kill of survivors. Workers
//! remain responsible for destroying their own instances during shutdown;
//! whatever they leak is reaped here after the run, by parsing the
//! launched/destroyed ledger lines out of the worker logs.

use crate::ledger;
use ct_adapters::{Provisioner, Retrier, WorkerTable};
use ct_storage::{ManagerLog, WorkerLog};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Grace given to workers between the stop signal and the hard kill.
pub const SIGTERM_TIMEOUT: Duration = Duration::from_secs(300);

/// Retry window for destroying zombie instances.
pub const DESTROY_ERROR_TIMEOUT: Duration = Duration::from_secs(3 * 3600);

/// Sleep between zombie-destroy retries.
pub const DESTROY_ERROR_SLEEP: Duration = Duration::from_secs(300);

/// Directed worker termination, implemented by the pool.
pub trait PoolControl: Send + Sync {
    /// Broadcast the stop signal.
    fn terminate(&self);
    /// Hard-kill workers that survived the grace period.
    fn kill_survivors(&self);
    fn active_workers(&self) -> usize;
}

/// Watchdog tuning; defaults match the production constants.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Per-job timeout; the idle threshold is twice this.
    pub job_timeout: Duration,
    pub sigterm_grace: Duration,
    pub poll: Duration,
    pub destroy_retry_window: Duration,
    pub destroy_retry_sleep: Duration,
}

impl WatchdogConfig {
    pub fn new(job_timeout_secs: u64) -> Self {
        Self {
            job_timeout: Duration::from_secs(job_timeout_secs),
            sigterm_grace: SIGTERM_TIMEOUT,
            poll: Duration::from_secs(1),
            destroy_retry_window: DESTROY_ERROR_TIMEOUT,
            destroy_retry_sleep: DESTROY_ERROR_SLEEP,
        }
    }
}

/// Handle to the running watchdog task.
pub struct Watchdog {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Watchdog {
    /// Start watching. The watchdog runs until [`Watchdog::stop`] or
    /// until it escalates; either way it reaps zombies before exiting.
    pub fn spawn<P: Provisioner>(
        config: WatchdogConfig,
        workers_dir: PathBuf,
        mlog: ManagerLog,
        table: Arc<dyn WorkerTable>,
        control: Arc<dyn PoolControl>,
        provisioner: Option<Arc<P>>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            watch(&config, &workers_dir, &mlog, &*table, &*control, &token).await;
            cleanup(&config, &workers_dir, &mlog, provisioner.as_deref()).await;
        });
        Self { handle, shutdown }
    }

    /// Stop watching and wait for the final cleanup pass.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

async fn watch(
    config: &WatchdogConfig,
    workers_dir: &Path,
    mlog: &ManagerLog,
    table: &dyn WorkerTable,
    control: &dyn PoolControl,
    shutdown: &CancellationToken,
) {
    let idle_limit = 2 * config.job_timeout;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.poll) => {}
            _ = shutdown.cancelled() => return,
        }

        let Some(idle) = session_idle_time(workers_dir, table) else {
            continue;
        };
        if idle > idle_limit {
            mlog.writeln(&format!(
                "# watchdog: session idle after {} seconds",
                idle.as_secs()
            ));
            escalate(config, mlog, control, shutdown).await;
            return;
        }
    }
}

/// Time since the freshest active worker log was written.
///
/// Returns `None` while no active worker has a log file yet.
fn session_idle_time(workers_dir: &Path, table: &dyn WorkerTable) -> Option<Duration> {
    let entries = std::fs::read_dir(workers_dir).ok()?;
    let mut freshest: Option<SystemTime> = None;

    for entry in entries.flatten() {
        let Some(worker_id) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if !table.is_active(worker_id) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(mtime) = metadata.modified() else {
            continue;
        };
        if freshest.map_or(true, |f| mtime > f) {
            freshest = Some(mtime);
        }
    }

    SystemTime::now().duration_since(freshest?).ok()
}

/// Stop signal, grace period, then hard kill.
///
/// Instances are not destroyed here: workers own their teardown, and the
/// reaper covers whatever they leak.
async fn escalate(
    config: &WatchdogConfig,
    mlog: &ManagerLog,
    control: &dyn PoolControl,
    shutdown: &CancellationToken,
) {
    mlog.writeln("# watchdog: terminating workers");
    control.terminate();

    let deadline = tokio::time::Instant::now() + config.sigterm_grace;
    while tokio::time::Instant::now() < deadline {
        if control.active_workers() == 0 {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(config.poll) => {}
            _ = shutdown.cancelled() => break,
        }
    }

    if control.active_workers() > 0 {
        mlog.writeln("# watchdog: killing unresponsive workers");
        control.kill_survivors();
    }
}

/// Destroy instances recorded as launched but never destroyed.
async fn cleanup<P: Provisioner>(
    config: &WatchdogConfig,
    workers_dir: &Path,
    mlog: &ManagerLog,
    provisioner: Option<&P>,
) {
    let ledgers = match ledger::scan(workers_dir) {
        Ok(ledgers) => ledgers,
        Err(e) => {
            tracing::warn!(error = %e, "watchdog could not scan worker logs");
            return;
        }
    };

    let zombies: Vec<_> = ledgers.into_iter().filter(|l| l.is_zombie()).collect();
    if zombies.is_empty() {
        return;
    }

    let mut ids: Vec<String> = zombies.iter().filter_map(|z| z.launched.clone()).collect();
    ids.sort();
    mlog.writeln(&format!(
        "# watchdog: destroying zombie instances: {}",
        ids.join(" ")
    ));

    let Some(provisioner) = provisioner else {
        mlog.writeln("# watchdog: no provisioner credentials, can't destroy zombies");
        return;
    };

    let addresses: Vec<String> = zombies.iter().map(|z| z.address.clone()).collect();
    let retrier = Retrier::deadline(config.destroy_retry_window, config.destroy_retry_sleep);
    let destroyed = match retrier
        .run(|| provisioner.destroy(&addresses), |e| !e.is_fatal())
        .await
    {
        Ok(destroyed) => destroyed,
        Err(e) => {
            mlog.writeln(&format!("# watchdog: failed to destroy zombies: {}", e));
            return;
        }
    };

    let mut destroyed_ids: Vec<String> =
        destroyed.iter().map(|i| i.instance_id.clone()).collect();
    destroyed_ids.sort();
    mlog.writeln(&format!(
        "# watchdog: destroyed zombie instances: {}",
        destroyed_ids.join(" ")
    ));

    // Record the destruction in each owning worker's log so the ledger
    // closes out.
    for zombie in &zombies {
        let Some(instance_id) = &zombie.launched else {
            continue;
        };
        if destroyed.iter().any(|i| &i.instance_id == instance_id) {
            let wlog = WorkerLog::new(workers_dir.to_path_buf(), zombie.worker_id);
            wlog.status("watchdog", &format!("destroyed worker {}", instance_id));
        }
    }
}

#[cfg(test)]
#[path = "watchdog_tests.rs"]
mod tests;
