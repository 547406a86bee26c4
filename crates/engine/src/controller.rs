// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller: wires the session, pool, launcher, and watchdog
//! together, feeds the job queue, and persists the final job states.

use crate::pool::{Pool, PoolConfig};
use crate::watchdog::{Watchdog, WatchdogConfig};
use crate::EngineError;
use ct_adapters::{Provisioner, ShellConnector};
use ct_core::{Job, TaskConf};
use ct_storage::{timestamp, ManagerLog, Session};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Final accounting of one run, for the summary line and reporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub total: usize,
    pub succeeded: usize,
    pub pending: usize,
    pub timeouts: usize,
    pub errors: usize,
    pub elapsed_secs: u64,
}

impl RunOutcome {
    /// True when every job ended `EXIT=0`.
    pub fn ok(&self) -> bool {
        self.succeeded == self.total
    }
}

/// Execute `jobs` against the session and return the final accounting.
///
/// `cancel` is the caller's termination signal (the CLI wires SIGINT and
/// SIGTERM to it). On every path - completion, cancellation, watchdog
/// escalation - the session's jobs file ends up with exactly one line
/// per submitted job.
pub async fn run_task<C: ShellConnector, P: Provisioner>(
    session: &mut Session,
    conf: TaskConf,
    jobs: Vec<String>,
    connector: Arc<C>,
    provisioner: Option<Arc<P>>,
    cancel: CancellationToken,
) -> Result<RunOutcome, EngineError> {
    let started = Instant::now();
    let mlog = ManagerLog::new(session.paths().log());
    mlog.writeln(&format!(
        "{} :: session {} (pid {})\n",
        timestamp(),
        session.id,
        std::process::id()
    ));

    let split = effective_split(&conf, jobs.len());
    let conf = Arc::new(conf);

    let (pool, mut results_rx) = Pool::start(
        PoolConfig {
            conf: Arc::clone(&conf),
            split,
            workers_dir: session.paths().workers(),
            mlog: mlog.clone(),
        },
        connector,
        provisioner.clone(),
    );

    // Drain results as they arrive so the channel never backs up.
    let collector = tokio::spawn(async move {
        let mut results = Vec::new();
        while let Some(result) = results_rx.recv().await {
            results.push(result);
        }
        results
    });

    let watchdog = Watchdog::spawn(
        WatchdogConfig::new(conf.timeout),
        session.paths().workers(),
        mlog.clone(),
        pool.states(),
        pool.control(),
        provisioner,
    );

    for command in &jobs {
        pool.queue().push(Job::new(command.clone(), conf.retries));
    }

    tokio::select! {
        _ = pool.wait_for_drain() => {}
        _ = cancel.cancelled() => {
            mlog.writeln("# caught termination signal");
        }
    }

    // One-shot stop: idle workers exit, busy workers terminate their
    // in-flight command and fall through teardown.
    pool.stop();
    pool.join().await;

    let results = collector.await.unwrap_or_default();
    watchdog.stop().await;

    session.jobs.update(&jobs, &results)?;

    let outcome = RunOutcome {
        total: session.jobs.total(),
        succeeded: session.jobs.succeeded(),
        pending: session.jobs.pending.len(),
        timeouts: session.jobs.timeouts(),
        errors: session.jobs.errors(),
        elapsed_secs: started.elapsed().as_secs(),
    };

    mlog.writeln(&format!(
        "\n{} :: session {} ({} seconds): {}/{} !OK - {} pending, {} timeouts, {} errors, {} OK",
        timestamp(),
        session.id,
        outcome.elapsed_secs,
        outcome.total - outcome.succeeded,
        outcome.total,
        outcome.pending,
        outcome.timeouts,
        outcome.errors,
        outcome.succeeded
    ));

    Ok(outcome)
}

/// Cap the configured width to the number of jobs.
fn effective_split(conf: &TaskConf, job_count: usize) -> u32 {
    conf.split.max(1).min(job_count.max(1) as u32)
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
