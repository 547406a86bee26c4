// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One worker: owns a remote shell for its lifetime, executes jobs from
//! the shared queue, counts consecutive failures, and tears its instance
//! down on exit.

use crate::launcher::AddressRx;
use crate::pool::WorkerStates;
use crate::queue::JobQueue;
use ct_adapters::{
    ExecStatus, Instance, LaunchOptions, Provisioner, ShellConnector, ShellError, WorkerConn,
};
use ct_core::{Job, JobResult, TaskConf};
use ct_storage::{ManagerLog, WorkerLog};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Where a worker gets its address.
pub enum AddressSource {
    /// A pre-launched host; the worker does not own the instance.
    Static(String),
    /// The shared launcher channel; the worker owns what it receives.
    Launcher(AddressRx),
    /// Launch one instance inline; used for keep-alive replacements.
    Inline,
}

/// Why a worker's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stop signal observed while idle; normal shutdown.
    Finished,
    /// Strike limit reached.
    StruckOut,
    /// The peer died or became unreachable.
    Retired,
    /// Stop signal observed mid-job.
    Cancelled,
    /// No address could be obtained or setup failed.
    ProvisionFailed,
}

enum JobFlow {
    Continue,
    Exit(WorkerExit),
}

/// A worker task's state and collaborators.
pub struct Worker<C: ShellConnector, P: Provisioner> {
    pub(crate) id: u32,
    pub(crate) conf: Arc<TaskConf>,
    pub(crate) source: AddressSource,
    pub(crate) connector: Arc<C>,
    pub(crate) provisioner: Option<Arc<P>>,
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) results: mpsc::UnboundedSender<JobResult>,
    pub(crate) states: Arc<WorkerStates>,
    pub(crate) wlog: WorkerLog,
    pub(crate) mlog: ManagerLog,
    pub(crate) stop: CancellationToken,
    strikes: u32,
    address: String,
}

impl<C: ShellConnector, P: Provisioner> Worker<C, P> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u32,
        conf: Arc<TaskConf>,
        source: AddressSource,
        connector: Arc<C>,
        provisioner: Option<Arc<P>>,
        queue: Arc<JobQueue>,
        results: mpsc::UnboundedSender<JobResult>,
        states: Arc<WorkerStates>,
        wlog: WorkerLog,
        mlog: ManagerLog,
        stop: CancellationToken,
    ) -> Self {
        Self {
            id,
            conf,
            source,
            connector,
            provisioner,
            queue,
            results,
            states,
            wlog,
            mlog,
            stop,
            strikes: 0,
            address: String::new(),
        }
    }

    /// Status line to both the worker log and the manager log.
    fn status(&self, msg: &str) {
        self.wlog.status(&self.address, msg);
        self.mlog
            .write(&format!("{} ({}): {}\n", self.address, self.id, msg));
    }

    /// Run the worker to completion.
    pub async fn run(mut self) -> WorkerExit {
        let owned = match self.acquire_address().await {
            Ok(acquired) => acquired,
            Err(exit) => return exit,
        };

        let conn = match self.connector.connect(&self.address, &self.stop).await {
            Ok(conn) => conn,
            Err(e) => {
                self.status(&format!("ssh error: {}", e));
                self.destroy_owned(owned.as_ref()).await;
                return match e {
                    ShellError::Cancelled => WorkerExit::Cancelled,
                    _ => WorkerExit::Retired,
                };
            }
        };

        if let Err(e) = self.configure(&conn).await {
            self.status(&format!("setup failed: {}", e));
            self.teardown(&conn, owned.as_ref()).await;
            return match e {
                ShellError::Cancelled => WorkerExit::Cancelled,
                _ => WorkerExit::ProvisionFailed,
            };
        }

        let exit = self.job_loop(&conn).await;
        self.teardown(&conn, owned.as_ref()).await;
        exit
    }

    /// Obtain an address, launching an instance when none is assigned.
    ///
    /// Sets `self.address`; the returned instance is owned by this worker
    /// and must be destroyed during teardown.
    async fn acquire_address(&mut self) -> Result<Option<Instance>, WorkerExit> {
        match &self.source {
            AddressSource::Static(address) => {
                self.address = address.clone();
                self.status("using existing worker");
                Ok(None)
            }
            AddressSource::Launcher(rx) => {
                let rx = Arc::clone(rx);
                let instance = {
                    let mut rx = rx.lock().await;
                    tokio::select! {
                        instance = rx.recv() => instance,
                        _ = self.stop.cancelled() => None,
                    }
                };
                match instance {
                    Some(instance) => {
                        self.address = instance.address.clone();
                        self.status(&format!("launched worker {}", instance.instance_id));
                        Ok(Some(instance))
                    }
                    None => Err(if self.stop.is_cancelled() {
                        WorkerExit::Cancelled
                    } else {
                        WorkerExit::ProvisionFailed
                    }),
                }
            }
            AddressSource::Inline => {
                let Some(provisioner) = self.provisioner.clone() else {
                    return Err(WorkerExit::ProvisionFailed);
                };
                let options = LaunchOptions::from(self.conf.as_ref());
                let (tx, mut rx) = mpsc::channel(1);
                // The provisioner polls the cancel flag itself; an
                // in-flight creation is drained, not abandoned.
                let (outcome, instance) = tokio::join!(
                    provisioner.launch(1, &options, tx, &self.stop),
                    async { rx.recv().await }
                );
                if let Err(e) = outcome {
                    if e.is_fatal() {
                        self.mlog.writeln(&format!("# worker {}: {}", self.id, e));
                    }
                }
                match instance {
                    Some(instance) => {
                        self.address = instance.address.clone();
                        self.status(&format!("launched worker {}", instance.instance_id));
                        Ok(Some(instance))
                    }
                    None => Err(if self.stop.is_cancelled() {
                        WorkerExit::Cancelled
                    } else {
                        WorkerExit::ProvisionFailed
                    }),
                }
            }
        }
    }

    /// Install the session key, apply the overlay, run the setup hook.
    async fn configure(&self, conn: &C::Conn) -> Result<(), ShellError> {
        conn.install_key().await?;
        if let Some(overlay) = &self.conf.overlay {
            conn.apply_overlay(overlay).await?;
        }
        if let Some(pre) = &self.conf.pre {
            conn.run_hook(pre).await?;
        }
        Ok(())
    }

    async fn job_loop(&mut self, conn: &C::Conn) -> WorkerExit {
        loop {
            if self.stop.is_cancelled() {
                return WorkerExit::Finished;
            }

            // Mark busy before popping so the drain barrier never sees an
            // empty queue with a claimed-but-unaccounted job.
            self.states.set_busy(self.id, true);
            let Some(job) = self.queue.try_pop() else {
                self.states.set_busy(self.id, false);
                if !self.queue.wait(&self.stop).await {
                    return WorkerExit::Finished;
                }
                continue;
            };

            let flow = self.run_one_job(conn, job).await;
            self.states.set_busy(self.id, false);
            match flow {
                JobFlow::Continue => {}
                JobFlow::Exit(exit) => return exit,
            }
        }
    }

    /// Execute one job and map its terminal condition to control flow.
    async fn run_one_job(&mut self, conn: &C::Conn, job: Job) -> JobFlow {
        self.status(&job.command);

        let wlog = self.wlog.clone();
        let mut sink = move |chunk: &str| wlog.output(chunk);
        let timeout = Duration::from_secs(self.conf.timeout);

        let outcome = conn
            .execute(&job.command, &mut sink, timeout, &self.stop)
            .await;

        match outcome {
            Ok(ExecStatus::Exited(0)) => {
                self.status(&format!("exit 0 # {}", job.command));
                self.wlog.blank_line();
                self.strikes = 0;
                self.send_result(&job, Some(0));
                JobFlow::Continue
            }
            Ok(ExecStatus::Exited(code)) => {
                self.status(&format!("exit {} # {}", code, job.command));
                self.wlog.blank_line();
                self.strikes += 1;
                if job.can_retry() {
                    self.queue.push(job.retried());
                } else {
                    self.send_result(&job, Some(code));
                }
                self.check_strikes()
            }
            Ok(ExecStatus::Timeout) => {
                self.status(&format!("timeout {} # {}", self.conf.timeout, job.command));
                self.wlog.blank_line();
                self.strikes += 1;
                self.send_result(&job, None);
                self.check_strikes()
            }
            Ok(ExecStatus::Cancelled) => {
                // No result: the job surfaces as PENDING in the session.
                self.status(&format!("terminated # {}", job.command));
                self.wlog.blank_line();
                JobFlow::Exit(WorkerExit::Cancelled)
            }
            Err(ShellError::PeerDead) => {
                self.status(&format!("worker died # {}", job.command));
                self.requeue(job);
                JobFlow::Exit(WorkerExit::Retired)
            }
            Err(ShellError::Unreachable(detail)) => {
                self.status(&format!("worker unreachable # {}", job.command));
                tracing::warn!(worker = self.id, detail = %detail, "transport failure mid-run");
                self.requeue(job);
                JobFlow::Exit(WorkerExit::Retired)
            }
            Err(ShellError::Cancelled) => {
                self.status(&format!("terminated # {}", job.command));
                JobFlow::Exit(WorkerExit::Cancelled)
            }
            Err(e) => {
                self.status(&format!("error: {} # {}", e, job.command));
                self.requeue(job);
                JobFlow::Exit(WorkerExit::Retired)
            }
        }
    }

    /// Retire this worker when the strike limit is reached.
    fn check_strikes(&self) -> JobFlow {
        if self.conf.strikes > 0 && self.strikes >= self.conf.strikes {
            self.status(&format!(
                "struck out after {} consecutive failures",
                self.strikes
            ));
            JobFlow::Exit(WorkerExit::StruckOut)
        } else {
            JobFlow::Continue
        }
    }

    /// Requeue an interrupted job, honoring its retry budget. A job out
    /// of retries is left unqueued and surfaces as PENDING.
    fn requeue(&self, job: Job) {
        if job.can_retry() {
            self.queue.push(job.retried());
        }
    }

    fn send_result(&self, job: &Job, code: Option<i32>) {
        let _ = self.results.send(JobResult::new(job.command.clone(), code));
    }

    /// Best-effort teardown: cleanup hook, key removal, instance destroy.
    async fn teardown(&self, conn: &C::Conn, owned: Option<&Instance>) {
        if let Some(post) = &self.conf.post {
            if let Err(e) = conn.run_hook(post).await {
                self.status(&format!("cleanup command failed: {}", e));
            }
        }
        if let Err(e) = conn.remove_key().await {
            tracing::warn!(worker = self.id, error = %e, "failed to remove session key");
        }
        self.destroy_owned(owned).await;
    }

    /// Destroy the owned instance, if any. Failures are logged; the
    /// watchdog's reaper covers instances that outlive us.
    async fn destroy_owned(&self, owned: Option<&Instance>) {
        let Some(instance) = owned else { return };
        let Some(provisioner) = &self.provisioner else {
            self.status(&format!("can't destroy worker {}", instance.instance_id));
            return;
        };

        match provisioner.destroy(&[instance.address.clone()]).await {
            Ok(destroyed) if destroyed.iter().any(|i| i.address == instance.address) => {
                self.status(&format!("destroyed worker {}", instance.instance_id));
            }
            Ok(_) => {
                self.status(&format!("failed to destroy worker {}", instance.instance_id));
            }
            Err(e) => {
                self.status(&format!(
                    "failed to destroy worker {}: {}",
                    instance.instance_id, e
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
