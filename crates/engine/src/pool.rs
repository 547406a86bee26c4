// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixed-width worker pool over a shared job queue.
//!
//! Workers run as tasks with their own stop tokens (children of the pool
//! stop token). A supervisor collects worker exits and, in keep-alive
//! mode, respawns replacements while jobs remain so a strike-out does not
//! shrink the fleet to zero.

use crate::launcher::{self, AddressRx};
use crate::queue::JobQueue;
use crate::watchdog::PoolControl;
use crate::worker::{AddressSource, Worker, WorkerExit};
use ct_adapters::{Instance, LaunchOptions, Provisioner, ShellConnector, WorkerTable};
use ct_core::{JobResult, TaskConf};
use ct_storage::{ManagerLog, WorkerLog};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Poll interval for the drain barrier and escalation waits.
const DRAIN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Slot {
    busy: bool,
    alive: bool,
    token: CancellationToken,
    abort: tokio::task::AbortHandle,
}

/// Liveness and busyness of every worker the pool ever started.
#[derive(Debug, Default)]
pub struct WorkerStates {
    slots: Mutex<HashMap<u32, Slot>>,
}

impl WorkerStates {
    fn register(&self, id: u32, token: CancellationToken, abort: tokio::task::AbortHandle) {
        self.slots.lock().insert(
            id,
            Slot {
                busy: false,
                alive: true,
                token,
                abort,
            },
        );
    }

    /// Register a slot without a live task behind it.
    #[cfg(test)]
    pub(crate) fn register_for_tests(&self, id: u32) {
        let handle = tokio::spawn(async {});
        self.register(id, CancellationToken::new(), handle.abort_handle());
    }

    pub(crate) fn set_busy(&self, id: u32, busy: bool) {
        if let Some(slot) = self.slots.lock().get_mut(&id) {
            slot.busy = busy;
        }
    }

    fn mark_dead(&self, id: u32) {
        if let Some(slot) = self.slots.lock().get_mut(&id) {
            slot.alive = false;
            slot.busy = false;
        }
    }

    pub fn active_count(&self) -> usize {
        self.slots.lock().values().filter(|s| s.alive).count()
    }

    pub fn busy_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|s| s.alive && s.busy)
            .count()
    }

    fn abort_survivors(&self) {
        for slot in self.slots.lock().values() {
            if slot.alive {
                slot.token.cancel();
                slot.abort.abort();
            }
        }
    }
}

impl WorkerTable for WorkerStates {
    fn is_active(&self, worker_id: u32) -> bool {
        self.slots
            .lock()
            .get(&worker_id)
            .map(|s| s.alive)
            .unwrap_or(false)
    }
}

/// Directed-termination handle given to the watchdog.
pub struct PoolHandle {
    stop: CancellationToken,
    states: Arc<WorkerStates>,
}

impl PoolControl for PoolHandle {
    fn terminate(&self) {
        self.stop.cancel();
    }

    fn kill_survivors(&self) {
        self.states.abort_survivors();
    }

    fn active_workers(&self) -> usize {
        self.states.active_count()
    }
}

/// Pool construction parameters.
pub struct PoolConfig {
    pub conf: Arc<TaskConf>,
    /// Effective parallel width (already capped to the job count).
    pub split: u32,
    pub workers_dir: PathBuf,
    pub mlog: ManagerLog,
}

/// The fixed-width worker pool.
pub struct Pool<C: ShellConnector, P: Provisioner> {
    conf: Arc<TaskConf>,
    queue: Arc<JobQueue>,
    stop: CancellationToken,
    states: Arc<WorkerStates>,
    connector: Arc<C>,
    provisioner: Option<Arc<P>>,
    mlog: ManagerLog,
    supervisor: Option<JoinHandle<()>>,
    launcher: Option<(AddressRx, JoinHandle<()>)>,
}

impl<C: ShellConnector, P: Provisioner> Pool<C, P> {
    /// Start `split` workers and return the pool with the result stream.
    pub fn start(
        config: PoolConfig,
        connector: Arc<C>,
        provisioner: Option<Arc<P>>,
    ) -> (Self, mpsc::UnboundedReceiver<JobResult>) {
        let PoolConfig {
            conf,
            split,
            workers_dir,
            mlog,
        } = config;

        let queue = Arc::new(JobQueue::new());
        let stop = CancellationToken::new();
        let states = Arc::new(WorkerStates::default());
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (exits_tx, exits_rx) = mpsc::unbounded_channel::<(u32, WorkerExit)>();

        // Addresses beyond the initial width stay available as spares for
        // keep-alive replacements.
        let mut addresses: Vec<String> = conf.workers.clone();
        let assigned: Vec<String> = addresses
            .drain(..addresses.len().min(split as usize))
            .collect();
        let spares = Arc::new(Mutex::new(addresses));

        // Launch the rest of the fleet in the background.
        let to_launch = split - assigned.len() as u32;
        let launcher = match (&provisioner, to_launch) {
            (Some(provisioner), n) if n > 0 => Some(launcher::spawn(
                Arc::clone(provisioner),
                n,
                LaunchOptions::from(conf.as_ref()),
                mlog.clone(),
                stop.child_token(),
            )),
            _ => None,
        };

        let mut pool = Self {
            conf,
            queue,
            stop,
            states,
            connector,
            provisioner,
            mlog,
            supervisor: None,
            launcher,
        };

        let next_id = Arc::new(AtomicU32::new(1));
        for address in assigned {
            pool.spawn_worker(
                next_id.fetch_add(1, Ordering::SeqCst),
                AddressSource::Static(address),
                &workers_dir,
                &results_tx,
                &exits_tx,
            );
        }
        for _ in 0..to_launch {
            let source = match &pool.launcher {
                Some((rx, _)) => AddressSource::Launcher(Arc::clone(rx)),
                None => AddressSource::Inline,
            };
            pool.spawn_worker(
                next_id.fetch_add(1, Ordering::SeqCst),
                source,
                &workers_dir,
                &results_tx,
                &exits_tx,
            );
        }

        pool.supervisor = Some(pool.spawn_supervisor(
            exits_rx,
            exits_tx,
            results_tx,
            next_id,
            spares,
            workers_dir,
        ));

        (pool, results_rx)
    }

    fn spawn_worker(
        &self,
        id: u32,
        source: AddressSource,
        workers_dir: &std::path::Path,
        results_tx: &mpsc::UnboundedSender<JobResult>,
        exits_tx: &mpsc::UnboundedSender<(u32, WorkerExit)>,
    ) {
        let token = self.stop.child_token();
        let worker = Worker::new(
            id,
            Arc::clone(&self.conf),
            source,
            Arc::clone(&self.connector),
            self.provisioner.clone(),
            Arc::clone(&self.queue),
            results_tx.clone(),
            Arc::clone(&self.states),
            WorkerLog::new(workers_dir.to_path_buf(), id),
            self.mlog.clone(),
            token.clone(),
        );

        let exits = exits_tx.clone();
        let handle = tokio::spawn(async move {
            let exit = worker.run().await;
            let _ = exits.send((id, exit));
        });
        self.states.register(id, token, handle.abort_handle());
    }

    /// Supervisor: collects worker exits and respawns in keep-alive mode.
    ///
    /// Keep-alive is active when a strike limit is configured; a retired
    /// worker is replaced while jobs remain and a replacement host can be
    /// had (a spare pre-launched address, or the provisioner).
    fn spawn_supervisor(
        &self,
        mut exits_rx: mpsc::UnboundedReceiver<(u32, WorkerExit)>,
        exits_tx: mpsc::UnboundedSender<(u32, WorkerExit)>,
        results_tx: mpsc::UnboundedSender<JobResult>,
        next_id: Arc<AtomicU32>,
        spares: Arc<Mutex<Vec<String>>>,
        workers_dir: PathBuf,
    ) -> JoinHandle<()> {
        let keepalive = self.conf.strikes > 0;
        let queue = Arc::clone(&self.queue);
        let states = Arc::clone(&self.states);
        let stop = self.stop.clone();
        let mlog = self.mlog.clone();
        let pool = self.shallow_clone();

        tokio::spawn(async move {
            // Dropping these when the supervisor ends closes the exit and
            // result channels.
            let exits_tx = exits_tx;
            let results_tx = results_tx;

            let mut live = states.active_count();
            while live > 0 {
                let Some((id, exit)) = exits_rx.recv().await else {
                    break;
                };
                tracing::debug!(worker = id, ?exit, "worker exited");

                let retired = matches!(
                    exit,
                    WorkerExit::StruckOut | WorkerExit::Retired | WorkerExit::ProvisionFailed
                );
                // An exiting worker has already cleared its busy flag, so
                // this sees only the others' in-flight work.
                let jobs_remain = !queue.is_empty() || states.busy_count() > 0;
                if keepalive && retired && jobs_remain && !stop.is_cancelled() {
                    let source = {
                        let mut spares = spares.lock();
                        match spares.pop() {
                            Some(address) => Some(AddressSource::Static(address)),
                            None if pool.provisioner.is_some() => Some(AddressSource::Inline),
                            None => None,
                        }
                    };
                    if let Some(source) = source {
                        let new_id = next_id.fetch_add(1, Ordering::SeqCst);
                        // Register the replacement before retiring the old
                        // worker so the fleet never looks empty mid-swap.
                        pool.spawn_worker(new_id, source, &workers_dir, &results_tx, &exits_tx);
                        mlog.writeln(&format!("# pool: respawned worker {}", new_id));
                        live += 1;
                    }
                }

                states.mark_dead(id);
                live -= 1;
            }
        })
    }

    /// A handle-only copy for the supervisor task.
    fn shallow_clone(&self) -> Self {
        Self {
            conf: Arc::clone(&self.conf),
            queue: Arc::clone(&self.queue),
            stop: self.stop.clone(),
            states: Arc::clone(&self.states),
            connector: Arc::clone(&self.connector),
            provisioner: self.provisioner.clone(),
            mlog: self.mlog.clone(),
            supervisor: None,
            launcher: None,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn states(&self) -> Arc<WorkerStates> {
        Arc::clone(&self.states)
    }

    /// Directed-termination handle for the watchdog.
    pub fn control(&self) -> Arc<PoolHandle> {
        Arc::new(PoolHandle {
            stop: self.stop.clone(),
            states: Arc::clone(&self.states),
        })
    }

    /// Wait until the queue stays empty and every worker is idle across
    /// one quiescent pass with no requeue activity.
    pub async fn wait_for_drain(&self) {
        loop {
            let puts_before = self.queue.put_count();

            while !self.queue.is_empty() {
                if self.stop.is_cancelled() {
                    return;
                }
                if self.states.active_count() == 0 {
                    // Nobody is left to run the remaining jobs; confirm it
                    // wasn't a mid-respawn blink before giving up.
                    tokio::time::sleep(DRAIN_POLL).await;
                    if self.states.active_count() == 0 && !self.queue.is_empty() {
                        return;
                    }
                    continue;
                }
                tokio::time::sleep(DRAIN_POLL).await;
            }
            while self.states.busy_count() > 0 {
                if self.stop.is_cancelled() {
                    return;
                }
                tokio::time::sleep(DRAIN_POLL).await;
            }

            // Workers may have requeued retries during the pass.
            if self.queue.put_count() == puts_before
                && self.queue.is_empty()
                && self.states.busy_count() == 0
            {
                return;
            }
        }
    }

    /// Broadcast the one-shot stop signal.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Join every worker, the supervisor, and the launcher; destroy
    /// launched instances nobody claimed.
    pub async fn join(mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.await;
        }

        if let Some((rx, handle)) = self.launcher.take() {
            let _ = handle.await;
            // Instances yielded after the last worker exited would leak
            // silently; destroy them here, while the provisioner is warm.
            let mut rx = rx.lock().await;
            let mut unclaimed: Vec<Instance> = Vec::new();
            while let Ok(instance) = rx.try_recv() {
                unclaimed.push(instance);
            }
            drop(rx);
            if let (Some(provisioner), false) = (&self.provisioner, unclaimed.is_empty()) {
                let addresses: Vec<String> =
                    unclaimed.iter().map(|i| i.address.clone()).collect();
                match provisioner.destroy(&addresses).await {
                    Ok(destroyed) => {
                        for instance in destroyed {
                            self.mlog.writeln(&format!(
                                "# pool: destroyed unclaimed worker {}",
                                instance.instance_id
                            ));
                        }
                    }
                    Err(e) => {
                        self.mlog
                            .writeln(&format!("# pool: failed to destroy unclaimed workers: {}", e));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
