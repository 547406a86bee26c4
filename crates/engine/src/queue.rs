// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-producer multi-consumer job queue.
//!
//! Workers requeue retried jobs through the same queue, so the drain
//! barrier needs to know whether anything was enqueued during a quiescent
//! pass; the put counter records every push ever made.

use ct_core::Job;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// How long a popper waits before re-checking the stop signal.
const POP_POLL: Duration = Duration::from_secs(1);

/// FIFO job queue shared by all workers.
#[derive(Debug, Default)]
pub struct JobQueue {
    inner: Mutex<VecDeque<Job>>,
    notify: Notify,
    puts: AtomicU64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job and advance the put counter.
    pub fn push(&self, job: Job) {
        self.inner.lock().push_back(job);
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Dequeue without waiting.
    pub fn try_pop(&self) -> Option<Job> {
        self.inner.lock().pop_front()
    }

    /// Dequeue, waiting for work. Returns `None` once `stop` fires.
    ///
    /// The wait observes the stop signal within one second even if no
    /// notification arrives.
    pub async fn pop(&self, stop: &CancellationToken) -> Option<Job> {
        loop {
            if let Some(job) = self.try_pop() {
                return Some(job);
            }
            if stop.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = stop.cancelled() => return None,
                _ = tokio::time::sleep(POP_POLL) => {}
            }
        }
    }

    /// Wait for a push notification, the stop signal, or the poll tick.
    ///
    /// Returns `false` once `stop` fires. Callers that must account their
    /// busyness atomically with the pop use `try_pop` + `wait` instead of
    /// [`JobQueue::pop`].
    pub async fn wait(&self, stop: &CancellationToken) -> bool {
        if stop.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = self.notify.notified() => true,
            _ = stop.cancelled() => false,
            _ = tokio::time::sleep(POP_POLL) => true,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Total pushes since creation; never decreases.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
