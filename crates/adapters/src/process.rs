// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-liveness view consumed by the watchdog.
//!
//! The watchdog judges session idleness from the log files under
//! `workers/`; this capability answers whether the worker a log file
//! belongs to is still alive in this manager, so stale files from retired
//! workers don't keep a dead session looking busy.

/// Answers whether a worker id is still alive.
pub trait WorkerTable: Send + Sync + 'static {
    fn is_active(&self, worker_id: u32) -> bool;
}

/// Fixed-set table for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
pub struct FixedWorkerTable {
    active: parking_lot::Mutex<std::collections::HashSet<u32>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FixedWorkerTable {
    pub fn new(ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            active: parking_lot::Mutex::new(ids.into_iter().collect()),
        }
    }

    pub fn retire(&self, worker_id: u32) {
        self.active.lock().remove(&worker_id);
    }

    pub fn clear(&self) {
        self.active.lock().clear();
    }
}

#[cfg(any(test, feature = "test-support"))]
impl WorkerTable for FixedWorkerTable {
    fn is_active(&self, worker_id: u32) -> bool {
        self.active.lock().contains(&worker_id)
    }
}
