// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The parallel execution engine: worker pool, instance launcher,
//! watchdog, and the controller that wires them to a session.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod controller;
mod error;
pub mod launcher;
pub mod ledger;
pub mod pool;
pub mod queue;
pub mod watchdog;
pub mod worker;

pub use controller::{run_task, RunOutcome};
pub use error::EngineError;
pub use pool::{Pool, PoolConfig};
pub use queue::JobQueue;
pub use watchdog::{PoolControl, Watchdog, WatchdogConfig};
pub use worker::{AddressSource, WorkerExit};
