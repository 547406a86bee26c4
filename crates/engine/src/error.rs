// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine.

use thiserror::Error;

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session storage error: {0}")]
    Storage(#[from] ct_storage::StorageError),
    #[error("provisioning error: {0}")]
    Provision(#[from] ct_adapters::ProvisionError),
    #[error("configuration error: {0}")]
    Conf(#[from] ct_core::TaskConfError),
}
