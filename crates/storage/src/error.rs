// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for session storage.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by session storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sessions path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("no such session '{0}'")]
    NoSuchSession(u32),
    #[error("malformed jobs file line: {0:?}")]
    MalformedJobsLine(String),
    #[error("configuration error: {0}")]
    Conf(#[from] ct_core::TaskConfError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
