// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session directory: conf snapshot, jobs file, manager log, worker logs.

use crate::jobs::JobsFile;
use crate::StorageError;
use ct_core::TaskConf;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Well-known paths inside one session directory.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    root: PathBuf,
}

impl SessionPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pretty-printed config snapshot, minus the API key.
    pub fn conf(&self) -> PathBuf {
        self.root.join("conf")
    }

    /// One line per job with its state.
    pub fn jobs(&self) -> PathBuf {
        self.root.join("jobs")
    }

    /// Manager log, tee'd to stdout.
    pub fn log(&self) -> PathBuf {
        self.root.join("log")
    }

    /// Directory of per-worker logs.
    pub fn workers(&self) -> PathBuf {
        self.root.join("workers")
    }
}

/// One on-disk execution record.
///
/// Sessions are identified by a monotonically increasing integer; creation
/// takes one past the current max id, racing other managers via
/// `create_dir`. Gaps left by removed sessions are never reused.
#[derive(Debug)]
pub struct Session {
    pub id: u32,
    pub jobs: JobsFile,
    paths: SessionPaths,
}

impl Session {
    /// Create a new session under `sessions_root`.
    pub fn create(sessions_root: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(sessions_root)?;
        if !sessions_root.is_dir() {
            return Err(StorageError::NotADirectory(sessions_root.to_path_buf()));
        }

        let mut candidate = max_session_id(sessions_root)?.map_or(1, |id| id + 1);
        let root = loop {
            let root = sessions_root.join(candidate.to_string());
            match fs::create_dir(&root) {
                Ok(()) => break root,
                // Lost the race to another manager; take the next id.
                Err(e) if e.kind() == ErrorKind::AlreadyExists => candidate += 1,
                Err(e) => return Err(e.into()),
            }
        };

        let paths = SessionPaths::new(root);
        fs::create_dir_all(paths.workers())?;

        let jobs = JobsFile::load(paths.jobs())?;
        Ok(Self {
            id: candidate,
            jobs,
            paths,
        })
    }

    /// Open an existing session for resume or retry.
    pub fn open(sessions_root: &Path, id: u32) -> Result<Self, StorageError> {
        let paths = SessionPaths::new(sessions_root.join(id.to_string()));
        if !paths.root().is_dir() {
            return Err(StorageError::NoSuchSession(id));
        }
        fs::create_dir_all(paths.workers())?;

        let jobs = JobsFile::load(paths.jobs())?;
        Ok(Self { id, jobs, paths })
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    /// Persist the config snapshot. The API key is never written.
    pub fn save_conf(&self, conf: &TaskConf) -> Result<(), StorageError> {
        fs::write(self.paths.conf(), conf.to_toml()?)?;
        Ok(())
    }

    /// Load the config snapshot persisted by [`Session::save_conf`].
    pub fn load_conf(&self) -> Result<TaskConf, StorageError> {
        let raw = fs::read_to_string(self.paths.conf())?;
        Ok(TaskConf::from_toml(&raw)?)
    }
}

fn max_session_id(sessions_root: &Path) -> Result<Option<u32>, StorageError> {
    let mut max = None;
    for entry in fs::read_dir(sessions_root)? {
        let entry = entry?;
        if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
            if max.map_or(true, |m| id > m) {
                max = Some(id);
            }
        }
    }
    Ok(max)
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
