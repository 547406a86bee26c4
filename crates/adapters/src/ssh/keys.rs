// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ephemeral session key pair.
//!
//! Generated at session start with a random label, installed on each
//! worker during setup, removed during teardown, and deleted from disk
//! when the controller exits.

use super::ShellError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// An ephemeral key pair on local disk.
#[derive(Debug)]
pub struct SessionKey {
    path: PathBuf,
    public_material: String,
    fingerprint: String,
    label: String,
}

impl SessionKey {
    /// Generate a fresh key pair in the system temp directory.
    pub async fn generate() -> Result<Self, ShellError> {
        let label = uuid::Uuid::new_v4().to_string();
        let path = std::env::temp_dir().join(format!("cloudtask-key-{}", label));
        Self::generate_at(path, label).await
    }

    /// Generate a fresh key pair at `path` with the given comment label.
    pub async fn generate_at(path: PathBuf, label: String) -> Result<Self, ShellError> {
        let output = Command::new("ssh-keygen")
            .arg("-q")
            .arg("-t")
            .arg("ed25519")
            .arg("-N")
            .arg("")
            .arg("-C")
            .arg(&label)
            .arg("-f")
            .arg(&path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ShellError::KeyGen(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let public_line = tokio::fs::read_to_string(path.with_extension("pub")).await?;
        let public_material = public_key_material(&public_line)
            .ok_or_else(|| ShellError::KeyGen(format!("malformed public key for {}", label)))?;
        let fingerprint = fingerprint(&public_material);

        Ok(Self {
            path,
            public_material,
            fingerprint,
            label,
        })
    }

    /// Assemble a key from pre-computed parts.
    ///
    /// Used by tests and tooling that already hold key material; no files
    /// are created.
    pub fn from_parts(path: PathBuf, public_material: String, label: String) -> Self {
        let fingerprint = fingerprint(&public_material);
        Self {
            path,
            public_material,
            fingerprint,
            label,
        }
    }

    /// Path of the private half, used as the ssh identity file.
    pub fn identity_path(&self) -> &Path {
        &self.path
    }

    /// The serialized public key without its comment label.
    pub fn public_material(&self) -> &str {
        &self.public_material
    }

    /// Stable hex fingerprint of the public material.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The line appended to a worker's `authorized_keys`: the key followed
    /// by its fingerprint, which removal matches on.
    pub fn authorized_line(&self) -> String {
        format!("{} {}", self.public_material, self.fingerprint)
    }

    /// Delete both halves from disk. Safe to call more than once.
    pub fn remove_files(&self) {
        let _ = std::fs::remove_file(&self.path);
        let _ = std::fs::remove_file(self.path.with_extension("pub"));
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.remove_files();
    }
}

/// Extract `<type> <base64>` from a public key line, dropping the label.
fn public_key_material(line: &str) -> Option<String> {
    let mut fields = line.split_whitespace();
    let kind = fields.next()?;
    if !kind.starts_with("ssh-") && !kind.starts_with("ecdsa-") {
        return None;
    }
    let body = fields.next()?;
    Some(format!("{} {}", kind, body))
}

/// Hex digest of the serialized public material.
pub fn fingerprint(public_material: &str) -> String {
    let digest = Sha256::digest(public_material.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
