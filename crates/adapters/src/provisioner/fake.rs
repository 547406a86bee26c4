// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted in-memory provisioner for tests.

use super::{Instance, LaunchOptions, ProvisionError, Provisioner};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct FakeState {
    /// Addresses handed out in order, one per launched instance.
    available: VecDeque<String>,
    /// Every instance ever launched.
    launched: Vec<Instance>,
    /// Addresses destroyed, in call order.
    destroyed: Vec<String>,
    /// Error returned by the next launch, if scripted.
    fail_launch: Option<ProvisionError>,
    next_id: u32,
}

/// In-memory provisioner that vends scripted addresses instantly.
#[derive(Debug, Clone, Default)]
pub struct FakeProvisioner {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvisioner {
    pub fn new(addresses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let fake = Self::default();
        fake.state.lock().available = addresses.into_iter().map(Into::into).collect();
        fake
    }

    /// Script the next `launch` call to fail with `error`.
    pub fn fail_next_launch(&self, error: ProvisionError) {
        self.state.lock().fail_launch = Some(error);
    }

    pub fn launched(&self) -> Vec<Instance> {
        self.state.lock().launched.clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.state.lock().destroyed.clone()
    }

    /// Addresses launched but never destroyed.
    pub fn leaked(&self) -> Vec<Instance> {
        let state = self.state.lock();
        state
            .launched
            .iter()
            .filter(|i| !state.destroyed.contains(&i.address))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn launch(
        &self,
        n: u32,
        _options: &LaunchOptions,
        ready: mpsc::Sender<Instance>,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        if let Some(error) = self.state.lock().fail_launch.take() {
            return Err(error);
        }

        for _ in 0..n {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Stopped);
            }
            let instance = {
                let mut state = self.state.lock();
                let Some(address) = state.available.pop_front() else {
                    return Err(ProvisionError::Transient("out of capacity".into()));
                };
                state.next_id += 1;
                let instance = Instance {
                    address,
                    instance_id: format!("i-{:08x}", state.next_id),
                };
                state.launched.push(instance.clone());
                instance
            };
            if ready.send(instance).await.is_err() {
                return Err(ProvisionError::Stopped);
            }
        }
        Ok(())
    }

    async fn destroy(&self, addresses: &[String]) -> Result<Vec<Instance>, ProvisionError> {
        let mut state = self.state.lock();
        let mut destroyed = Vec::new();
        for address in addresses {
            if let Some(instance) = state.launched.iter().find(|i| &i.address == address) {
                destroyed.push(instance.clone());
                state.destroyed.push(address.clone());
            }
        }
        Ok(destroyed)
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
