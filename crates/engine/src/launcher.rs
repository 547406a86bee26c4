// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background instance launcher feeding workers as instances boot.

use ct_adapters::{Instance, LaunchOptions, ProvisionError, Provisioner};
use ct_storage::ManagerLog;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared receiving end of the launcher's address channel.
pub type AddressRx = Arc<tokio::sync::Mutex<mpsc::Receiver<Instance>>>;

/// Launch `n` instances in the background.
///
/// Workers pull from the returned channel as instances become ready, in
/// boot order. Cancelling `cancel` drains the launcher: instances not yet
/// handed to a worker are destroyed by the provisioner.
pub fn spawn<P: Provisioner>(
    provisioner: Arc<P>,
    n: u32,
    options: LaunchOptions,
    mlog: ManagerLog,
    cancel: CancellationToken,
) -> (AddressRx, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(n.max(1) as usize);

    let handle = tokio::spawn(async move {
        match provisioner.launch(n, &options, tx, &cancel).await {
            Ok(()) => {
                tracing::debug!(n, "launcher finished");
            }
            Err(ProvisionError::Stopped) => {
                mlog.writeln("# launcher: stopped before all workers launched");
            }
            Err(e) => {
                mlog.writeln(&format!("# launcher: {}", e));
            }
        }
    });

    (Arc::new(tokio::sync::Mutex::new(rx)), handle)
}
