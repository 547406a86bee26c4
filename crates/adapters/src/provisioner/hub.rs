// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hub HTTP implementation of the provisioner capability.

use super::{Instance, LaunchOptions, ProvisionError, Provisioner};
use crate::retrier::Retrier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default hub API endpoint.
pub const DEFAULT_HUB_URL: &str = "https://hub.cloudtask.io/api/v1";

/// Grace period before the first status poll.
const FIRST_WAIT: Duration = Duration::from_secs(30);

/// Interval between status polls.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Sleep between retries of a failed API call.
const API_RETRY_SLEEP: Duration = Duration::from_secs(5);

/// Extra attempts for a transient API failure.
const MAX_API_RETRIES: u32 = 2;

/// How long a drained instance may stay pending before we give up on it.
const PENDING_TIMEOUT: Duration = Duration::from_secs(900);

/// Per-request HTTP timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct LaunchRequest<'a> {
    region: &'a str,
    size: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    label: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ami_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    backup_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ServerRecord {
    instance_id: String,
    #[serde(default)]
    ipaddress: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    boot_status: String,
}

/// Hub-backed provisioner.
pub struct HubProvisioner {
    client: reqwest::Client,
    base_url: String,
    apikey: String,
    retrier: Retrier,
}

impl HubProvisioner {
    pub fn new(apikey: impl Into<String>) -> Self {
        Self::with_base_url(apikey, DEFAULT_HUB_URL)
    }

    pub fn with_base_url(apikey: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            apikey: apikey.into(),
            retrier: Retrier::attempts(MAX_API_RETRIES, API_RETRY_SLEEP),
        }
    }

    fn classify(e: reqwest::Error) -> ProvisionError {
        if e.is_timeout() || e.is_connect() {
            ProvisionError::Transient(e.to_string())
        } else {
            ProvisionError::Api(e.to_string())
        }
    }

    fn classify_status(status: reqwest::StatusCode, body: String) -> ProvisionError {
        match status.as_u16() {
            401 | 403 => ProvisionError::InvalidCredentials,
            404 => ProvisionError::NotFound(body),
            408 | 429 => ProvisionError::Transient(body),
            s if s >= 500 => ProvisionError::Transient(body),
            _ => ProvisionError::Api(body),
        }
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ProvisionError> {
        let response = builder
            .header("X-Hub-ApiKey", &self.apikey)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        response.json().await.map_err(Self::classify)
    }

    async fn create(&self, options: &LaunchOptions) -> Result<String, ProvisionError> {
        let body = LaunchRequest {
            region: &options.region,
            size: &options.size,
            kind: &options.kind,
            label: &options.label,
            ami_id: options.ami_id.as_deref(),
            snapshot_id: options.snapshot_id.as_deref(),
            backup_id: options.backup_id,
        };
        let record: ServerRecord = self
            .request(
                self.client
                    .post(format!("{}/servers", self.base_url))
                    .json(&body),
            )
            .await?;
        Ok(record.instance_id)
    }

    async fn status(&self, instance_id: &str) -> Result<ServerRecord, ProvisionError> {
        self.request(
            self.client
                .get(format!("{}/servers/{}", self.base_url, instance_id)),
        )
        .await
    }

    async fn lookup_by_address(&self, address: &str) -> Result<ServerRecord, ProvisionError> {
        self.request(
            self.client
                .get(format!("{}/servers", self.base_url))
                .query(&[("ipaddress", address)]),
        )
        .await
    }

    async fn destroy_instance(&self, instance_id: &str) -> Result<(), ProvisionError> {
        let _: serde_json::Value = self
            .request(
                self.client
                    .post(format!("{}/servers/{}/destroy", self.base_url, instance_id)),
            )
            .await?;
        Ok(())
    }

    /// Best-effort destruction of instances created but never yielded.
    async fn drain_destroy(&self, instance_id: &str) {
        if let Err(e) = self.destroy_instance(instance_id).await {
            tracing::warn!(instance_id, error = %e, "failed to destroy drained instance");
        } else {
            tracing::info!(instance_id, "destroyed drained instance");
        }
    }
}

struct PendingServer {
    instance_id: String,
    created_at: Instant,
}

#[async_trait]
impl Provisioner for HubProvisioner {
    async fn launch(
        &self,
        n: u32,
        options: &LaunchOptions,
        ready: mpsc::Sender<Instance>,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let mut pending: Vec<PendingServer> = Vec::new();
        let mut creation_failed = false;

        // Creation phase. Each request gets its own transient-retry budget;
        // a fatal error aborts after destroying whatever was created.
        for _ in 0..n {
            if cancel.is_cancelled() {
                break;
            }
            let created = self
                .retrier
                .run(|| self.create(options), ProvisionError::is_transient)
                .await;
            match created {
                Ok(instance_id) => {
                    tracing::info!(instance_id, "instance creation requested");
                    pending.push(PendingServer {
                        instance_id,
                        created_at: Instant::now(),
                    });
                }
                Err(e) if e.is_fatal() => {
                    for server in &pending {
                        self.drain_destroy(&server.instance_id).await;
                    }
                    return Err(e);
                }
                Err(e) => {
                    // Transient budget exhausted: stop creating and drain
                    // what already exists.
                    tracing::warn!(error = %e, "instance creation failed, draining");
                    creation_failed = true;
                    break;
                }
            }
        }

        if !pending.is_empty() {
            // Give the provider a head start before polling.
            tokio::select! {
                _ = tokio::time::sleep(FIRST_WAIT) => {}
                _ = cancel.cancelled() => {}
            }
        }

        let mut yielded: u32 = 0;
        let mut receiver_gone = false;

        while !pending.is_empty() {
            let draining = cancel.is_cancelled() || receiver_gone || creation_failed;
            let mut still_pending = Vec::new();

            for server in pending {
                let record = match self.status(&server.instance_id).await {
                    Ok(record) => record,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        // Tolerate a failed poll; the next tick retries.
                        tracing::warn!(
                            instance_id = server.instance_id,
                            error = %e,
                            "status poll failed"
                        );
                        still_pending.push(server);
                        continue;
                    }
                };

                if draining {
                    // Drain policy: destroy as soon as the provider reports
                    // the instance running; don't wait for boot to finish.
                    if record.status == "running" {
                        self.drain_destroy(&server.instance_id).await;
                    } else if server.created_at.elapsed() > PENDING_TIMEOUT {
                        tracing::error!(
                            instance_id = server.instance_id,
                            "instance stuck pending during drain, giving up"
                        );
                    } else {
                        still_pending.push(server);
                    }
                    continue;
                }

                if record.status == "running" && record.boot_status == "booted" {
                    let instance = Instance {
                        address: record.ipaddress,
                        instance_id: record.instance_id,
                    };
                    if ready.send(instance).await.is_err() {
                        // Nobody is listening any more: switch to drain and
                        // destroy this instance with the rest.
                        receiver_gone = true;
                        self.drain_destroy(&server.instance_id).await;
                    } else {
                        yielded += 1;
                    }
                } else {
                    still_pending.push(server);
                }
            }

            pending = still_pending;
            if pending.is_empty() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => {}
            }
        }

        if yielded == n {
            Ok(())
        } else {
            Err(ProvisionError::Stopped)
        }
    }

    async fn destroy(&self, addresses: &[String]) -> Result<Vec<Instance>, ProvisionError> {
        let mut destroyed = Vec::new();

        for address in addresses {
            let record = match self.lookup_by_address(address).await {
                Ok(record) => record,
                Err(e) if matches!(e, ProvisionError::InvalidCredentials) => return Err(e),
                Err(e) => {
                    tracing::warn!(address, error = %e, "lookup failed, skipping destroy");
                    continue;
                }
            };
            match self.destroy_instance(&record.instance_id).await {
                Ok(()) => destroyed.push(Instance {
                    address: address.clone(),
                    instance_id: record.instance_id,
                }),
                Err(e) => {
                    tracing::warn!(address, error = %e, "destroy failed");
                }
            }
        }

        Ok(destroyed)
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
