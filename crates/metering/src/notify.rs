//! Outbound notification channel
//!
//! Real-time usage snapshots and limit warnings pushed per user. Delivery is
//! best-effort and fire-and-forget: the HTTP implementation spawns the send
//! and returns immediately, so nothing here can block or fail a request.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use appforge_shared::{MeteredOperation, Tier};

/// Usage of one metered operation for snapshot pushes.
#[derive(Debug, Clone, Serialize)]
pub struct OperationUsage {
    pub operation: MeteredOperation,
    pub current: i64,
    pub limit: i64,
    /// None for unlimited tiers; percentages are skipped entirely there.
    pub percentage: Option<f64>,
}

/// Per-user `{usage, limits, percentages}` snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub tier: Tier,
    pub operations: Vec<OperationUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    LimitWarning,
    LimitExceeded,
}

/// A threshold-band notification.
#[derive(Debug, Clone, Serialize)]
pub struct WarningEvent {
    pub kind: WarningKind,
    pub operation: MeteredOperation,
    /// Band lower bound that fired: 70, 90, or 100.
    pub threshold: u8,
    pub current: i64,
    pub limit: i64,
    pub percentage: f64,
    /// Set for limit_exceeded: the tier that would lift the limit.
    pub suggested_tier: Option<Tier>,
    pub message: String,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn push_snapshot(&self, user_id: Uuid, snapshot: &UsageSnapshot);
    async fn push_warning(&self, user_id: Uuid, event: &WarningEvent);
}

/// Pushes to a realtime endpoint over HTTP. Sends are spawned with a bounded
/// timeout; failures are logged at warn and dropped.
pub struct HttpPushChannel {
    client: reqwest::Client,
    url: String,
}

impl HttpPushChannel {
    pub fn new(url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, url }
    }

    fn send(&self, user_id: Uuid, kind: &'static str, payload: serde_json::Value) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let body = serde_json::json!({
                "user_id": user_id,
                "kind": kind,
                "payload": payload,
            });
            if let Err(e) = client.post(&url).json(&body).send().await {
                warn!(user_id = %user_id, kind = kind, error = %e, "Realtime push failed");
            }
        });
    }
}

#[async_trait]
impl NotificationChannel for HttpPushChannel {
    async fn push_snapshot(&self, user_id: Uuid, snapshot: &UsageSnapshot) {
        match serde_json::to_value(snapshot) {
            Ok(payload) => self.send(user_id, "usage_snapshot", payload),
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to serialize snapshot"),
        }
    }

    async fn push_warning(&self, user_id: Uuid, event: &WarningEvent) {
        match serde_json::to_value(event) {
            Ok(payload) => self.send(user_id, "limit_notification", payload),
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to serialize warning"),
        }
    }
}

/// Channel for deployments without a realtime endpoint configured.
pub struct NoopChannel;

#[async_trait]
impl NotificationChannel for NoopChannel {
    async fn push_snapshot(&self, _user_id: Uuid, _snapshot: &UsageSnapshot) {}
    async fn push_warning(&self, _user_id: Uuid, _event: &WarningEvent) {}
}
