use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery transports supported by the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Web Push / FCM HTTP POST with an `aesgcm` encrypted body.
    Fcm,
    /// APNs legacy binary protocol over a raw TLS socket.
    ApnsLegacy,
    /// APNs HTTP/2 provider API.
    ApnsHttp2,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Fcm => write!(f, "fcm"),
            Transport::ApnsLegacy => write!(f, "apns_legacy"),
            Transport::ApnsHttp2 => write!(f, "apns_http2"),
        }
    }
}

/// A browser / Android push registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FcmSubscription {
    /// Push service endpoint URL
    pub endpoint: String,
    /// Client public key (`p256dh`), base64url encoded uncompressed P-256 point
    pub key: String,
    /// Client authentication secret, base64url encoded
    pub auth: String,
}

/// Final outcome of delivering to one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// An attempt succeeded.
    Delivered,
    /// Retries stopped (backoff exhausted or a non-retryable error) without success.
    Exhausted,
    /// The target was never attempted because its worker could not be built.
    Skipped,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Exhausted => write!(f, "exhausted"),
            DeliveryStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Per-target delivery result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Endpoint URL or device token the delivery was addressed to
    pub target: String,
    pub status: DeliveryStatus,
    /// Number of times the worker was invoked (0 for skipped targets)
    pub attempts: u32,
    /// Last error, if the delivery did not succeed
    pub error: Option<String>,
}

/// Aggregated result of one fan-out call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReport {
    pub batch_id: Uuid,
    pub transport: Transport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Results in completion order, not submission order.
    pub deliveries: Vec<DeliveryReport>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.count(DeliveryStatus::Delivered)
    }

    pub fn failed(&self) -> usize {
        self.count(DeliveryStatus::Exhausted) + self.count(DeliveryStatus::Skipped)
    }

    pub fn count(&self, status: DeliveryStatus) -> usize {
        self.deliveries.iter().filter(|d| d.status == status).count()
    }

    /// Look up the result for a target.
    pub fn get(&self, target: &str) -> Option<&DeliveryReport> {
        self.deliveries.iter().find(|d| d.target == target)
    }
}
