//! APNs provider API over HTTP/2.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use super::frame::ApnsNotification;
use crate::error::PushError;

pub const PRODUCTION_URL: &str = "https://api.push.apple.com";
pub const DEVELOPMENT_URL: &str = "https://api.sandbox.push.apple.com";

/// `apns-push-type` sent with every notification.
const PUSH_TYPE: &str = "alert";

#[derive(Debug, Deserialize)]
struct Rejection {
    #[serde(default)]
    reason: String,
}

/// Shared HTTP/2 client bound to one APNs environment.
#[derive(Debug, Clone)]
pub struct ApnsHttp2Client {
    http: reqwest::Client,
    base_url: Arc<str>,
    topic: Option<Arc<str>>,
}

impl ApnsHttp2Client {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            topic: None,
        }
    }

    /// Client authenticating with a PEM bundle holding the certificate chain and private key.
    pub fn from_identity_pem(
        pem: &[u8],
        production: bool,
        timeout: Duration,
    ) -> Result<Self, PushError> {
        let identity =
            reqwest::Identity::from_pem(pem).map_err(|e| PushError::Certificate(e.to_string()))?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .timeout(timeout)
            .build()?;

        let base_url = if production { PRODUCTION_URL } else { DEVELOPMENT_URL };
        Ok(Self::new(http, base_url))
    }

    /// Bundle id (`apns-topic`); required when the certificate covers several topics.
    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.topic = topic.map(Arc::from);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one notification. Anything but `200 OK` is a [`PushError::Rejected`].
    pub async fn push(
        &self,
        device_token: &str,
        notification: &ApnsNotification,
    ) -> Result<(), PushError> {
        let url = format!("{}/3/device/{}", self.base_url, device_token);

        let mut request = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header("apns-priority", notification.priority.to_string())
            .header("apns-expiration", notification.expiry.to_string())
            .header("apns-push-type", PUSH_TYPE)
            .body(notification.payload.clone());
        if let Some(topic) = &self.topic {
            request = request.header("apns-topic", &**topic);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        let apns_id = response
            .headers()
            .get("apns-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let reason = response
            .json::<Rejection>()
            .await
            .map(|r| r.reason)
            .unwrap_or_default();

        Err(PushError::Rejected {
            status: status.as_u16(),
            apns_id,
            reason,
        })
    }
}

pub struct ApnsHttp2Worker {
    client: ApnsHttp2Client,
    device_token: String,
    notification: Arc<ApnsNotification>,
}

impl ApnsHttp2Worker {
    pub fn new(
        client: ApnsHttp2Client,
        device_token: String,
        notification: Arc<ApnsNotification>,
    ) -> Self {
        Self {
            client,
            device_token,
            notification,
        }
    }

    pub fn target(&self) -> &str {
        &self.device_token
    }

    pub async fn work(&self) -> Result<(), PushError> {
        self.client.push(&self.device_token, &self.notification).await
    }
}
