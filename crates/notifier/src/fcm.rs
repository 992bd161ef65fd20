//! FCM / Web Push delivery over HTTP POST.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH};

use herald_common::types::FcmSubscription;

use crate::error::PushError;
use crate::webpush;

pub const FCM_URL: &str = "https://fcm.googleapis.com/fcm/send";

/// Legacy GCM prefix still found in old subscriptions.
pub const GCM_URL: &str = "https://android.googleapis.com/gcm/send";

/// Replace the first occurrence of the legacy GCM prefix with the FCM one.
pub fn rewrite_endpoint(endpoint: &str) -> String {
    endpoint.replacen(GCM_URL, FCM_URL, 1)
}

/// Delivers one encrypted payload to one subscription.
#[derive(Debug, Clone)]
pub struct FcmWorker {
    client: reqwest::Client,
    server_key: Arc<str>,
    subscription: FcmSubscription,
    payload: Arc<[u8]>,
    strict_status: bool,
}

impl FcmWorker {
    pub fn new(
        client: reqwest::Client,
        server_key: Arc<str>,
        subscription: FcmSubscription,
        payload: Arc<[u8]>,
    ) -> Self {
        Self {
            client,
            server_key,
            subscription,
            payload,
            strict_status: false,
        }
    }

    /// Treat non-2xx responses as failures instead of ignoring the status.
    pub fn with_strict_status(mut self, strict_status: bool) -> Self {
        self.strict_status = strict_status;
        self
    }

    pub fn target(&self) -> &str {
        &self.subscription.endpoint
    }

    /// One attempt: encrypt with a fresh key and salt, then POST.
    pub async fn work(&self) -> Result<(), PushError> {
        let encrypted = webpush::encrypt(
            &self.subscription.key,
            &self.subscription.auth,
            &self.payload,
            0,
        )?;

        let endpoint = rewrite_endpoint(&self.subscription.endpoint);
        let response = self
            .client
            .post(&endpoint)
            .header(AUTHORIZATION, format!("key={}", self.server_key))
            .header("Encryption", encrypted.encryption_header())
            .header("Crypto-Key", encrypted.crypto_key_header())
            .header(CONTENT_ENCODING, "aesgcm")
            .header(CONTENT_LENGTH, encrypted.ciphertext.len())
            .body(encrypted.ciphertext)
            .send()
            .await?;

        let status = response.status();
        if !self.strict_status || status.is_success() {
            return Ok(());
        }

        match status.as_u16() {
            404 | 410 => Err(PushError::NoRetry(format!(
                "subscription expired ({}): {}",
                status.as_u16(),
                endpoint
            ))),
            code => Err(PushError::Status {
                status: code,
                endpoint,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_legacy_gcm_endpoint() {
        assert_eq!(
            rewrite_endpoint("https://android.googleapis.com/gcm/send/abc123"),
            "https://fcm.googleapis.com/fcm/send/abc123"
        );
    }

    #[test]
    fn test_rewrite_leaves_other_endpoints_alone() {
        let mozilla = "https://updates.push.services.mozilla.com/wpush/v1/xyz";
        assert_eq!(rewrite_endpoint(mozilla), mozilla);
        assert_eq!(rewrite_endpoint(FCM_URL), FCM_URL);
    }

    #[test]
    fn test_rewrite_only_first_occurrence() {
        let doubled = format!("{}/{}", GCM_URL, GCM_URL);
        assert_eq!(rewrite_endpoint(&doubled), format!("{}/{}", FCM_URL, GCM_URL));
    }

    #[test]
    fn test_target_is_original_endpoint() {
        let worker = FcmWorker::new(
            reqwest::Client::new(),
            Arc::from("server-key"),
            FcmSubscription {
                endpoint: format!("{}/token", GCM_URL),
                key: String::new(),
                auth: String::new(),
            },
            Arc::from(&b"{}"[..]),
        );
        assert_eq!(worker.target(), format!("{}/token", GCM_URL));
    }
}
