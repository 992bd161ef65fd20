use std::time::Duration;

use thiserror::Error;

/// Failure of a single delivery attempt.
#[derive(Debug, Error)]
pub enum PushError {
    /// Malformed subscription key material or an oversized payload.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// The APNs client identity could not be loaded.
    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from a push service.
    #[error("Unexpected HTTP status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },

    /// APNs HTTP/2 provider API refused the notification.
    #[error("not sent: {status} {apns_id} {reason}")]
    Rejected {
        status: u16,
        apns_id: String,
        reason: String,
    },

    /// Error response read back from the APNs binary gateway.
    #[error("APNs gateway returned status {status} for notification {identifier}")]
    ApnsStatus { status: u8, identifier: u32 },

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid device token: {0}")]
    InvalidToken(String),

    /// Payload cannot be carried by the transport (e.g. too large for an APNs frame).
    #[error("Invalid payload: {0}")]
    Payload(String),

    /// The transport has no credentials configured.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// Stops the retry loop immediately, whatever the backoff state.
    #[error("Not retrying: {0}")]
    NoRetry(String),
}

/// Classification consulted by the retry loop after each failed attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for PushError {
    fn is_retryable(&self) -> bool {
        match self {
            PushError::NoRetry(_) => false,
            PushError::Rejected { status, .. } => *status == 429 || *status >= 500,
            // Configuration errors are retried like transient ones.
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(status: u16) -> PushError {
        PushError::Rejected {
            status,
            apns_id: "id".to_string(),
            reason: "Reason".to_string(),
        }
    }

    #[test]
    fn test_no_retry_sentinel_is_final() {
        assert!(!PushError::NoRetry("gone".into()).is_retryable());
    }

    #[test]
    fn test_rejected_classification() {
        assert!(!rejected(400).is_retryable());
        assert!(!rejected(410).is_retryable());
        assert!(rejected(429).is_retryable());
        assert!(rejected(503).is_retryable());
    }

    #[test]
    fn test_local_failures_are_retried() {
        assert!(PushError::Encryption("bad key".into()).is_retryable());
        assert!(PushError::Certificate("expired".into()).is_retryable());
        assert!(PushError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_rejected_message_format() {
        let err = PushError::Rejected {
            status: 400,
            apns_id: "abc".to_string(),
            reason: "BadDeviceToken".to_string(),
        };
        assert_eq!(err.to_string(), "not sent: 400 abc BadDeviceToken");
    }
}
