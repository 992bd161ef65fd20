//! Entry points: fan a payload out to every target of one transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use herald_common::config::AppConfig;
use herald_common::types::{DispatchReport, FcmSubscription, Transport};

use crate::apns::http2::ApnsHttp2Worker;
use crate::apns::legacy::{ApnsLegacyWorker, DEFAULT_IO_TIMEOUT};
use crate::apns::{ApnsGateway, ApnsNotification, ApnsTls, http2::ApnsHttp2Client};
use crate::backoff::BackoffConfig;
use crate::dispatch::{DispatchOptions, Dispatcher, SkippedTarget};
use crate::error::PushError;
use crate::fcm::FcmWorker;
use crate::worker::PushWorker;

impl DispatchOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_concurrency: config.push_max_concurrency,
            queue_capacity: config.push_queue_capacity,
            backoff: BackoffConfig {
                base: Duration::from_millis(config.push_retry_base_ms),
                max_elapsed: Duration::from_millis(config.push_retry_max_elapsed_ms),
                max_retries: config.push_retry_max_retries,
                jitter: true,
            },
            attempt_timeout: config.push_attempt_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Credentials, clients and the dispatcher, built once and shared.
pub struct PushService {
    http: reqwest::Client,
    dispatcher: Dispatcher,
    fcm_server_key: Option<Arc<str>>,
    fcm_strict_status: bool,
    apns_tls: Option<Arc<ApnsTls>>,
    apns_gateway: Arc<ApnsGateway>,
    apns_error_wait: Duration,
    apns_production: bool,
    apns_topic: Option<String>,
    apns_http2: OnceCell<ApnsHttp2Client>,
    http_timeout: Duration,
}

impl PushService {
    pub fn from_config(config: &AppConfig) -> Result<Self, PushError> {
        let http_timeout = Duration::from_secs(config.http_timeout_secs);
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(http_timeout)
            .build()?;

        let apns_tls = match (&config.apns_cert_path, &config.apns_key_path) {
            (Some(cert), Some(key)) => Some(Arc::new(ApnsTls::new(cert, key))),
            (None, None) => None,
            _ => {
                tracing::warn!("APNS_CERT_PATH and APNS_KEY_PATH must both be set; APNs disabled");
                None
            }
        };

        tracing::info!(
            fcm = config.fcm_server_key.is_some(),
            apns = apns_tls.is_some(),
            apns_production = config.apns_production,
            max_concurrency = config.push_max_concurrency,
            "Push service configured"
        );

        Ok(Self {
            http,
            dispatcher: Dispatcher::new(DispatchOptions::from_config(config)),
            fcm_server_key: config.fcm_server_key.as_deref().map(Arc::from),
            fcm_strict_status: config.fcm_strict_status,
            apns_tls,
            apns_gateway: Arc::new(ApnsGateway::for_environment(config.apns_production)),
            apns_error_wait: Duration::from_millis(config.apns_error_wait_ms),
            apns_production: config.apns_production,
            apns_topic: config.apns_topic.clone(),
            apns_http2: OnceCell::new(),
            http_timeout,
        })
    }

    /// Use `tls` as the APNs client identity instead of the configured certificate files.
    pub fn with_apns_tls(mut self, tls: ApnsTls) -> Self {
        self.apns_tls = Some(Arc::new(tls));
        self
    }

    /// Send binary-protocol notifications to `gateway` instead of Apple's.
    pub fn with_apns_gateway(mut self, gateway: ApnsGateway) -> Self {
        self.apns_gateway = Arc::new(gateway);
        self
    }

    /// Use `client` for the provider API instead of building one from the certificate.
    pub fn with_apns_http2_client(mut self, client: ApnsHttp2Client) -> Self {
        self.apns_http2 = OnceCell::from(client);
        self
    }

    pub async fn send_fcm_notification(
        &self,
        subscriptions: &[FcmSubscription],
        payload: &[u8],
    ) -> Result<DispatchReport, PushError> {
        let server_key = self
            .fcm_server_key
            .clone()
            .ok_or(PushError::NotConfigured("FCM server key"))?;

        let jobs = fcm_jobs(
            self.http.clone(),
            server_key,
            subscriptions,
            payload,
            self.fcm_strict_status,
        );
        Ok(self.dispatcher.run(Transport::Fcm, jobs).await)
    }

    /// Legacy binary protocol, one TLS connection per device.
    pub async fn send_apns_notification(
        &self,
        device_tokens: &[String],
        notification: &ApnsNotification,
    ) -> Result<DispatchReport, PushError> {
        let tls = self
            .apns_tls
            .clone()
            .ok_or(PushError::NotConfigured("APNs certificate"))?;

        let jobs = apns_legacy_jobs(
            tls,
            self.apns_gateway.clone(),
            device_tokens,
            notification,
            self.apns_error_wait,
            self.http_timeout,
        );
        Ok(self.dispatcher.run(Transport::ApnsLegacy, jobs).await)
    }

    /// HTTP/2 provider API.
    pub async fn send_apns2_notification(
        &self,
        device_tokens: &[String],
        payload: &[u8],
    ) -> Result<DispatchReport, PushError> {
        let client = self.apns_http2_client().await?;
        let notification = Arc::new(ApnsNotification::new(payload));

        let jobs = device_tokens.to_vec().into_iter().map(move |token| {
            Ok::<_, SkippedTarget>(PushWorker::from(ApnsHttp2Worker::new(
                client.clone(),
                token,
                notification.clone(),
            )))
        });
        Ok(self.dispatcher.run(Transport::ApnsHttp2, jobs).await)
    }

    async fn apns_http2_client(&self) -> Result<ApnsHttp2Client, PushError> {
        self.apns_http2
            .get_or_try_init(|| async {
                let tls = self
                    .apns_tls
                    .as_ref()
                    .ok_or(PushError::NotConfigured("APNs certificate"))?;
                let pem = tls.identity_pem().await?;
                let client =
                    ApnsHttp2Client::from_identity_pem(&pem, self.apns_production, self.http_timeout)?
                        .with_topic(self.apns_topic.clone());
                tracing::info!(base_url = client.base_url(), "APNs HTTP/2 client ready");
                Ok::<_, PushError>(client)
            })
            .await
            .cloned()
    }
}

/// Deliver `payload` to every subscription; any HTTP response counts as delivered.
pub async fn send_fcm_notification(
    dispatcher: &Dispatcher,
    client: &reqwest::Client,
    server_key: &str,
    subscriptions: &[FcmSubscription],
    payload: &[u8],
) -> DispatchReport {
    let jobs = fcm_jobs(
        client.clone(),
        Arc::from(server_key),
        subscriptions,
        payload,
        false,
    );
    dispatcher.run(Transport::Fcm, jobs).await
}

/// Write `notification` to every device through the binary gateway.
///
/// Tokens that are not 64 hex characters are reported as skipped.
pub async fn send_apns_notification(
    dispatcher: &Dispatcher,
    tls: Arc<ApnsTls>,
    gateway: ApnsGateway,
    device_tokens: &[String],
    notification: &ApnsNotification,
) -> DispatchReport {
    let jobs = apns_legacy_jobs(
        tls,
        Arc::new(gateway),
        device_tokens,
        notification,
        Duration::ZERO,
        DEFAULT_IO_TIMEOUT,
    );
    dispatcher.run(Transport::ApnsLegacy, jobs).await
}

fn fcm_jobs(
    client: reqwest::Client,
    server_key: Arc<str>,
    subscriptions: &[FcmSubscription],
    payload: &[u8],
    strict_status: bool,
) -> impl Iterator<Item = Result<PushWorker, SkippedTarget>> + Send + 'static {
    let payload: Arc<[u8]> = Arc::from(payload);
    subscriptions.to_vec().into_iter().map(move |subscription| {
        Ok(PushWorker::from(
            FcmWorker::new(client.clone(), server_key.clone(), subscription, payload.clone())
                .with_strict_status(strict_status),
        ))
    })
}

fn apns_legacy_jobs(
    tls: Arc<ApnsTls>,
    gateway: Arc<ApnsGateway>,
    device_tokens: &[String],
    notification: &ApnsNotification,
    error_wait: Duration,
    io_timeout: Duration,
) -> impl Iterator<Item = Result<PushWorker, SkippedTarget>> + Send + 'static {
    let notification = notification.clone();
    device_tokens.to_vec().into_iter().map(move |token| {
        match notification.to_frame(&token) {
            Ok(frame) => Ok(PushWorker::from(
                ApnsLegacyWorker::new(tls.clone(), gateway.clone(), token, frame)
                    .with_error_wait(error_wait)
                    .with_io_timeout(io_timeout),
            )),
            Err(reason) => Err(SkippedTarget {
                target: token,
                reason,
            }),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_options_from_config() {
        let config = AppConfig {
            push_max_concurrency: 7,
            push_retry_max_retries: Some(2),
            push_attempt_timeout_ms: Some(1500),
            ..AppConfig::default()
        };
        let options = DispatchOptions::from_config(&config);
        assert_eq!(options.max_concurrency, 7);
        assert_eq!(options.backoff.base, Duration::from_millis(250));
        assert_eq!(options.backoff.max_elapsed, Duration::from_secs(16));
        assert_eq!(options.backoff.max_retries, Some(2));
        assert_eq!(options.attempt_timeout, Some(Duration::from_millis(1500)));
    }

    #[tokio::test]
    async fn test_unconfigured_transports() {
        let service = PushService::from_config(&AppConfig::default()).unwrap();

        let err = service.send_fcm_notification(&[], b"{}").await.unwrap_err();
        assert!(matches!(err, PushError::NotConfigured(_)));

        let err = service
            .send_apns_notification(&[], &ApnsNotification::new(b"{}".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::NotConfigured(_)));

        let err = service.send_apns2_notification(&[], b"{}").await.unwrap_err();
        assert!(matches!(err, PushError::NotConfigured(_)));
    }

    #[test]
    fn test_legacy_jobs_skip_bad_tokens() {
        let jobs: Vec<_> = apns_legacy_jobs(
            Arc::new(ApnsTls::new("cert.pem", "key.pem")),
            Arc::new(ApnsGateway::sandbox()),
            &["zz".to_string(), "ab".repeat(32)],
            &ApnsNotification::new(b"{}".to_vec()),
            Duration::ZERO,
            DEFAULT_IO_TIMEOUT,
        )
        .collect();

        assert_eq!(jobs.len(), 2);
        match &jobs[0] {
            Err(skipped) => {
                assert_eq!(skipped.target, "zz");
                assert!(matches!(skipped.reason, PushError::InvalidToken(_)));
            }
            Ok(_) => panic!("malformed token produced a worker"),
        }
        assert!(jobs[1].is_ok());
    }
}
