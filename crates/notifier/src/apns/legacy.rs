//! Legacy binary-protocol delivery: one TLS connection per notification.

use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::frame::{ERROR_RESPONSE_LEN, ErrorResponse};
use super::{ApnsGateway, ApnsTls};
use crate::error::PushError;

/// Default bound on dialing, the handshake and writing the frame.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Writes one binary frame to the gateway over a fresh TLS connection.
pub struct ApnsLegacyWorker {
    tls: Arc<ApnsTls>,
    gateway: Arc<ApnsGateway>,
    device_token: String,
    frame: Vec<u8>,
    error_wait: Duration,
    io_timeout: Duration,
}

impl ApnsLegacyWorker {
    pub fn new(
        tls: Arc<ApnsTls>,
        gateway: Arc<ApnsGateway>,
        device_token: String,
        frame: Vec<u8>,
    ) -> Self {
        Self {
            tls,
            gateway,
            device_token,
            frame,
            error_wait: Duration::ZERO,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// How long to wait for an error response after writing. Zero skips the read.
    pub fn with_error_wait(mut self, error_wait: Duration) -> Self {
        self.error_wait = error_wait;
        self
    }

    /// Upper bound on dialing, the TLS handshake and writing the frame, and
    /// separately on closing the connection.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn target(&self) -> &str {
        &self.device_token
    }

    pub async fn work(&self) -> Result<(), PushError> {
        let config = self.tls.client_config().await?;

        let mut tls = tokio::time::timeout(self.io_timeout, self.send_frame(config))
            .await
            .unwrap_or(Err(PushError::Timeout(self.io_timeout)))?;

        let outcome = if self.error_wait.is_zero() {
            Ok(())
        } else {
            read_error_response(&mut tls, self.error_wait).await
        };

        match tokio::time::timeout(self.io_timeout, tls.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(gateway = %self.gateway, error = %e, "TLS shutdown failed"),
            Err(_) => tracing::debug!(gateway = %self.gateway, "TLS shutdown timed out"),
        }

        outcome
    }

    async fn send_frame(&self, config: Arc<ClientConfig>) -> Result<TlsStream<TcpStream>, PushError> {
        let stream = TcpStream::connect((self.gateway.host.as_str(), self.gateway.port)).await?;

        let server_name = ServerName::try_from(self.gateway.host.clone())
            .map_err(|e| PushError::Tls(format!("{}: {}", self.gateway.host, e)))?;
        let mut tls = TlsConnector::from(config)
            .connect(server_name, stream)
            .await
            .map_err(|e| PushError::Tls(format!("handshake with {}: {}", self.gateway, e)))?;

        tls.write_all(&self.frame).await?;
        tls.flush().await?;
        Ok(tls)
    }
}

/// Nothing read before `wait` elapses, or a clean close, counts as accepted.
async fn read_error_response<S>(stream: &mut S, wait: Duration) -> Result<(), PushError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; ERROR_RESPONSE_LEN];
    match tokio::time::timeout(wait, stream.read_exact(&mut buf)).await {
        Err(_) => Ok(()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(_)) => match ErrorResponse::parse(&buf) {
            Some(response) => response.into_result(),
            None => {
                tracing::warn!(response = ?buf, "Unrecognised APNs gateway response");
                Ok(())
            }
        },
    }
}
