//! Unit-of-work abstraction driven by the dispatcher.

use async_trait::async_trait;

use crate::apns::http2::ApnsHttp2Worker;
use crate::apns::legacy::ApnsLegacyWorker;
use crate::error::PushError;
use crate::fcm::FcmWorker;

/// One delivery to one target.
///
/// `work` performs a single attempt; retries are the dispatcher's business.
/// Implementations must be safe to call repeatedly.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Endpoint or device token this worker delivers to.
    fn target(&self) -> &str;

    async fn work(&self) -> Result<(), PushError>;
}

/// Lifecycle of a worker inside one dispatch.
///
/// `Pending` until a concurrency permit is granted, then
/// `Attempting` → `Succeeded`, `Retrying` (back to `Attempting`) or `Exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Queued, waiting for a concurrency permit.
    Pending,
    /// `work()` in flight.
    Attempting,
    /// Last attempt failed; waiting out the backoff pause.
    Retrying,
    Succeeded,
    /// Backoff stopped or the error was not retryable.
    Exhausted,
}

impl AttemptState {
    /// State following an attempt, given its outcome and whether another attempt will run.
    pub fn after_attempt(succeeded: bool, will_retry: bool) -> Self {
        match (succeeded, will_retry) {
            (true, _) => AttemptState::Succeeded,
            (false, true) => AttemptState::Retrying,
            (false, false) => AttemptState::Exhausted,
        }
    }
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptState::Pending => write!(f, "pending"),
            AttemptState::Attempting => write!(f, "attempting"),
            AttemptState::Retrying => write!(f, "retrying"),
            AttemptState::Succeeded => write!(f, "succeeded"),
            AttemptState::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// The concrete transports, as one closed set.
pub enum PushWorker {
    Fcm(FcmWorker),
    ApnsLegacy(ApnsLegacyWorker),
    ApnsHttp2(ApnsHttp2Worker),
}

#[async_trait]
impl Worker for PushWorker {
    fn target(&self) -> &str {
        match self {
            PushWorker::Fcm(w) => w.target(),
            PushWorker::ApnsLegacy(w) => w.target(),
            PushWorker::ApnsHttp2(w) => w.target(),
        }
    }

    async fn work(&self) -> Result<(), PushError> {
        match self {
            PushWorker::Fcm(w) => w.work().await,
            PushWorker::ApnsLegacy(w) => w.work().await,
            PushWorker::ApnsHttp2(w) => w.work().await,
        }
    }
}

impl From<FcmWorker> for PushWorker {
    fn from(worker: FcmWorker) -> Self {
        PushWorker::Fcm(worker)
    }
}

impl From<ApnsLegacyWorker> for PushWorker {
    fn from(worker: ApnsLegacyWorker) -> Self {
        PushWorker::ApnsLegacy(worker)
    }
}

impl From<ApnsHttp2Worker> for PushWorker {
    fn from(worker: ApnsHttp2Worker) -> Self {
        PushWorker::ApnsHttp2(worker)
    }
}
