//! Push notification delivery.
//!
//! A fan-out dispatcher runs one worker per target (Web Push subscription or
//! APNs device token) with bounded concurrency. Each worker retries its own
//! delivery under an exponential backoff; results are logged where they
//! happen and collected into a per-target [`DispatchReport`].

pub mod apns;
pub mod backoff;
pub mod dispatch;
pub mod error;
pub mod fcm;
pub mod retry;
pub mod service;
pub mod webpush;
pub mod worker;

pub use backoff::{BackoffConfig, BackoffStrategy, ExponentialBackoff, SequenceBackoff};
pub use apns::{ApnsGateway, ApnsNotification, ApnsTls};
pub use dispatch::{DispatchOptions, Dispatcher, SkippedTarget};
pub use error::{PushError, Retryable};
pub use herald_common::types::{DeliveryReport, DeliveryStatus, DispatchReport, FcmSubscription};
pub use retry::{retry, retry_counted};
pub use service::{PushService, send_apns_notification, send_fcm_notification};
pub use worker::{AttemptState, PushWorker, Worker};
