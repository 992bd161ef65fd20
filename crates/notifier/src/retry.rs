//! Retry a fallible async operation until a backoff strategy says stop.

use std::fmt::Display;
use std::future::Future;

use tokio::time::sleep;

use crate::backoff::BackoffStrategy;
use crate::error::Retryable;
use crate::worker::AttemptState;

/// Outcome of [`retry_counted`]: the final result, how many times the
/// operation ran and the state it ended in.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    /// Always `Succeeded` or `Exhausted`.
    pub state: AttemptState,
}

/// Run `op` until it succeeds, the error is not retryable, or `backoff` stops.
///
/// Returns the first success or the last error. Only the calling task sleeps
/// between attempts.
pub async fn retry<F, Fut, T, E, B>(op: F, backoff: &mut B) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
    B: BackoffStrategy + ?Sized,
{
    retry_counted(op, backoff).await.result
}

/// Same as [`retry`], also reporting the number of invocations.
pub async fn retry_counted<F, Fut, T, E, B>(mut op: F, backoff: &mut B) -> Attempted<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
    B: BackoffStrategy + ?Sized,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        tracing::trace!(attempt = attempts, state = %AttemptState::Attempting, "Attempt started");

        let err = match op().await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts,
                    state: AttemptState::after_attempt(true, false),
                };
            }
            Err(err) => err,
        };

        // a non-retryable error leaves the backoff untouched
        let retryable = err.is_retryable();
        let pause = if retryable { backoff.pause() } else { None };
        let state = AttemptState::after_attempt(false, pause.is_some());

        match pause {
            Some(pause) => {
                tracing::debug!(
                    attempt = attempts,
                    state = %state,
                    pause_ms = pause.as_millis() as u64,
                    error = %err,
                    "Attempt failed, retrying"
                );
                sleep(pause).await;
            }
            None => {
                tracing::warn!(
                    attempts,
                    state = %state,
                    retryable,
                    error = %err,
                    "Giving up"
                );
                return Attempted {
                    result: Err(err),
                    attempts,
                    state,
                };
            }
        }
    }
}
