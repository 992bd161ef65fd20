//! Backoff strategies consumed by [`crate::retry`].
//!
//! A strategy is a stateful sequence: every call to [`BackoffStrategy::pause`]
//! yields the next pause, or `None` once retrying should stop. Instances are
//! never shared; every worker builds its own from a [`BackoffConfig`].

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;

/// Default base pause (250 ms).
pub const DEFAULT_BASE: Duration = Duration::from_millis(250);

/// Default pause budget; retrying stops once the sum of pauses exceeds it.
pub const DEFAULT_MAX_ELAPSED: Duration = Duration::from_secs(16);

pub trait BackoffStrategy: Send {
    /// Next pause before retrying, or `None` to stop.
    fn pause(&mut self) -> Option<Duration>;
}

impl<B: BackoffStrategy + ?Sized> BackoffStrategy for Box<B> {
    fn pause(&mut self) -> Option<Duration> {
        (**self).pause()
    }
}

/// Exponential backoff with optional full jitter.
///
/// The n-th pause (0-based) is `2^n * base`, or drawn uniformly from
/// `[0, 2^n * base)` when jitter is enabled. Stops once the accumulated pause
/// time exceeds `max_elapsed`, or after `max_retries` pauses when set.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_elapsed: Duration,
    max_retries: Option<u32>,
    jitter: bool,
    n: u32,
    total: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_elapsed: Duration) -> Self {
        Self {
            base,
            max_elapsed,
            max_retries: None,
            jitter: true,
            n: 0,
            total: Duration::ZERO,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn ceiling(&self) -> Duration {
        self.base.saturating_mul(1u32 << self.n.min(31))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_MAX_ELAPSED)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn pause(&mut self) -> Option<Duration> {
        if self.total > self.max_elapsed {
            return None;
        }
        if let Some(max) = self.max_retries
            && self.n >= max
        {
            return None;
        }

        let ceiling = self.ceiling();
        let pause = if self.jitter {
            let nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
            if nanos == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(rand::thread_rng().gen_range(0..nanos))
            }
        } else {
            ceiling
        };

        self.total = self.total.saturating_add(pause);
        self.n += 1;
        Some(pause)
    }
}

/// Hands out a fixed list of pauses, then stops.
#[derive(Debug, Clone, Default)]
pub struct SequenceBackoff {
    pauses: VecDeque<Duration>,
}

impl SequenceBackoff {
    pub fn new(pauses: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            pauses: pauses.into_iter().collect(),
        }
    }

    /// A strategy that never retries.
    pub fn none() -> Self {
        Self::default()
    }
}

impl BackoffStrategy for SequenceBackoff {
    fn pause(&mut self) -> Option<Duration> {
        self.pauses.pop_front()
    }
}

/// Recipe for per-worker [`ExponentialBackoff`] instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max_elapsed: Duration,
    pub max_retries: Option<u32>,
    pub jitter: bool,
}

impl BackoffConfig {
    pub fn build(&self) -> ExponentialBackoff {
        let backoff = ExponentialBackoff::new(self.base, self.max_elapsed).with_jitter(self.jitter);
        match self.max_retries {
            Some(max) => backoff.with_max_retries(max),
            None => backoff,
        }
    }

    /// Deterministic schedule of exactly `retries` doubling pauses starting at `base`.
    pub fn fixed(base: Duration, retries: u32) -> Self {
        Self {
            base,
            max_elapsed: Duration::MAX,
            max_retries: Some(retries),
            jitter: false,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            max_elapsed: DEFAULT_MAX_ELAPSED,
            max_retries: None,
            jitter: true,
        }
    }
}
