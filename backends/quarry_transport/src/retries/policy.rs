//! Status-driven retry policy with full-jitter backoff.
//!
//! A [`RetryPolicy`] answers two questions for the pool: is this status worth
//! another attempt ([`RetryPolicy::should_retry`]), and how long to wait before
//! it ([`RetryPolicy::wait_time`]). Waits are sampled uniformly from
//! `[0, min(ceiling, bound(attempt))]` using the calling thread's own
//! generator, so concurrent callers never contend on a shared RNG and never
//! retry in lockstep.

use std::time::Duration;

use super::{
    pause, RetryDecider, RetryState, DEFAULT_BASE_DELAY, DEFAULT_DELAY_CEILING,
    DEFAULT_MAX_ATTEMPTS,
};

/// Synthetic status meaning "the connection is unusable".
///
/// It lies outside the three-digit HTTP status space but inside the policy's
/// bitset, and every policy marks it retryable.
pub const DEAD_STREAM_STATUS: i32 = 1000;

/// Exclusive upper bound of the status codes a policy can mark retryable.
pub const STATUS_CODE_RANGE: i32 = 1024;

/// Status codes retried by [`RetryPolicy::default`], alongside the sentinel.
pub const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

const BITSET_WORDS: usize = (STATUS_CODE_RANGE as usize) / 64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base_delay * 2^attempt`.
    #[default]
    Exponential,
    /// `base_delay` for every attempt.
    Constant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    delay_ceiling: Duration,
    strategy: BackoffStrategy,
    max_attempts: u32,
    retryable: [u64; BITSET_WORDS],
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_BASE_DELAY,
            DEFAULT_DELAY_CEILING,
            BackoffStrategy::Exponential,
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_RETRY_STATUSES,
        )
    }
}

impl RetryPolicy {
    /// Builds a policy. Codes at or above [`STATUS_CODE_RANGE`] are ignored,
    /// and a `max_attempts` of zero is treated as one.
    pub fn new<I>(
        base_delay: Duration,
        delay_ceiling: Duration,
        strategy: BackoffStrategy,
        max_attempts: u32,
        retry_on: I,
    ) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        let mut policy = Self {
            base_delay,
            delay_ceiling,
            strategy,
            max_attempts: max_attempts.max(1),
            retryable: [0; BITSET_WORDS],
        };

        policy.mark(DEAD_STREAM_STATUS);
        for code in retry_on {
            if i32::from(code) >= STATUS_CODE_RANGE {
                tracing::debug!("Ignoring retry status {code}: outside the representable range");
                continue;
            }
            policy.mark(i32::from(code));
        }

        policy
    }

    /// A policy that never retries: one attempt, no backoff.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(
            Duration::ZERO,
            Duration::ZERO,
            BackoffStrategy::Constant,
            1,
            [],
        )
    }

    fn mark(&mut self, code: i32) {
        if let Some((word, bit)) = Self::locate(code) {
            self.retryable[word] |= 1u64 << bit;
        }
    }

    fn locate(code: i32) -> Option<(usize, u32)> {
        if !(0..STATUS_CODE_RANGE).contains(&code) {
            return None;
        }
        let code = u32::try_from(code).ok()?;
        Some(((code / 64) as usize, code % 64))
    }

    #[must_use]
    pub fn should_retry(&self, status: i32) -> bool {
        match Self::locate(status) {
            Some((word, bit)) => self.retryable[word] & (1u64 << bit) != 0,
            None => false,
        }
    }

    /// Every code the policy retries, in ascending order, sentinel included.
    #[must_use]
    pub fn retryable_statuses(&self) -> Vec<i32> {
        (0..STATUS_CODE_RANGE)
            .filter(|code| self.should_retry(*code))
            .collect()
    }

    #[must_use]
    pub fn backoff_bound(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Constant => self.base_delay,
            BackoffStrategy::Exponential => match 2u32.checked_pow(attempt) {
                Some(factor) => self.base_delay.saturating_mul(factor),
                None => Duration::MAX,
            },
        }
    }

    /// Samples a wait uniformly from `[0, min(ceiling, backoff_bound(attempt))]`.
    #[must_use]
    pub fn wait_time(&self, attempt: u32) -> Duration {
        let bound = self.delay_ceiling.min(self.backoff_bound(attempt));
        let bound_nanos = u64::try_from(bound.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(fastrand::u64(0..=bound_nanos))
    }

    /// Blocks for a freshly sampled [`RetryPolicy::wait_time`] and returns it.
    pub fn wait(&self, attempt: u32) -> Duration {
        let wait = self.wait_time(attempt);
        pause(wait);
        wait
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub fn delay_ceiling(&self) -> Duration {
        self.delay_ceiling
    }

    #[must_use]
    pub fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    /// Initial state for a logical request governed by this policy.
    #[must_use]
    pub fn start(&self) -> RetryState {
        RetryState::new(0, self.max_attempts, None)
    }
}

impl RetryDecider for RetryPolicy {
    fn decide(&self, state: RetryState) -> Option<RetryState> {
        if !state.can_retry() {
            return None;
        }

        Some(RetryState {
            wait: Some(self.wait_time(state.attempt)),
            attempt: state.attempt.saturating_add(1),
            total_allowed: state.total_allowed,
        })
    }
}
