use std::time;

pub const DEFAULT_BASE_DELAY: time::Duration = time::Duration::from_millis(100);
pub const DEFAULT_DELAY_CEILING: time::Duration = time::Duration::from_millis(1000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Where a logical request stands in its retry budget.
///
/// `attempt` is the zero-based index of the attempt about to run (or that
/// just ran, before a decider has been consulted). `wait` is the pause to
/// observe before running it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryState {
    pub wait: Option<time::Duration>,
    pub total_allowed: u32,
    pub attempt: u32,
}

impl RetryState {
    #[must_use]
    pub fn new(attempt: u32, total_allowed: u32, wait: Option<time::Duration>) -> Self {
        Self {
            wait,
            total_allowed,
            attempt,
        }
    }

    /// Whether another attempt fits in the budget after this one.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.attempt.saturating_add(1) < self.total_allowed
    }

    /// Number of attempts consumed once the current one has run.
    #[must_use]
    pub fn attempts_used(&self) -> u32 {
        self.attempt.saturating_add(1)
    }
}

/// `RetryDecider` decides whether another attempt should follow the one
/// described by `state`, and how long to wait before it. Returning `None`
/// ends the retry loop.
pub trait RetryDecider {
    fn decide(&self, state: RetryState) -> Option<RetryState>;
}

/// Blocks the calling thread for `wait`. Zero waits return immediately.
pub fn pause(wait: time::Duration) {
    if wait.is_zero() {
        return;
    }
    std::thread::sleep(wait);
}
