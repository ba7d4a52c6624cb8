use crate::config::ConnectivityConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep `backoff_ms`, then make attempt number `next_attempt`.
    Retry { next_attempt: u32, backoff_ms: u64 },
    /// Budget spent; the run has to end in deep sleep.
    Exhausted { attempts: u32 },
}

/// Attempt counter for one broker (re)connect episode.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_attempts: u32,
    backoff_ms: u64,
    failed: u32,
}

impl RetryBudget {
    pub fn new(config: &ConnectivityConfig) -> Self {
        Self {
            max_attempts: config.max_broker_attempts.max(1),
            backoff_ms: config.broker_backoff_ms,
            failed: 0,
        }
    }

    /// One-based number of the attempt about to be made.
    pub fn current_attempt(&self) -> u32 {
        self.failed + 1
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.failed = self.failed.saturating_add(1);
        if self.failed >= self.max_attempts {
            RetryDecision::Exhausted {
                attempts: self.failed,
            }
        } else {
            RetryDecision::Retry {
                next_attempt: self.failed + 1,
                backoff_ms: self.backoff_ms,
            }
        }
    }

    /// A session came up; the next drop starts a fresh budget.
    pub fn record_success(&mut self) {
        self.failed = 0;
    }
}
