//! Bounded retry for conflicting writes.
//!
//! Only errors with `LedgerError::is_retryable()` are retried: a lost
//! optimistic-version race or a busy database. Everything else is returned
//! on the first attempt. Each retry re-runs the whole atomic unit, so the
//! operation re-reads the referrer and recomputes from fresh state.

use crate::error::LedgerResult;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    /// No retries. Conflicts surface immediately.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }

    pub fn run<T>(&self, label: &str, mut op: impl FnMut() -> LedgerResult<T>) -> LedgerResult<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    log::warn!("{label}: attempt {attempt} conflicted ({e}); retrying in {delay:?}");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
