//! Bounded retry with exponential backoff around an execution client.
//!
//! Only errors that report [`ExecutionError::is_retryable`] are retried;
//! rejections pass straight through.

use std::time::Duration;
use tracing::warn;

use crate::domain::execution::{Balance, ExecutionError, Fill, OrderRequest};
use crate::domain::snapshot::Venue;
use crate::ports::execution_port::OrderExecutionClient;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(attempt.saturating_sub(1) as i32);
        self.initial_backoff.mul_f64(factor).min(self.max_backoff)
    }
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub struct RetryingClient<C, S = ThreadSleeper> {
    inner: C,
    policy: RetryPolicy,
    sleeper: S,
}

impl<C: OrderExecutionClient> RetryingClient<C, ThreadSleeper> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self::with_sleeper(inner, policy, ThreadSleeper)
    }
}

impl<C: OrderExecutionClient, S: Sleeper> RetryingClient<C, S> {
    pub fn with_sleeper(inner: C, policy: RetryPolicy, sleeper: S) -> Self {
        RetryingClient {
            inner,
            policy,
            sleeper,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    fn with_retry<T>(
        &mut self,
        mut call: impl FnMut(&mut C) -> Result<T, ExecutionError>,
    ) -> Result<T, ExecutionError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call(&mut self.inner) {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) if attempt >= max_attempts => {
                    return Err(ExecutionError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }
                Err(error) => {
                    let delay = self.policy.backoff(attempt);
                    warn!(attempt, ?delay, error = %error, "retrying execution call");
                    self.sleeper.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl<C: OrderExecutionClient, S: Sleeper> OrderExecutionClient for RetryingClient<C, S> {
    fn execute(&mut self, order: &OrderRequest) -> Result<Fill, ExecutionError> {
        self.with_retry(|inner| inner.execute(order))
    }

    /// Not retried; balance queries are cheap to repeat at the caller.
    fn balance(&self, venue: Venue) -> Result<Balance, ExecutionError> {
        self.inner.balance(venue)
    }
}
