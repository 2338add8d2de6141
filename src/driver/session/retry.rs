// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::result::Result as StdResult;
use std::thread::sleep;
use std::time::Duration;

use log::warn;
use rand::Rng;
use thiserror::Error;

use crate::error::{DriverError, Result};
use crate::time::Instant;

// imports for docs
#[allow(unused)]
use crate::driver::session::TransactionBuilder;

/// Specifies how to retry work.
///
/// The driver uses this trait in [`TransactionBuilder::run_with_retry()`].
/// A default implementation is provided through [`ExponentialBackoff`].
///
/// # Example
/// ```no_run
/// use graphbolt::retry::RetryPolicy;
/// use graphbolt::{DriverError, Result as DriverResult};
///
/// /// Custom retry policy that will never give up.
/// /// ... except, it might get stuck in an infinite retry loop ¯\_(ツ)_/¯
/// /// Also, it doesn't pause between retries.
/// struct MyRetryPolicy;
///
/// struct RetryError(DriverError);
///
/// impl RetryPolicy for MyRetryPolicy {
///     type Error = RetryError;
///
///     fn execute<R>(&self, mut work: impl FnMut() -> DriverResult<R>) -> Result<R, Self::Error> {
///         // The policy gets to decide what errors to retry,
///         // how often, and how long to wait in between retries.
///         loop {
///             match work() {
///                 Ok(r) => return Ok(r),
///                 Err(err) => {
///                     if !err.is_retryable() {
///                         return Err(RetryError(err));
///                     }
///                 }
///             }
///         }
///     }
/// }
/// ```
pub trait RetryPolicy {
    type Error;

    fn execute<R>(&self, work: impl FnMut() -> Result<R>) -> StdResult<R, Self::Error>;
}

/// [`RetryPolicy`] that retries work with exponential backoff.
///
/// Exponential backoff means that the time between retries will increase
/// exponentially:
///  * work fails → wait 1 second
///  * work fails → wait 2 seconds
///  * work fails → wait 4 seconds
///  * ...
///
/// By default, it will retry for up to 30 seconds in total.
/// This can be changed with [`ExponentialBackoff::with_max_retry_time()`].
///
/// Currently, the implementation uses a start pause of 1 second, a factor of
/// 2, and a random jitter factor of `(0.8..=1.2)`; pauses never exceed half
/// the remaining retry budget.
/// This is an implementation detail and might change in the future.
///
/// The policy will return a [`RetryError::DriverError`] if the work function
/// returns a non-retryable [`DriverError`]. It will return a
/// [`RetryError::Timeout`] when the policy would start another attempt, but
/// the time since the end of the first attempt exceeds the maximum retry
/// time.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_retry_time: Duration,
    factor: f64,
    jitter: f64,
}

/// Error type returned by [`RetryPolicy::execute()`] to distinguish work
/// that failed with a non-retryable error from an exhausted retry budget.
///
/// In particular, [`ExponentialBackoff`] makes use of this error type.
#[derive(Error, Debug)]
pub enum RetryError {
    /// The work failed with a non-retryable driver error.
    #[error("non-retryable error occurred: {0}")]
    DriverError(#[from] DriverError),
    /// The retry budget was exhausted.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

/// Used to indicate that a retry loop timed out.
///
/// All errors encountered during the retry loop are collected and can be
/// accessed through [`TimeoutError::errors`].
///
/// See also [`RetryError::Timeout`].
#[derive(Error, Debug)]
#[error("timeout occurred while retrying. Last error: {}", .errors.last().expect("timeout implies at least one error"))]
pub struct TimeoutError {
    /// Errors encountered during the retry loop, oldest first.
    pub errors: Vec<DriverError>,
}

impl From<TimeoutError> for Vec<DriverError> {
    fn from(value: TimeoutError) -> Self {
        value.errors
    }
}

impl ExponentialBackoff {
    /// Create a new exponential backoff policy with default settings.
    ///
    /// Same as [`ExponentialBackoff::default()`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Change for how long the policy will retry, before giving up.
    #[inline]
    pub fn with_max_retry_time(self, max_retry_time: Duration) -> Self {
        Self {
            max_retry_time,
            ..self
        }
    }
}

impl Default for ExponentialBackoff {
    #[inline]
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_retry_time: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy for &ExponentialBackoff {
    type Error = RetryError;

    fn execute<R>(&self, mut work: impl FnMut() -> Result<R>) -> StdResult<R, Self::Error> {
        assert!(self.jitter >= 0.0);
        assert!(self.jitter < 1.0);
        let mut time_start = None;
        let mut errors: Option<Vec<DriverError>> = None;
        let mut current_delay = self.initial_delay.as_secs_f64();
        let mut rng = rand::thread_rng();
        loop {
            let res = work();
            if time_start.is_none() {
                time_start = Some(Instant::now());
            }
            let err = match res {
                Err(e) if e.is_retryable() => e,
                _ => return res.map_err(Into::into),
            };
            errors.get_or_insert_with(Vec::new).push(err);
            let time_elapsed = time_start.expect("set since first attempt").elapsed();
            if time_elapsed > self.max_retry_time {
                return Err(TimeoutError {
                    errors: errors.expect("at least one error pushed above"),
                }
                .into());
            }
            let time_remaining = self.max_retry_time - time_elapsed;
            let jitter_factor = 1.0 + rng.gen_range(-self.jitter..=self.jitter);
            let jittered_delay =
                (current_delay * jitter_factor).min(time_remaining.as_secs_f64() / 2.0);
            warn!(
                "transaction failed and will be retried in {:.4} seconds: {}",
                jittered_delay,
                errors
                    .as_ref()
                    .and_then(|e| e.last())
                    .expect("at least one error pushed above")
            );
            sleep(Duration::try_from_secs_f64(jittered_delay).unwrap_or(Duration::ZERO));
            current_delay *= self.factor;
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    type Error = <&'static ExponentialBackoff as RetryPolicy>::Error;

    fn execute<R>(&self, work: impl FnMut() -> Result<R>) -> StdResult<R, Self::Error> {
        (&self).execute(work)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::error::ServerError;

    fn transient_error() -> DriverError {
        DriverError::from_server_error(ServerError::new(
            "Neo.TransientError.Transaction.DeadlockDetected".into(),
            "deadlock".into(),
        ))
    }

    fn client_error() -> DriverError {
        DriverError::from_server_error(ServerError::new(
            "Neo.ClientError.Statement.SyntaxError".into(),
            "syntax".into(),
        ))
    }

    fn fast_backoff() -> ExponentialBackoff {
        ExponentialBackoff {
            initial_delay: Duration::from_millis(1),
            max_retry_time: Duration::from_millis(200),
            factor: 2.0,
            jitter: 0.2,
        }
    }

    #[test]
    fn test_third_attempt_succeeds() {
        let policy = fast_backoff();
        let count = Cell::new(0);
        let result = policy.execute(|| {
            count.set(count.get() + 1);
            if count.get() < 3 {
                Err(transient_error())
            } else {
                Ok(count.get())
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn test_non_retryable_error_fails_immediately() {
        let policy = fast_backoff();
        let count = Cell::new(0);
        let result: StdResult<(), _> = policy.execute(|| {
            count.set(count.get() + 1);
            Err(client_error())
        });
        assert!(matches!(result, Err(RetryError::DriverError(_))));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_budget_exhaustion_keeps_error_history() {
        let policy = fast_backoff();
        let result: StdResult<(), _> = policy.execute(|| Err(transient_error()));
        let Err(RetryError::Timeout(timeout)) = result else {
            panic!("expected timeout error");
        };
        assert!(timeout.errors.len() > 1);
        assert!(timeout.errors.iter().all(DriverError::is_retryable));
    }

    #[test]
    fn test_budget_not_exhausted_early() {
        let policy = fast_backoff();
        let started = Instant::now();
        let _: StdResult<(), _> = policy.execute(|| Err(transient_error()));
        assert!(started.elapsed() >= policy.max_retry_time);
    }
}
