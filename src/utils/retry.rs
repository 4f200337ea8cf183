use backoff::{Error as BackoffError, ExponentialBackoff, ExponentialBackoffBuilder};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RpcSettings;
use crate::error::ChainError;

/// Errors that know whether a retry could help
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ChainError {
    fn is_retryable(&self) -> bool {
        ChainError::is_retryable(self)
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = max_retries + 1
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_interval: Duration) -> Self {
        Self {
            max_retries,
            initial_interval,
            ..Default::default()
        }
    }

    pub fn from_settings(settings: &RpcSettings) -> Self {
        Self::new(settings.retries, Duration::from_millis(settings.backoff_ms))
    }

    /// Deterministic doubling schedule; the attempt budget bounds total time
    pub fn to_exponential_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Retry an async operation with exponential backoff.
    ///
    /// Non-retryable errors and the error of the final attempt are returned as-is.
    pub async fn retry_async<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let backoff = self.to_exponential_backoff();
        let max_retries = self.max_retries;
        let mut attempt: u32 = 0;

        let retry_operation = || {
            attempt += 1;
            let current = attempt;
            let fut = operation();
            async move {
                match fut.await {
                    Ok(result) => {
                        if current > 1 {
                            debug!("{} succeeded on attempt {}", operation_name, current);
                        }
                        Ok(result)
                    }
                    Err(e) if e.is_retryable() && current <= max_retries => {
                        warn!(
                            "{} failed on attempt {}/{}, will retry: {}",
                            operation_name,
                            current,
                            max_retries + 1,
                            e
                        );
                        Err(BackoffError::transient(e))
                    }
                    Err(e) => Err(BackoffError::permanent(e)),
                }
            }
        };

        backoff::future::retry(backoff, retry_operation).await
    }
}
