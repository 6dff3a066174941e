//! Retry classifiers: decide whether a failed call is retried and after what delay.

use super::LimiterPolicy;
use crate::error::ApiError;
use std::time::Duration;

/// Decides what happens to a failed job.
///
/// `retry_count` is the number of retries already spent on the job. Returning
/// `Some(delay)` retries the same job after `delay`; `None` fails it and hands
/// the original error back to the caller.
pub trait RetryClassifier<E>: Send + Sync {
    /// Classify one failure.
    fn retry_after(&self, error: &E, retry_count: u32, policy: &LimiterPolicy)
        -> Option<Duration>;
}

/// Retries every failure until the retry budget is spent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl<E> RetryClassifier<E> for DefaultClassifier {
    fn retry_after(
        &self,
        _error: &E,
        retry_count: u32,
        policy: &LimiterPolicy,
    ) -> Option<Duration> {
        (retry_count < policy.retry_limit).then_some(policy.retry_delay)
    }
}

/// Chat platform classifier.
///
/// Malformed requests and flood-control denials are never retried: neither is
/// fixed by sending the same call again. Everything else falls back to
/// [`DefaultClassifier`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TelegramClassifier;

impl RetryClassifier<ApiError> for TelegramClassifier {
    fn retry_after(
        &self,
        error: &ApiError,
        retry_count: u32,
        policy: &LimiterPolicy,
    ) -> Option<Duration> {
        if error.is_permanent() {
            return None;
        }
        DefaultClassifier.retry_after(error, retry_count, policy)
    }
}
