//! Rate-limited call scheduling.
//!
//! A [`Limiter`] spaces job starts by `min_time`, caps in-flight jobs at
//! `max_concurrent` and retries failures according to a [`RetryClassifier`].
//! Jobs are admitted in submission order; a retried job re-enters the queue
//! behind jobs submitted while it was waiting.
//!
//! Independently constructed clients share one quota by asking a
//! [`LimiterPool`] for the same id.

mod classifier;

pub use classifier::{DefaultClassifier, RetryClassifier, TelegramClassifier};

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore, SemaphorePermit};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// Throttling and retry parameters of one limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterPolicy {
    /// Minimum time between two job starts.
    pub min_time: Duration,
    /// Maximum number of jobs running at once.
    pub max_concurrent: usize,
    /// Retries granted to each job.
    pub retry_limit: u32,
    /// Delay before each retry.
    pub retry_delay: Duration,
}

impl Default for LimiterPolicy {
    fn default() -> Self {
        Self {
            min_time: Duration::from_millis(50),
            max_concurrent: 4,
            retry_limit: 10,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl From<&crate::config::Settings> for LimiterPolicy {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            min_time: settings.limiter_min_time(),
            max_concurrent: settings.limiter_max_concurrent,
            retry_limit: settings.limiter_retry_limit,
            retry_delay: settings.limiter_retry_delay(),
        }
    }
}

/// Counters exposed for monitoring.
#[derive(Debug, Default)]
pub struct LimiterStats {
    scheduled: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

impl LimiterStats {
    /// Jobs submitted so far.
    #[must_use]
    pub fn scheduled(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }

    /// Failed attempts that were retried.
    #[must_use]
    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    /// Jobs that failed for good.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Queue that throttles and retries async jobs.
pub struct Limiter {
    id: String,
    policy: LimiterPolicy,
    slots: Semaphore,
    // Held while waiting for the spacing window so starts stay in FIFO order.
    next_start: Mutex<Instant>,
    stats: LimiterStats,
}

impl Limiter {
    /// Create a standalone limiter.
    #[must_use]
    pub fn new(id: impl Into<String>, policy: LimiterPolicy) -> Self {
        Self {
            id: id.into(),
            policy,
            slots: Semaphore::new(policy.max_concurrent.max(1)),
            next_start: Mutex::new(Instant::now()),
            stats: LimiterStats::default(),
        }
    }

    /// Shared id of this limiter.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Policy the limiter was built with.
    #[must_use]
    pub const fn policy(&self) -> &LimiterPolicy {
        &self.policy
    }

    /// Monitoring counters.
    #[must_use]
    pub const fn stats(&self) -> &LimiterStats {
        &self.stats
    }

    async fn acquire_slot(&self) -> Option<SemaphorePermit<'_>> {
        // the semaphore is never closed; a failed acquire just runs unthrottled
        let permit = self.slots.acquire().await.ok();

        let mut next_start = self.next_start.lock().await;
        if *next_start > Instant::now() {
            sleep_until(*next_start).await;
        }
        *next_start = Instant::now() + self.policy.min_time;
        permit
    }

    /// Run `job` through the queue, retrying failures as `classifier` decides.
    ///
    /// `label` names the call in logs. The error of the last attempt is
    /// returned unchanged once the classifier gives up.
    ///
    /// # Errors
    ///
    /// Returns the job's own error when it is not retried any more.
    pub async fn schedule<T, E, F, Fut>(
        &self,
        label: &str,
        classifier: &dyn RetryClassifier<E>,
        mut job: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        let mut retry_count = 0;

        loop {
            let result = {
                let _permit = self.acquire_slot().await;
                job().await
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match classifier.retry_after(&error, retry_count, &self.policy) {
                Some(delay) => {
                    retry_count += 1;
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        limiter = %self.id,
                        call = label,
                        retry = retry_count,
                        "Call failed, retrying in {delay:?}: {error}"
                    );
                    sleep(delay).await;
                }
                None => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        limiter = %self.id,
                        call = label,
                        retries = retry_count,
                        "Call failed permanently: {error}"
                    );
                    return Err(error);
                }
            }
        }
    }
}

/// Registry of limiters keyed by shared id.
#[derive(Default)]
pub struct LimiterPool {
    limiters: RwLock<HashMap<String, Arc<Limiter>>>,
}

impl LimiterPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the limiter registered under `id`, creating it with `policy` first.
    ///
    /// The policy of an existing limiter is kept; a differing one is only logged.
    pub async fn shared(&self, id: &str, policy: LimiterPolicy) -> Arc<Limiter> {
        {
            let limiters = self.limiters.read().await;
            if let Some(limiter) = limiters.get(id) {
                if limiter.policy() != &policy {
                    debug!(limiter = id, "Reusing limiter with its original policy");
                }
                return Arc::clone(limiter);
            }
        }

        let mut limiters = self.limiters.write().await;
        Arc::clone(limiters.entry(id.to_string()).or_insert_with(|| {
            info!(limiter = id, ?policy, "Created limiter");
            Arc::new(Limiter::new(id, policy))
        }))
    }

    /// Number of distinct limiters.
    pub async fn len(&self) -> usize {
        self.limiters.read().await.len()
    }

    /// Check if no limiter was created yet.
    pub async fn is_empty(&self) -> bool {
        self.limiters.read().await.is_empty()
    }
}
