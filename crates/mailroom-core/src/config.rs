//! Service configuration and runtime-adjustable settings

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Lowest number of delivery attempts an administrator may configure.
pub const MIN_RETRY_ATTEMPTS: u32 = 1;
/// Highest number of delivery attempts an administrator may configure.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;
/// Default number of delivery attempts per job.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Default exponential backoff base delay between delivery attempts.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5_000;

/// Retry policy assigned to a job at enqueue time.
///
/// Jobs keep the policy they were enqueued with; runtime configuration
/// changes only affect subsequently enqueued jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total delivery attempts (first attempt included), clamped to 1-5
    pub max_attempts: u32,
    /// Base delay for exponential backoff, doubling per retry
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.clamp(MIN_RETRY_ATTEMPTS, MAX_RETRY_ATTEMPTS),
            backoff_base_ms,
        }
    }

    /// Delay to wait before redelivering after the given completed
    /// attempt (1-based): base, 2*base, 4*base, ...
    pub fn backoff_for(&self, completed_attempt: u32) -> Duration {
        let factor = 1u64 << completed_attempt.saturating_sub(1).min(31);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Shared handle over the retry policy applied to new enqueues.
///
/// The admin surface updates this at runtime; in-flight jobs are not
/// affected because every queue entry carries its own policy copy.
#[derive(Debug, Clone, Default)]
pub struct RetrySettings {
    inner: Arc<RwLock<RetryPolicy>>,
}

impl RetrySettings {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(policy)),
        }
    }

    pub async fn current(&self) -> RetryPolicy {
        *self.inner.read().await
    }

    /// Update the attempt count for subsequently enqueued jobs,
    /// clamped to the allowed 1-5 range. Returns the applied value.
    pub async fn set_max_attempts(&self, max_attempts: u32) -> u32 {
        let clamped = max_attempts.clamp(MIN_RETRY_ATTEMPTS, MAX_RETRY_ATTEMPTS);
        let mut policy = self.inner.write().await;
        policy.max_attempts = clamped;
        clamped
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailroomConfig {
    pub database_url: String,
    /// Number of concurrent delivery workers
    pub worker_concurrency: usize,
    /// Dispatch queue channel capacity
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    /// Recipient domains accepted by the intake handler
    pub allowed_domains: Vec<String>,
    /// TTL for cached successful credential validations
    pub positive_cache_ttl_secs: u64,
    /// TTL for cached rejected credential validations (shorter, to
    /// bound the footprint of invalid probing)
    pub negative_cache_ttl_secs: u64,
    /// When set, newly issued credentials require administrative
    /// approval before they authenticate
    pub require_approval: bool,
}

impl Default for MailroomConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            worker_concurrency: 5,
            queue_capacity: 1000,
            retry: RetryPolicy::default(),
            allowed_domains: Vec::new(),
            positive_cache_ttl_secs: 300,
            negative_cache_ttl_secs: 30,
            require_approval: false,
        }
    }
}

impl MailroomConfig {
    pub fn positive_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.positive_cache_ttl_secs)
    }

    pub fn negative_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_cache_ttl_secs)
    }
}
