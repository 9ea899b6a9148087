//! Retry policy for transient step failures.
//!
//! The reference behavior retries aborted steps forever with no backoff; a
//! capped policy with exponential backoff, cap, and jitter is available as
//! an explicit configuration choice instead of a hard-coded loop.

use std::time::Duration;

/// Configuration for capped retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base delay for first retry (before jitter).
    pub base_delay: Duration,
    /// Maximum delay cap (before jitter).
    pub max_delay: Duration,
    /// Maximum number of retry attempts (0 = no retries, just initial attempt).
    pub max_retries: u32,
    /// Jitter factor: delay is multiplied by random value in [1-jitter, 1+jitter].
    /// Set to 0.0 for no jitter.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(2),
            max_retries: 10,
            jitter: 0.25, // ±25% jitter
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// Uses exponential backoff: delay = base * 2^attempt, capped at max_delay.
    /// Jitter is applied using a simple hash-based approach to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Exponential backoff: base * 2^attempt
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential_ms = base_ms.saturating_mul(1u64 << attempt.min(20));

        // Cap at max delay
        let capped_ms = exponential_ms.min(self.max_delay.as_millis() as u64);

        // Apply jitter using simple deterministic hash
        // Uses current time nanos + attempt as entropy source
        let jittered_ms = if self.jitter > 0.0 {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0) as u64;
            // Simple hash combining time and attempt
            let hash = now.wrapping_mul(31).wrapping_add(attempt as u64 * 17);
            // Map to jitter range: hash % 1000 gives 0-999, normalize to [-jitter, +jitter]
            let jitter_pct = ((hash % 1000) as f64 / 1000.0) * 2.0 - 1.0; // -1.0 to 1.0
            let jitter_factor = 1.0 + (jitter_pct * self.jitter);
            (capped_ms as f64 * jitter_factor) as u64
        } else {
            capped_ms
        };

        Duration::from_millis(jittered_ms)
    }

    /// Check if another retry attempt should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// How a lane handles an aborted step.
#[derive(Debug, Clone, Default)]
pub enum RetryPolicy {
    /// Retry forever, immediately. The reference behavior: an adversarial
    /// 100% failure rate makes the lane loop forever.
    #[default]
    Unbounded,
    /// Give up after a bounded number of attempts per step, sleeping with
    /// exponential backoff between them.
    Capped(RetryConfig),
}

impl RetryPolicy {
    /// Whether the step should be attempted again after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self {
            RetryPolicy::Unbounded => true,
            RetryPolicy::Capped(config) => config.should_retry(attempt),
        }
    }

    /// Delay before retry number `attempt` (0-indexed), if the policy
    /// imposes one.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::Unbounded => None,
            RetryPolicy::Capped(config) => Some(config.delay_for_attempt(attempt)),
        }
    }
}
