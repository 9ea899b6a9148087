//! Simulated step failures.
//!
//! The consumption step consults a [`FaultInjector`] right after the cursor
//! upsert; a hit aborts the whole transaction. The injector is a capability
//! handed to the lanes, not a coin flip baked into the algorithm, so tests
//! can force deterministic failure sequences.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};

/// Decides whether a step attempt should fail.
pub trait FaultInjector: Send + Sync {
    fn should_fail(&self) -> bool;
}

/// Configuration for random fault injection.
#[derive(Clone, Debug)]
pub struct FaultConfig {
    /// Probability of failing a step attempt (0.0 to 1.0).
    /// - 0.0 = never fail (pass-through)
    /// - 0.5 = fail half of the attempts (the reference behavior)
    /// - 1.0 = fail every attempt
    pub rate: f64,
    /// Whether to log injected failures.
    pub log_hits: bool,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl FaultConfig {
    /// Never fail.
    pub fn none() -> Self {
        Self {
            rate: 0.0,
            log_hits: false,
        }
    }

    /// Fail with the given probability, clamped to [0.0, 1.0].
    pub fn with_rate(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
            log_hits: true,
        }
    }

    /// Fail every attempt.
    pub fn always() -> Self {
        Self {
            rate: 1.0,
            log_hits: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.rate > 0.0
    }
}

/// Counters for injected faults.
#[derive(Debug, Default)]
pub struct FaultStats {
    /// Step attempts that consulted the injector.
    pub checked: AtomicU64,
    /// Attempts that were failed.
    pub injected: AtomicU64,
}

impl FaultStats {
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.checked.load(Ordering::Relaxed),
            self.injected.load(Ordering::Relaxed),
        )
    }

    /// Fraction of checked attempts that were failed.
    pub fn observed_rate(&self) -> f64 {
        let checked = self.checked.load(Ordering::Relaxed);
        if checked == 0 {
            0.0
        } else {
            self.injected.load(Ordering::Relaxed) as f64 / checked as f64
        }
    }

    pub fn reset(&self) {
        self.checked.store(0, Ordering::Relaxed);
        self.injected.store(0, Ordering::Relaxed);
    }
}

/// Random injector with a fixed failure probability.
pub struct RandomFaults {
    config: FaultConfig,
    stats: Arc<FaultStats>,
}

impl RandomFaults {
    pub fn new(config: FaultConfig) -> Self {
        if config.is_active() {
            warn!(
                rate = config.rate,
                "fault injection enabled - step attempts may be failed"
            );
        }
        Self {
            config,
            stats: Arc::new(FaultStats::default()),
        }
    }

    /// An injector that never fires.
    pub fn passthrough() -> Self {
        Self::new(FaultConfig::none())
    }

    pub fn stats(&self) -> &FaultStats {
        &self.stats
    }
}

impl FaultInjector for RandomFaults {
    fn should_fail(&self) -> bool {
        self.stats.checked.fetch_add(1, Ordering::Relaxed);

        let hit = if self.config.rate <= 0.0 {
            false
        } else if self.config.rate >= 1.0 {
            true
        } else {
            rand::rng().random::<f64>() < self.config.rate
        };

        if hit {
            self.stats.injected.fetch_add(1, Ordering::Relaxed);
            if self.config.log_hits {
                debug!("injected step failure");
            }
        }
        hit
    }
}

/// Scripted injector for deterministic tests: replays a fixed sequence of
/// decisions, then succeeds forever.
pub struct ScriptedFaults {
    script: Vec<bool>,
    next: AtomicUsize,
}

impl ScriptedFaults {
    pub fn new(script: Vec<bool>) -> Self {
        Self {
            script,
            next: AtomicUsize::new(0),
        }
    }

    /// Fail the first `count` attempts, then succeed forever.
    pub fn failures(count: usize) -> Self {
        Self::new(vec![true; count])
    }
}

impl FaultInjector for ScriptedFaults {
    fn should_fail(&self) -> bool {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        self.script.get(index).copied().unwrap_or(false)
    }
}
