//! Configuration for circuit breakers.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use crate::breaker::Breaker;
use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;

// Keeps `Instant + duration` well inside every platform's range.
const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Thresholds and timers of a breaker. Immutable once the breaker is built.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// How long a half-open window lasts before it is judged expired.
    pub probe_timeout: Duration,

    /// How long an open breaker rejects calls before admitting a probe.
    pub cooldown: Duration,

    /// Failures a window must collect before its failure rate is judged.
    pub failure_count_threshold: u32,

    /// Failure percentage, in `(0, 100]`, at which a judged window trips.
    pub failure_rate_threshold: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(5000),
            cooldown: Duration::from_millis(5000),
            failure_count_threshold: 10,
            failure_rate_threshold: 50.0,
        }
    }
}

impl BreakerConfig {
    /// Checks every field, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_duration("probe timeout", self.probe_timeout)?;
        check_duration("cooldown", self.cooldown)?;

        if self.failure_count_threshold == 0 {
            return Err(ConfigError::ZeroFailureCountThreshold);
        }

        let rate = self.failure_rate_threshold;
        if !(rate > 0.0 && rate <= 100.0) {
            return Err(ConfigError::FailureRateOutOfRange(rate));
        }

        Ok(())
    }
}

fn check_duration(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ZeroDuration(name));
    }
    if value > MAX_DURATION {
        return Err(ConfigError::DurationTooLong(name));
    }
    Ok(())
}

/// Builder for creating breakers with custom configurations.
pub struct BreakerBuilder<T, E, C = SystemClock>
where
    C: Clock,
{
    config: BreakerConfig,
    clock: C,
    _types: PhantomData<fn() -> (T, E)>,
}

impl<T, E> Default for BreakerBuilder<T, E, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> BreakerBuilder<T, E, SystemClock> {
    /// Creates a new builder with default settings and the system clock.
    pub fn new() -> Self {
        Self {
            config: BreakerConfig::default(),
            clock: SystemClock,
            _types: PhantomData,
        }
    }
}

impl<T, E, C> BreakerBuilder<T, E, C>
where
    T: Send + 'static,
    E: Send + 'static,
    C: Clock,
{
    /// Sets how long a half-open window stays active.
    pub fn probe_timeout(mut self, duration: Duration) -> Self {
        self.config.probe_timeout = duration;
        self
    }

    /// Sets how long the breaker stays open before admitting a probe.
    pub fn cooldown(mut self, duration: Duration) -> Self {
        self.config.cooldown = duration;
        self
    }

    /// Sets the number of failures a window needs before its rate is judged.
    pub fn failure_count_threshold(mut self, count: u32) -> Self {
        self.config.failure_count_threshold = count;
        self
    }

    /// Sets the failure percentage that trips the breaker.
    pub fn failure_rate_threshold(mut self, percent: f64) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: BreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Changes the clock the breaker reads deadlines from.
    pub fn clock<NewC: Clock>(self, clock: NewC) -> BreakerBuilder<T, E, NewC> {
        BreakerBuilder {
            config: self.config,
            clock,
            _types: PhantomData,
        }
    }

    /// Validates the configuration and wraps `operation` in a new breaker.
    pub fn build<F, Fut>(self, operation: F) -> Result<Breaker<T, E, C>, ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Breaker::with_clock(operation, self.config, self.clock)
    }
}
