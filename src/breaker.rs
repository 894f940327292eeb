//! Core circuit breaker implementation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{BreakerBuilder, BreakerConfig};
use crate::error::{BreakerError, BreakerResult, ConfigError};
use crate::state::{Admission, Machine, Outcome, State, Transition};
use crate::stats::{BreakerStats, Totals};

type Operation<T, E> = dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync;

/// Inner state of the breaker, shared between clones.
struct BreakerInner<C> {
    config: BreakerConfig,
    clock: C,
    machine: Mutex<Machine>,
    stats: BreakerStats,
}

impl<C: Clock> BreakerInner<C> {
    /// Decides, under the lock, whether a call may invoke the operation.
    fn admit(&self) -> Admission {
        let admission = {
            let mut machine = self.machine.lock();
            let now = self.clock.now();
            machine.admit(now)
        };

        match admission {
            Admission::Pass => {}
            Admission::Probe => info!("cooldown elapsed, admitting probe"),
            Admission::Reject => {
                self.stats.record_rejection();
                trace!("circuit open, call rejected");
            }
        }

        admission
    }

    /// Records the outcome of an admitted call.
    fn record(&self, outcome: Outcome, probe: bool) {
        match outcome {
            Outcome::Success => self.stats.record_success(),
            Outcome::Failure => self.stats.record_failure(),
        }
        self.settle(outcome, probe);
    }

    /// Records a call that was dropped while the operation was in flight.
    fn record_cancellation(&self, probe: bool) {
        self.stats.record_cancellation();
        debug!(probe, "in-flight call cancelled, counted as failure");
        self.settle(Outcome::Failure, probe);
    }

    fn settle(&self, outcome: Outcome, probe: bool) {
        let (transition, failures, successes) = {
            let mut machine = self.machine.lock();
            let now = self.clock.now();
            let transition = if probe {
                Some(machine.record_probe(outcome, now, &self.config))
            } else {
                machine.record(outcome, now, &self.config)
            };
            (transition, machine.failure_count(), machine.success_count())
        };

        match transition {
            None => {}
            Some(Transition::Probing) => {
                debug!("first failure while closed, probing window started");
            }
            Some(Transition::Rearmed { failure_rate: None }) => {
                debug!("probing window expired, re-armed");
            }
            Some(Transition::Rearmed {
                failure_rate: Some(rate),
            }) => {
                debug!(
                    failure_rate = rate,
                    threshold = self.config.failure_rate_threshold,
                    "failure rate below threshold, probing window re-armed"
                );
            }
            Some(Transition::Tripped { failure_rate }) => {
                warn!(
                    failures,
                    successes,
                    failure_rate,
                    cooldown = ?self.config.cooldown,
                    "circuit opened"
                );
            }
            Some(Transition::Reopened) => {
                warn!(cooldown = ?self.config.cooldown, "probe failed, circuit re-opened");
            }
            Some(Transition::Recovered) if probe => {
                info!("probe succeeded, circuit closed");
            }
            Some(Transition::Recovered) => {
                info!("probing window elapsed without tripping, circuit closed");
            }
        }
    }
}

/// Records a failure if the call is dropped before its outcome is known.
struct InFlight<'a, C: Clock> {
    inner: &'a BreakerInner<C>,
    probe: bool,
    armed: bool,
}

impl<'a, C: Clock> InFlight<'a, C> {
    fn new(inner: &'a BreakerInner<C>, probe: bool) -> Self {
        Self {
            inner,
            probe,
            armed: true,
        }
    }

    fn finish(mut self, outcome: Outcome) {
        self.armed = false;
        self.inner.record(outcome, self.probe);
    }
}

impl<C: Clock> Drop for InFlight<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.record_cancellation(self.probe);
        }
    }
}

/// A read-only copy of a breaker's bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Current state.
    pub state: State,
    /// Failures counted in the current epoch.
    pub failure_count: u32,
    /// Successes counted in the current epoch.
    pub success_count: u32,
    /// End of the active probing window, set only while half-open.
    pub probe_deadline: Option<Instant>,
    /// End of the cooldown, set only while open.
    pub cooldown_deadline: Option<Instant>,
    /// Whether the single post-cooldown call is still running.
    pub probe_in_flight: bool,
    /// Lifetime tallies.
    pub totals: Totals,
}

impl Snapshot {
    /// Percentage of failures among this epoch's counted outcomes.
    pub fn failure_rate(&self) -> f64 {
        let total = u64::from(self.failure_count) + u64::from(self.success_count);
        if total == 0 {
            return 0.0;
        }

        f64::from(self.failure_count) * 100.0 / total as f64
    }
}

/// A circuit breaker guarding one asynchronous operation.
///
/// Cloning is cheap and every clone shares the same state.
pub struct Breaker<T, E, C = SystemClock>
where
    C: Clock,
{
    inner: Arc<BreakerInner<C>>,
    operation: Arc<Operation<T, E>>,
}

impl<T, E> Breaker<T, E, SystemClock>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Wraps `operation` in a breaker that reads the system clock.
    pub fn new<F, Fut>(operation: F, config: BreakerConfig) -> Result<Self, ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::with_clock(operation, config, SystemClock)
    }

    /// Creates a new builder for customizing a breaker.
    pub fn builder() -> BreakerBuilder<T, E> {
        BreakerBuilder::new()
    }
}

impl<T, E, C> Breaker<T, E, C>
where
    T: Send + 'static,
    E: Send + 'static,
    C: Clock,
{
    /// Wraps `operation` in a breaker that reads deadlines from `clock`.
    pub fn with_clock<F, Fut>(
        operation: F,
        config: BreakerConfig,
        clock: C,
    ) -> Result<Self, ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        config.validate()?;

        let inner = BreakerInner {
            config,
            clock,
            machine: Mutex::new(Machine::new()),
            stats: BreakerStats::new(),
        };
        let operation: Arc<Operation<T, E>> = Arc::new(move || operation().boxed());

        Ok(Self {
            inner: Arc::new(inner),
            operation,
        })
    }

    /// Invokes the wrapped operation through the breaker.
    pub async fn run(&self) -> BreakerResult<T, E> {
        let operation = Arc::clone(&self.operation);
        self.call(move || operation()).await
    }

    /// Invokes a one-off operation through the breaker.
    ///
    /// Admission and bookkeeping are shared with [`run`](Self::run); use this
    /// when each call needs its own arguments.
    pub async fn call<F, Fut>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let probe = match self.inner.admit() {
            Admission::Reject => return Err(BreakerError::Open),
            Admission::Pass => false,
            Admission::Probe => true,
        };

        // The lock is not held while the operation runs.
        let in_flight = InFlight::new(&self.inner, probe);
        let result = f().await;

        match result {
            Ok(value) => {
                in_flight.finish(Outcome::Success);
                Ok(value)
            }
            Err(e) => {
                in_flight.finish(Outcome::Failure);
                Err(BreakerError::Upstream(e))
            }
        }
    }
}

impl<T, E, C> Breaker<T, E, C>
where
    C: Clock,
{
    /// Gets the current state. Deadlines are not evaluated.
    pub fn current_state(&self) -> State {
        self.inner.machine.lock().state()
    }

    /// Copies the current bookkeeping.
    pub fn snapshot(&self) -> Snapshot {
        let machine = self.inner.machine.lock();
        Snapshot {
            state: machine.state(),
            failure_count: machine.failure_count(),
            success_count: machine.success_count(),
            probe_deadline: machine.probe_deadline(),
            cooldown_deadline: machine.cooldown_deadline(),
            probe_in_flight: machine.probe_in_flight(),
            totals: self.inner.stats.totals(),
        }
    }

    /// The configuration the breaker was built with.
    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }
}

impl<T, E, C> Clone for Breaker<T, E, C>
where
    C: Clock,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            operation: Arc::clone(&self.operation),
        }
    }
}

impl<T, E, C> fmt::Debug for Breaker<T, E, C>
where
    C: Clock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("config", &self.inner.config)
            .field("machine", &*self.inner.machine.lock())
            .finish_non_exhaustive()
    }
}
