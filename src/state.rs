//! Circuit breaker state machine implementation.
//!
//! [`Machine`] holds the state, the counters of the current counting epoch and
//! the two deadlines. It is pure: callers pass in the current instant and get
//! back the transition (if any) that the event caused, so the breaker can hold
//! it behind a single lock and log outside it.

use std::fmt;
use std::time::Instant;

use crate::config::BreakerConfig;

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Traffic flows and the breaker is watching for a first failure.
    Closed,

    /// Tripped. Calls are rejected until the cooldown elapses.
    Open,

    /// A probing window is active and outcomes are being counted.
    HalfOpen,
}

impl State {
    /// Short label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a call completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Failure,
}

/// Decision taken before invoking the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Closed or half-open: the call goes through.
    Pass,
    /// Cooldown elapsed: the call goes through alone, and its outcome decides
    /// between closing and re-opening.
    Probe,
    /// Still cooling down.
    Reject,
}

/// A state change caused by a recorded outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Transition {
    /// A failure while closed opened a probing window.
    Probing,
    /// The window was replaced by a fresh one. Carries the failure rate when
    /// the window was judged healthy, `None` when it had simply expired.
    Rearmed { failure_rate: Option<f64> },
    /// The failure rate reached the threshold.
    Tripped { failure_rate: f64 },
    /// A window ran out without tripping, or a probe succeeded.
    Recovered,
    /// A probe failed and the cooldown started over.
    Reopened,
}

/// The breaker's mutable bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct Machine {
    state: State,
    failure_count: u32,
    success_count: u32,
    probe_deadline: Option<Instant>,
    cooldown_deadline: Option<Instant>,
    probe_in_flight: bool,
}

impl Machine {
    pub(crate) fn new() -> Self {
        Self {
            state: State::Closed,
            failure_count: 0,
            success_count: 0,
            probe_deadline: None,
            cooldown_deadline: None,
            probe_in_flight: false,
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub(crate) fn success_count(&self) -> u32 {
        self.success_count
    }

    pub(crate) fn probe_deadline(&self) -> Option<Instant> {
        self.probe_deadline
    }

    pub(crate) fn cooldown_deadline(&self) -> Option<Instant> {
        self.cooldown_deadline
    }

    pub(crate) fn probe_in_flight(&self) -> bool {
        self.probe_in_flight
    }

    /// Percentage of failures among the outcomes counted in this epoch.
    pub(crate) fn failure_rate(&self) -> f64 {
        let total = u64::from(self.failure_count) + u64::from(self.success_count);
        if total == 0 {
            return 0.0;
        }

        f64::from(self.failure_count) * 100.0 / total as f64
    }

    /// Decides whether a call may invoke the operation.
    ///
    /// While open, only one probe is let through once the cooldown has
    /// elapsed; the state and the cooldown stay put until its outcome arrives.
    pub(crate) fn admit(&mut self, now: Instant) -> Admission {
        match self.state {
            State::Closed | State::HalfOpen => Admission::Pass,
            State::Open if self.probe_in_flight => Admission::Reject,
            State::Open => match self.cooldown_deadline {
                Some(deadline) if now < deadline => Admission::Reject,
                _ => {
                    self.probe_in_flight = true;
                    Admission::Probe
                }
            },
        }
    }

    /// Records the outcome of the call admitted as a probe.
    pub(crate) fn record_probe(
        &mut self,
        outcome: Outcome,
        now: Instant,
        config: &BreakerConfig,
    ) -> Transition {
        self.probe_in_flight = false;
        match outcome {
            Outcome::Success => {
                self.close();
                Transition::Recovered
            }
            Outcome::Failure => {
                self.trip(now, config);
                Transition::Reopened
            }
        }
    }

    /// Records the outcome of an ordinary admitted call.
    pub(crate) fn record(
        &mut self,
        outcome: Outcome,
        now: Instant,
        config: &BreakerConfig,
    ) -> Option<Transition> {
        match outcome {
            Outcome::Success => self.on_success(now),
            Outcome::Failure => self.on_failure(now, config),
        }
    }

    fn on_success(&mut self, now: Instant) -> Option<Transition> {
        if self.state != State::HalfOpen {
            return None;
        }

        self.success_count = self.success_count.saturating_add(1);

        match self.probe_deadline {
            Some(deadline) if now < deadline => None,
            _ => {
                self.close();
                Some(Transition::Recovered)
            }
        }
    }

    fn on_failure(&mut self, now: Instant, config: &BreakerConfig) -> Option<Transition> {
        match self.state {
            State::Closed => {
                self.start_window(now, config);
                Some(Transition::Probing)
            }
            // Late outcome from a call admitted before the trip.
            State::Open => None,
            State::HalfOpen => {
                if self.probe_deadline.map_or(true, |deadline| now > deadline) {
                    self.start_window(now, config);
                    return Some(Transition::Rearmed { failure_rate: None });
                }

                self.failure_count = self.failure_count.saturating_add(1);
                if self.failure_count < config.failure_count_threshold {
                    return None;
                }

                let failure_rate = self.failure_rate();
                if failure_rate >= config.failure_rate_threshold {
                    self.trip(now, config);
                    Some(Transition::Tripped { failure_rate })
                } else {
                    self.start_window(now, config);
                    Some(Transition::Rearmed {
                        failure_rate: Some(failure_rate),
                    })
                }
            }
        }
    }

    fn start_window(&mut self, now: Instant, config: &BreakerConfig) {
        self.state = State::HalfOpen;
        self.failure_count = 1;
        self.success_count = 0;
        self.probe_deadline = Some(now + config.probe_timeout);
        self.cooldown_deadline = None;
    }

    // Counters are kept as evidence of the trip until the next window starts.
    fn trip(&mut self, now: Instant, config: &BreakerConfig) {
        self.state = State::Open;
        self.probe_deadline = None;
        self.cooldown_deadline = Some(now + config.cooldown);
    }

    fn close(&mut self) {
        self.state = State::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.probe_deadline = None;
        self.cooldown_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(count: u32, rate: f64) -> BreakerConfig {
        BreakerConfig {
            probe_timeout: Duration::from_secs(5),
            cooldown: Duration::from_secs(5),
            failure_count_threshold: count,
            failure_rate_threshold: rate,
        }
    }

    #[test]
    fn closed_success_changes_nothing() {
        let cfg = config(10, 50.0);
        let now = Instant::now();
        let mut machine = Machine::new();

        assert_eq!(machine.admit(now), Admission::Pass);
        assert_eq!(machine.record(Outcome::Success, now, &cfg), None);
        assert_eq!(machine.state(), State::Closed);
        assert_eq!(machine.success_count(), 0);
        assert_eq!(machine.failure_count(), 0);
    }

    #[test]
    fn first_failure_opens_probing_window() {
        let cfg = config(10, 50.0);
        let now = Instant::now();
        let mut machine = Machine::new();

        let transition = machine.record(Outcome::Failure, now, &cfg);
        assert_eq!(transition, Some(Transition::Probing));
        assert_eq!(machine.state(), State::HalfOpen);
        assert_eq!(machine.failure_count(), 1);
        assert_eq!(machine.success_count(), 0);
        assert_eq!(machine.probe_deadline(), Some(now + cfg.probe_timeout));
        assert_eq!(machine.cooldown_deadline(), None);
    }

    #[test]
    fn failures_below_count_threshold_accumulate() {
        let cfg = config(3, 50.0);
        let now = Instant::now();
        let mut machine = Machine::new();

        machine.record(Outcome::Failure, now, &cfg);
        assert_eq!(machine.record(Outcome::Failure, now, &cfg), None);
        assert_eq!(machine.failure_count(), 2);
        assert_eq!(machine.state(), State::HalfOpen);
    }

    #[test]
    fn trips_when_rate_reaches_threshold() {
        let cfg = config(2, 50.0);
        let now = Instant::now();
        let mut machine = Machine::new();

        machine.record(Outcome::Failure, now, &cfg);
        machine.record(Outcome::Success, now, &cfg);
        // 2 failures, 1 success: 66.6%
        let transition = machine.record(Outcome::Failure, now, &cfg);

        match transition {
            Some(Transition::Tripped { failure_rate }) => {
                assert!((failure_rate - 200.0 / 3.0).abs() < 1e-9)
            }
            other => panic!("expected trip, got {:?}", other),
        }
        assert_eq!(machine.state(), State::Open);
        assert_eq!(machine.cooldown_deadline(), Some(now + cfg.cooldown));
        assert_eq!(machine.probe_deadline(), None);
        assert_eq!(machine.failure_count(), 2);
        assert_eq!(machine.success_count(), 1);
    }

    #[test]
    fn healthy_rate_rearms_window() {
        let cfg = config(2, 50.0);
        let start = Instant::now();
        let mut machine = Machine::new();

        machine.record(Outcome::Failure, start, &cfg);
        for _ in 0..3 {
            machine.record(Outcome::Success, start, &cfg);
        }
        // 2 failures, 3 successes: 40%
        let later = start + Duration::from_secs(1);
        let transition = machine.record(Outcome::Failure, later, &cfg);

        assert_eq!(
            transition,
            Some(Transition::Rearmed {
                failure_rate: Some(40.0)
            })
        );
        assert_eq!(machine.state(), State::HalfOpen);
        assert_eq!(machine.failure_count(), 1);
        assert_eq!(machine.success_count(), 0);
        assert_eq!(machine.probe_deadline(), Some(later + cfg.probe_timeout));
    }

    #[test]
    fn failure_after_window_expiry_rearms() {
        let cfg = config(2, 50.0);
        let start = Instant::now();
        let mut machine = Machine::new();

        machine.record(Outcome::Failure, start, &cfg);
        let late = start + cfg.probe_timeout + Duration::from_millis(1);
        let transition = machine.record(Outcome::Failure, late, &cfg);

        assert_eq!(transition, Some(Transition::Rearmed { failure_rate: None }));
        assert_eq!(machine.state(), State::HalfOpen);
        assert_eq!(machine.failure_count(), 1);
        assert_eq!(machine.probe_deadline(), Some(late + cfg.probe_timeout));
    }

    #[test]
    fn failure_exactly_at_deadline_still_counts() {
        let cfg = config(2, 50.0);
        let start = Instant::now();
        let mut machine = Machine::new();

        machine.record(Outcome::Failure, start, &cfg);
        let at = start + cfg.probe_timeout;
        let transition = machine.record(Outcome::Failure, at, &cfg);

        assert!(matches!(transition, Some(Transition::Tripped { .. })));
    }

    #[test]
    fn success_after_window_recovers() {
        let cfg = config(10, 50.0);
        let start = Instant::now();
        let mut machine = Machine::new();

        machine.record(Outcome::Failure, start, &cfg);
        assert_eq!(machine.record(Outcome::Success, start, &cfg), None);
        assert_eq!(machine.success_count(), 1);

        let end = start + cfg.probe_timeout;
        assert_eq!(
            machine.record(Outcome::Success, end, &cfg),
            Some(Transition::Recovered)
        );
        assert_eq!(machine.state(), State::Closed);
        assert_eq!(machine.failure_count(), 0);
        assert_eq!(machine.success_count(), 0);
        assert_eq!(machine.probe_deadline(), None);
    }

    fn tripped(cfg: &BreakerConfig, at: Instant) -> Machine {
        let mut machine = Machine::new();
        machine.record(Outcome::Failure, at, cfg);
        while machine.state() != State::Open {
            machine.record(Outcome::Failure, at, cfg);
        }
        machine
    }

    #[test]
    fn open_rejects_until_cooldown_then_admits_one_call() {
        let cfg = config(1, 50.0);
        let start = Instant::now();
        let mut machine = tripped(&cfg, start);
        let cooldown = machine.cooldown_deadline();

        let early = start + Duration::from_secs(1);
        assert_eq!(machine.admit(early), Admission::Reject);
        assert_eq!(machine.state(), State::Open);

        let after = start + cfg.cooldown;
        assert_eq!(machine.admit(after), Admission::Probe);
        assert_eq!(machine.state(), State::Open);
        assert_eq!(machine.cooldown_deadline(), cooldown);
        assert_eq!(machine.probe_deadline(), None);
        assert!(machine.probe_in_flight());

        // Everyone else waits for the probe's outcome.
        assert_eq!(machine.admit(after), Admission::Reject);
        assert_eq!(machine.admit(after + Duration::from_secs(60)), Admission::Reject);
    }

    #[test]
    fn failed_call_after_cooldown_reopens_with_default_thresholds() {
        let cfg = BreakerConfig::default();
        let start = Instant::now();
        let mut machine = tripped(&cfg, start);

        let after = start + cfg.cooldown;
        assert_eq!(machine.admit(after), Admission::Probe);
        let transition = machine.record_probe(Outcome::Failure, after, &cfg);

        assert_eq!(transition, Transition::Reopened);
        assert_eq!(machine.state(), State::Open);
        assert_eq!(machine.cooldown_deadline(), Some(after + cfg.cooldown));
        assert!(!machine.probe_in_flight());
        assert_eq!(machine.admit(after), Admission::Reject);
    }

    #[test]
    fn successful_call_after_cooldown_closes() {
        let cfg = BreakerConfig::default();
        let start = Instant::now();
        let mut machine = tripped(&cfg, start);

        let after = start + cfg.cooldown;
        assert_eq!(machine.admit(after), Admission::Probe);
        let transition = machine.record_probe(Outcome::Success, after, &cfg);

        assert_eq!(transition, Transition::Recovered);
        assert_eq!(machine.state(), State::Closed);
        assert_eq!(machine.failure_count(), 0);
        assert_eq!(machine.success_count(), 0);
        assert_eq!(machine.cooldown_deadline(), None);
        assert_eq!(machine.admit(after), Admission::Pass);
    }

    #[test]
    fn late_outcome_leaves_post_cooldown_call_pending() {
        let cfg = config(1, 50.0);
        let start = Instant::now();
        let mut machine = tripped(&cfg, start);

        let after = start + cfg.cooldown;
        assert_eq!(machine.admit(after), Admission::Probe);
        assert_eq!(machine.record(Outcome::Success, after, &cfg), None);

        assert_eq!(machine.state(), State::Open);
        assert!(machine.probe_in_flight());
        assert_eq!(machine.admit(after), Admission::Reject);
    }

    #[test]
    fn late_outcomes_while_open_are_ignored() {
        let cfg = config(1, 50.0);
        let start = Instant::now();
        let mut machine = Machine::new();

        machine.record(Outcome::Failure, start, &cfg);
        machine.record(Outcome::Failure, start, &cfg);
        let cooldown = machine.cooldown_deadline();

        let later = start + Duration::from_secs(1);
        assert_eq!(machine.record(Outcome::Failure, later, &cfg), None);
        assert_eq!(machine.record(Outcome::Success, later, &cfg), None);
        assert_eq!(machine.state(), State::Open);
        assert_eq!(machine.cooldown_deadline(), cooldown);
        assert_eq!(machine.failure_count(), 2);
    }

    #[test]
    fn failure_rate_of_empty_epoch_is_zero() {
        assert_eq!(Machine::new().failure_rate(), 0.0);
    }
}
