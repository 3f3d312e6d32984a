//! Admission check and countdown before a deployment starts
//!
//! The requested start is resolved only once admission has passed, so a
//! slow license check never eats into the countdown.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;

use super::{DelaySpec, ScheduleError, ScheduledStart};
use crate::admission::{AdmissionCheck, AdmissionError, LicenseInfo};
use crate::signal::SignalState;

/// Default countdown tick
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Longest single sleep while counting, bounds signal latency
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No delay requested
    Immediate,
    AwaitingAdmission,
    Counting,
    /// Interrupted before the deployment could start
    Cancelled,
    /// Deployment may start
    Released,
    /// Admission denied or the start could not be resolved
    Failed,
}

/// One countdown update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownTick {
    pub remaining: Duration,
    pub total: Duration,
    /// 0-100
    pub percent: u8,
}

impl CountdownTick {
    fn new(remaining: Duration, total: Duration) -> Self {
        let percent = if total.is_zero() {
            100
        } else {
            let done = total.saturating_sub(remaining).as_millis();
            (done * 100 / total.as_millis()).min(100) as u8
        };
        Self {
            remaining,
            total,
            percent,
        }
    }
}

/// Result of passing through the gate
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Released {
        license: LicenseInfo,
        /// Start resolved after admission
        start: ScheduledStart,
        /// The countdown was cut short by an interrupt
        skipped: bool,
    },
    Cancelled,
}

/// Gate errors
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

enum Countdown {
    Finished,
    Skipped,
    Aborted,
}

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Admission check followed by an optional countdown
pub struct SchedulingGate<'a> {
    delay: DelaySpec,
    admission: &'a dyn AdmissionCheck,
    signals: Arc<SignalState>,
    clock: fn() -> NaiveDateTime,
    tick_interval: Duration,
    state: GateState,
    transitions: Vec<GateState>,
}

impl<'a> SchedulingGate<'a> {
    pub fn new(delay: DelaySpec, admission: &'a dyn AdmissionCheck, signals: Arc<SignalState>) -> Self {
        Self {
            delay,
            admission,
            signals,
            clock: local_now,
            tick_interval: DEFAULT_TICK_INTERVAL,
            state: GateState::AwaitingAdmission,
            transitions: vec![GateState::AwaitingAdmission],
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Local wall clock used to resolve the start
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn transitions(&self) -> &[GateState] {
        &self.transitions
    }

    fn enter(&mut self, state: GateState) {
        tracing::debug!(from = ?self.state, to = ?state, "gate transition");
        self.state = state;
        self.transitions.push(state);
    }

    /// Validate admission, resolve the start, then wait out the delay
    ///
    /// `on_tick` receives one update per tick plus a final one at zero
    /// when the countdown runs to completion.
    pub fn run(
        &mut self,
        force_refresh: bool,
        on_tick: &mut dyn FnMut(&CountdownTick),
    ) -> Result<GateOutcome, GateError> {
        let license = match self.admission.validate(force_refresh) {
            Ok(info) => info,
            Err(e) => {
                self.enter(GateState::Failed);
                return Err(e.into());
            }
        };

        let start = match self.delay.resolve((self.clock)()) {
            Ok(start) => start,
            Err(e) => {
                self.enter(GateState::Failed);
                return Err(e.into());
            }
        };

        if start.delay.is_zero() {
            if self.signals.is_abort_requested() {
                self.enter(GateState::Cancelled);
                return Ok(GateOutcome::Cancelled);
            }
            self.enter(GateState::Immediate);
            self.enter(GateState::Released);
            return Ok(GateOutcome::Released {
                license,
                start,
                skipped: false,
            });
        }

        if !self.signals.begin_countdown() {
            self.enter(GateState::Cancelled);
            return Ok(GateOutcome::Cancelled);
        }
        self.enter(GateState::Counting);
        tracing::info!(
            target_time = %start.target.format("%Y-%m-%d %H:%M:%S"),
            delay_secs = start.delay.as_secs(),
            "waiting for scheduled start"
        );

        let countdown = self.count_down(start.delay, on_tick);
        self.signals.end_countdown();
        match countdown {
            Countdown::Aborted => {
                self.enter(GateState::Cancelled);
                Ok(GateOutcome::Cancelled)
            }
            Countdown::Finished | Countdown::Skipped => {
                let skipped = matches!(countdown, Countdown::Skipped);
                if skipped {
                    tracing::info!("countdown skipped, starting now");
                }
                self.enter(GateState::Released);
                Ok(GateOutcome::Released { license, start, skipped })
            }
        }
    }

    fn count_down(&self, total: Duration, on_tick: &mut dyn FnMut(&CountdownTick)) -> Countdown {
        let started = Instant::now();
        let mut last_remaining = total;
        let mut next_tick = Duration::ZERO;

        loop {
            let elapsed = started.elapsed();
            let remaining = total.saturating_sub(elapsed).min(last_remaining);
            last_remaining = remaining;

            if self.signals.is_abort_requested() {
                return Countdown::Aborted;
            }
            if remaining.is_zero() {
                on_tick(&CountdownTick::new(Duration::ZERO, total));
                return Countdown::Finished;
            }
            if self.signals.is_countdown_skipped() {
                return Countdown::Skipped;
            }
            if elapsed >= next_tick {
                on_tick(&CountdownTick::new(remaining, total));
                next_tick += self.tick_interval;
            }

            let until_tick = next_tick.saturating_sub(elapsed);
            let nap = POLL_SLICE.min(remaining).min(until_tick.max(Duration::from_millis(1)));
            thread::sleep(nap);
        }
    }
}
