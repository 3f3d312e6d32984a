//! Signal handling for interactive deployments (SIGINT/SIGTERM)
//!
//! Ctrl-C means different things depending on where the run is:
//! 1. During the start countdown: skip the remaining wait and start now
//! 2. First signal afterwards: abort at the next phase boundary
//!    (the connection is still closed)
//! 3. Second signal: exit immediately with code 130

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for an immediate interrupt
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Signal handler state
#[derive(Debug, Default)]
pub struct SignalState {
    /// A countdown is currently waiting
    countdown_active: AtomicBool,
    /// The countdown was skipped by a signal
    countdown_skipped: AtomicBool,
    /// First post-countdown signal received
    abort_requested: AtomicBool,
    /// Second post-countdown signal received
    immediate_exit: AtomicBool,
    /// Signals received outside a countdown
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a countdown as running so the next signal skips it
    ///
    /// Returns false, leaving no countdown active, when an abort was
    /// already requested.
    pub fn begin_countdown(&self) -> bool {
        self.countdown_skipped.store(false, Ordering::SeqCst);
        self.countdown_active.store(true, Ordering::SeqCst);
        if self.abort_requested.load(Ordering::SeqCst) {
            self.countdown_active.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn end_countdown(&self) {
        self.countdown_active.store(false, Ordering::SeqCst);
    }

    /// Whether the running countdown has been skipped
    pub fn is_countdown_skipped(&self) -> bool {
        self.countdown_skipped.load(Ordering::SeqCst)
    }

    /// Check if an abort at the next phase boundary has been requested
    pub fn is_abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    /// Check if immediate exit has been requested (double signal)
    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Handle a signal (SIGINT/SIGTERM)
    ///
    /// Returns the action to take
    pub fn handle_signal(&self) -> SignalAction {
        if self.countdown_active.swap(false, Ordering::SeqCst) {
            self.countdown_skipped.store(true, Ordering::SeqCst);
            return SignalAction::SkipCountdown;
        }

        match self.signal_count.fetch_add(1, Ordering::SeqCst) {
            0 => {
                self.abort_requested.store(true, Ordering::SeqCst);
                SignalAction::AbortAfterPhase
            }
            1 => {
                self.immediate_exit.store(true, Ordering::SeqCst);
                SignalAction::ImmediateExit
            }
            _ => SignalAction::Ignore,
        }
    }

    /// Reset the signal state (for testing)
    pub fn reset(&self) {
        self.countdown_active.store(false, Ordering::SeqCst);
        self.countdown_skipped.store(false, Ordering::SeqCst);
        self.abort_requested.store(false, Ordering::SeqCst);
        self.immediate_exit.store(false, Ordering::SeqCst);
        self.signal_count.store(0, Ordering::SeqCst);
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Signal during countdown: start now
    SkipCountdown,
    /// First signal: finish the current phase, then stop
    AbortAfterPhase,
    /// Second signal: exit immediately
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Signal handler that manages the signal state
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    pub fn with_state(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    /// Get a reference to the signal state
    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the signal handlers
    ///
    /// Must be called once at program startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::SkipCountdown => {
                eprintln!("\nCountdown skipped, starting now...");
            }
            SignalAction::AbortAfterPhase => {
                eprintln!("\nInterrupt received, stopping after the current phase (again to exit now)...");
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nReceived second interrupt, exiting immediately");
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
