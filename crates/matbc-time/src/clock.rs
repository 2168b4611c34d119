//! Session clock

use std::time::{Duration, Instant};

use matbc_core::SessionTime;

/// Session clock - the logical, pausable clock scenario due times and round
/// deadlines are measured against.
///
/// INVARIANT: the clock never moves backwards and never advances while
/// stopped or paused.
pub struct SessionClock {
    /// Current session time
    value: SessionTime,
    /// Whether the session has started
    started: bool,
    /// Whether the session is paused
    paused: bool,
    /// Last real-time reading used by `tick`
    last_update: Option<Instant>,
}

impl SessionClock {
    /// Create a stopped clock at zero
    pub fn new() -> Self {
        SessionClock {
            value: SessionTime::ZERO,
            started: false,
            paused: false,
            last_update: None,
        }
    }

    /// Start the session at zero
    pub fn start(&mut self) {
        self.start_at(SessionTime::ZERO);
    }

    /// Start the session at a seeded value. Both peers seed the same value.
    pub fn start_at(&mut self, seed: SessionTime) {
        self.value = seed;
        self.started = true;
        self.paused = false;
        self.last_update = Some(Instant::now());
    }

    /// Stop the clock for good (session end)
    pub fn stop(&mut self) {
        self.started = false;
        self.last_update = None;
    }

    pub fn pause(&mut self) {
        self.paused = true;
        self.last_update = None;
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.last_update = Some(Instant::now());
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Started and not paused
    pub fn is_running(&self) -> bool {
        self.started && !self.paused
    }

    /// Advance by an explicit duration (simulation and tests).
    /// Returns the new session time.
    pub fn advance(&mut self, dt: Duration) -> SessionTime {
        if self.is_running() {
            self.value = self.value.saturating_add(dt);
        }
        self.value
    }

    /// Advance by the real time elapsed since the previous tick.
    /// Returns the new session time.
    pub fn tick(&mut self) -> SessionTime {
        if !self.is_running() {
            return self.value;
        }
        let now = Instant::now();
        if let Some(last) = self.last_update {
            self.value = self.value.saturating_add(now.duration_since(last));
        }
        self.last_update = Some(now);
        self.value
    }

    /// Current session time without advancing
    pub fn now(&self) -> SessionTime {
        self.value
    }

    /// Jump forward to a target (recovery). Only moves forward.
    pub fn sync_to(&mut self, target: SessionTime) {
        if target > self.value {
            self.value = target;
        }
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
