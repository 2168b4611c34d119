//! Time primitives for MATBC sessions
//!
//! Two notions of time are used:
//! - `SessionTime`: milliseconds on the pausable session clock. Scenario due
//!   times and round deadlines are measured against it.
//! - `Stamp`: a hybrid logical stamp attached to every field write, giving a
//!   total order over writes from the scenario and both participants.

use std::ops::{Add, Sub};
use std::time::Duration;

use serde::Serialize;

use crate::ParticipantId;

/// Session time - milliseconds since session start, paused while the
/// session is paused
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct SessionTime(pub u64);

impl SessionTime {
    pub const ZERO: SessionTime = SessionTime(0);
    pub const MAX: SessionTime = SessionTime(u64::MAX);

    #[inline]
    pub fn from_millis(millis: u64) -> Self {
        SessionTime(millis)
    }

    #[inline]
    pub fn from_secs(secs: u64) -> Self {
        SessionTime(secs.saturating_mul(1000))
    }

    #[inline]
    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Whole seconds elapsed, the resolution of scenario due times
    #[inline]
    pub fn whole_secs(self) -> u32 {
        (self.0 / 1000).min(u32::MAX as u64) as u32
    }

    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        SessionTime(self.0.saturating_add(duration.as_millis() as u64))
    }

    #[inline]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        SessionTime(self.0.saturating_sub(duration.as_millis() as u64))
    }

    /// Elapsed duration since an earlier time (zero if `earlier` is later)
    #[inline]
    pub fn since(self, earlier: SessionTime) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for SessionTime {
    type Output = SessionTime;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sub<SessionTime> for SessionTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: SessionTime) -> Self::Output {
        self.since(rhs)
    }
}

impl std::fmt::Debug for SessionTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t({}ms)", self.0)
    }
}

impl std::fmt::Display for SessionTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0 / 1000;
        write!(
            f,
            "{}:{:02}:{:02}.{:03}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            self.0 % 1000
        )
    }
}

/// Who performed a field write.
///
/// Ordering matters: at equal stamp time and counter, a participant write
/// sorts after the scenario so participant input wins same-instant ties.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
pub enum Writer {
    Scenario,
    Participant(ParticipantId),
}

impl Writer {
    pub fn participant(self) -> Option<ParticipantId> {
        match self {
            Writer::Scenario => None,
            Writer::Participant(id) => Some(id),
        }
    }
}

/// Write stamp - (time, counter, writer), compared lexicographically
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
pub struct Stamp {
    pub at: SessionTime,
    pub counter: u32,
    pub writer: Writer,
}

impl Stamp {
    /// The stamp every field starts with; any real write supersedes it
    pub const GENESIS: Stamp = Stamp {
        at: SessionTime::ZERO,
        counter: 0,
        writer: Writer::Scenario,
    };

    /// Stamp for a scripted write. Scripted writes are stamped with their
    /// due time, not the time they were dispatched, so both peers stamp them
    /// identically.
    pub fn scripted(due: SessionTime) -> Self {
        Stamp {
            at: due,
            counter: 0,
            writer: Writer::Scenario,
        }
    }
}

impl Default for Stamp {
    fn default() -> Self {
        Stamp::GENESIS
    }
}
