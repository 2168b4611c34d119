//! Hybrid logical stamp clock
//!
//! Participant writes are stamped with `max(session time, latest stamp
//! observed)` plus a counter, so a write made after observing another write
//! always sorts after it, even when the two peers' session clocks disagree
//! by a few milliseconds.

use matbc_core::{ParticipantId, SessionTime, Stamp, Writer};

/// Stamp clock for one participant
#[derive(Clone, Debug)]
pub struct StampClock {
    writer: ParticipantId,
    last_at: SessionTime,
    counter: u32,
}

impl StampClock {
    pub fn new(writer: ParticipantId) -> Self {
        StampClock {
            writer,
            last_at: SessionTime::ZERO,
            counter: 0,
        }
    }

    pub fn writer(&self) -> ParticipantId {
        self.writer
    }

    /// Issue a stamp for a local write at session time `now`.
    /// Stamps issued by one clock are strictly increasing.
    pub fn issue(&mut self, now: SessionTime) -> Stamp {
        if now > self.last_at {
            self.last_at = now;
            self.counter = 0;
        } else {
            self.counter = self.counter.saturating_add(1);
        }
        Stamp {
            at: self.last_at,
            counter: self.counter,
            writer: Writer::Participant(self.writer),
        }
    }

    /// Merge a stamp observed from the other peer (or the scenario)
    pub fn observe(&mut self, stamp: Stamp) {
        if stamp.at > self.last_at {
            self.last_at = stamp.at;
            self.counter = stamp.counter;
        } else if stamp.at == self.last_at && stamp.counter > self.counter {
            self.counter = stamp.counter;
        }
    }

    /// Latest time component seen or issued
    pub fn last(&self) -> SessionTime {
        self.last_at
    }
}
