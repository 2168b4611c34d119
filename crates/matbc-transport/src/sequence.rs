//! Receive-side sequence tracking
//!
//! Sequenced frames must arrive contiguously: the stream is ordered, so a
//! frame ahead of the expected one means frames were lost with a dropped
//! connection and must be resent before delivery continues.

use matbc_core::{MatbcError, MatbcResult};

/// Sequence number reserved for link-local frames (hello, heartbeat)
pub const UNSEQUENCED: u64 = 0;

/// Verdict on a received sequence number
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqVerdict {
    /// Next in order; deliver it
    Fresh,
    /// Already delivered; drop it
    Duplicate,
}

/// Tracks the highest contiguous sequence received from the peer
#[derive(Clone, Debug, Default)]
pub struct SequenceTracker {
    /// Highest sequence delivered with no gap before it
    contiguous: u64,
    duplicates: u64,
    gaps: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a sequence number without recording it
    pub fn check(&self, seq: u64) -> MatbcResult<SeqVerdict> {
        let expected = self.contiguous + 1;
        if seq < expected {
            Ok(SeqVerdict::Duplicate)
        } else if seq == expected {
            Ok(SeqVerdict::Fresh)
        } else {
            Err(MatbcError::DuplicateOrOutOfOrderMessage {
                expected,
                actual: seq,
            })
        }
    }

    /// Record a received sequence number.
    ///
    /// A gap is an error and leaves the tracker unchanged; the frame must be
    /// dropped and everything after `highest()` requested again.
    pub fn accept(&mut self, seq: u64) -> MatbcResult<SeqVerdict> {
        match self.check(seq) {
            Ok(SeqVerdict::Fresh) => {
                self.contiguous = seq;
                Ok(SeqVerdict::Fresh)
            }
            Ok(SeqVerdict::Duplicate) => {
                self.duplicates += 1;
                Ok(SeqVerdict::Duplicate)
            }
            Err(e) => {
                self.gaps += 1;
                Err(e)
            }
        }
    }

    /// Highest contiguous sequence received, the value sent as `ack` and
    /// `resume_from`
    pub fn highest(&self) -> u64 {
        self.contiguous
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn gaps(&self) -> u64 {
        self.gaps
    }
}
