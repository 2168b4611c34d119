//! MATBC Time - Session clock and write stamps
//!
//! This crate implements the two clocks of a peer:
//! - The session clock: pausable, seeded identically on both peers at
//!   session start, advanced independently by each peer
//! - The stamp clock: a hybrid logical clock that orders field writes across
//!   both participants and the scenario

pub mod clock;
pub mod hlc;

pub use clock::*;
pub use hlc::*;
