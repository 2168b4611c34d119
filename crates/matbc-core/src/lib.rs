//! MATBC Core - Fundamental types shared by every layer
//!
//! This crate defines the vocabulary of a two-peer task-battery session:
//! - Identifiers (ParticipantId, SessionId, ObjectId)
//! - Session time and write stamps
//! - Task fields and their values
//! - Participant input events and store mutations
//! - The error type shared across the workspace

pub mod id;
pub mod time;
pub mod task;
pub mod event;
pub mod error;

pub use id::*;
pub use time::*;
pub use task::*;
pub use event::*;
pub use error::*;
