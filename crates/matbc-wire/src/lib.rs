//! MATBC Wire Protocol - Binary frame format
//!
//! This crate implements the wire format exchanged between the two peers:
//! - Fixed header (40 bytes) with sequence and cumulative ack
//! - Length-delimited framing over a byte stream
//! - Sync message payload codec

mod codec;
pub mod flags;
pub mod frame;
pub mod header;
pub mod message;

pub use flags::*;
pub use frame::*;
pub use header::*;
pub use message::*;
