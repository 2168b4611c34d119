//! MATBC Transport Layer - Reliable ordered link between the two peers
//!
//! This crate provides:
//! - Receive-side sequence tracking (duplicate and gap detection)
//! - The sans-IO sync link: hello handshake, acks, resend, heartbeats
//! - A tokio TCP driver with reconnect backoff

pub mod link;
pub mod sequence;
pub mod tcp;

pub use link::*;
pub use sequence::*;
pub use tcp::*;
