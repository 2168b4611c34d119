//! MATBC Test Harness - Two-peer sessions under hostile links
//!
//! This crate provides:
//! - A seeded chaos link for an ordered stream: latency, jitter,
//!   duplication, and partitions
//! - A harness driving two peers over it on simulated time

pub mod chaos;
pub mod harness;

pub use chaos::*;
pub use harness::*;
