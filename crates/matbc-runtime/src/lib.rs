//! MATBC Runtime - Peer orchestration and main loop
//!
//! This crate implements the per-peer session loop:
//! 1. Advance the session clock
//! 2. Ingest messages from the link
//! 3. Reconcile remote input and handle session control; input stamped
//!    ahead of local scripted time waits for it
//! 4. Apply local input and forward it
//! 5. Dispatch due scenario commands
//! 6. Expire matching rounds the peer has also seen pass
//! 7. Run link timers
//! 8. Emit the mutation log
//!
//! The loop itself is sans-IO (`Peer`); `session` drives it over TCP.

pub mod config;
pub mod error;
pub mod logging;
pub mod peer;
pub mod session;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use peer::*;
pub use session::*;
