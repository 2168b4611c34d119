//! MATBC Scenario - Scripted command timeline
//!
//! This crate implements the scenario side of a session:
//! - Strict line grammar `h:mm:ss[-p];body` with an optional priority suffix
//! - Loader with an explicit fail-fast / skip-with-warning policy
//! - Command queue dispatching due commands in (time, priority, file order)

pub mod grammar;
pub mod loader;
pub mod queue;

pub use grammar::*;
pub use loader::*;
pub use queue::*;
