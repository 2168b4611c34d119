//! MATBC State Engine - Task state and input reconciliation
//!
//! This crate implements the shared state of a session:
//! - Task state store with stamp-gated field writes
//! - Task semantics for scripted commands and participant inputs
//! - Reconciler merging local and remote input
//! - Collaborative matching coordinator

pub mod dispatch;
pub mod matching;
pub mod reconcile;
pub mod store;
pub mod tasks;

pub use dispatch::*;
pub use matching::*;
pub use reconcile::*;
pub use store::*;
pub use tasks::*;
