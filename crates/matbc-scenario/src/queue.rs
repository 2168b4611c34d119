//! Command queue
//!
//! Holds the pending scenario commands in dispatch order and pops every
//! command that has come due.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::grammar::ScenarioCommand;

/// Scenario command queue.
///
/// INVARIANT: `pending` is sorted by `(due_time asc, priority desc, index asc)`
/// and a command leaves it exactly once.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<ScenarioCommand>,
    dispatched: usize,
    cancelled: bool,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue content with a freshly loaded scenario
    pub fn load(&mut self, mut commands: Vec<ScenarioCommand>) {
        commands.sort_by_key(|c| c.sort_key());
        debug!(commands = commands.len(), "command queue loaded");
        self.pending = commands.into();
        self.dispatched = 0;
        self.cancelled = false;
    }

    /// Pop every pending command due at or before `now_secs`, in dispatch
    /// order. Skipped seconds are caught up in a single call.
    pub fn advance(&mut self, now_secs: u32) -> Vec<ScenarioCommand> {
        let mut due = Vec::new();
        while self
            .pending
            .front()
            .is_some_and(|c| c.due_time <= now_secs)
        {
            if let Some(cmd) = self.pending.pop_front() {
                due.push(cmd);
            }
        }
        self.dispatched += due.len();
        due
    }

    /// Drop every pending command (session end)
    pub fn cancel(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.cancelled = true;
        if dropped > 0 {
            info!(dropped, "pending scenario commands cancelled");
        }
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn dispatched_len(&self) -> usize {
        self.dispatched
    }

    /// Due time of the next pending command
    pub fn next_due(&self) -> Option<u32> {
        self.pending.front().map(|c| c.due_time)
    }

    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
