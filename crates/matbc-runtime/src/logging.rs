//! Logging setup and the mutation log
//!
//! Diagnostics go through `tracing`. Applied mutations additionally become
//! `MutationRecord`s, one per change notification, handed to a
//! `MutationSink`. The default sink writes them as JSON on the
//! `matbc::mutation` target so they can be filtered out of the rest.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use matbc_core::{FieldChange, MutationOrigin, SessionTime};
use matbc_state::ChangeNotification;

use crate::error::{RuntimeError, RuntimeResult};

/// Tracing target of the mutation log
pub const MUTATION_TARGET: &str = "matbc::mutation";

/// Install the global subscriber. `RUST_LOG` overrides `default_directive`.
pub fn init(json: bool, default_directive: &str) -> RuntimeResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init()
        .map_err(|e| RuntimeError::Config(format!("logging already initialised: {}", e)))
}

/// One applied mutation. Field order is part of the log format.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MutationRecord {
    /// Session time in milliseconds
    pub session_time: u64,
    pub task_id: &'static str,
    pub origin: MutationOrigin,
    pub payload: Vec<FieldChange>,
}

impl MutationRecord {
    pub fn new(now: SessionTime, notification: ChangeNotification) -> Self {
        MutationRecord {
            session_time: now.as_millis(),
            task_id: notification.task.name(),
            origin: notification.origin,
            payload: notification.changes,
        }
    }
}

/// Destination of the mutation log
pub trait MutationSink: Send {
    fn record(&mut self, record: MutationRecord);
}

/// Emits every record as a JSON string at info level
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl MutationSink for TracingSink {
    fn record(&mut self, record: MutationRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => tracing::info!(target: MUTATION_TARGET, record = %line),
            Err(e) => tracing::warn!(error = %e, task = record.task_id, "mutation record not serialisable"),
        }
    }
}

/// Keeps records in memory; clones share the same buffer
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<MutationRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MutationRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl MutationSink for MemorySink {
    fn record(&mut self, record: MutationRecord) {
        self.records.lock().push(record);
    }
}
