//! Task state store
//!
//! The single source of truth each peer renders from. Every mutation funnels
//! through [`TaskStateStore::apply`].
//!
//! Each applied mutation is recorded twice: in the journal, which is never
//! trimmed and feeds the mutation log, and in a bounded notification queue
//! for renderers, which drops its oldest entry when nobody keeps up.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{trace, warn};

use matbc_core::{
    FieldChange, FieldKey, FieldValue, Mutation, MutationOrigin, ParticipantId, Stamp, TaskId,
};

use crate::tasks::default_fields;

/// Default bound on undrained renderer notifications
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 1024;

/// Field value together with the stamp of the write that produced it
#[derive(Clone, Debug, PartialEq)]
pub struct FieldCell {
    pub value: FieldValue,
    pub stamp: Stamp,
}

/// Current state of one task
#[derive(Clone, Debug)]
pub struct TaskState {
    task: TaskId,
    fields: BTreeMap<FieldKey, FieldCell>,
    last_participant: Option<ParticipantId>,
    version: u64,
}

impl TaskState {
    fn with_defaults(task: TaskId) -> Self {
        let fields = default_fields(task)
            .into_iter()
            .map(|(key, value)| {
                (
                    key,
                    FieldCell {
                        value,
                        stamp: Stamp::GENESIS,
                    },
                )
            })
            .collect();
        TaskState {
            task,
            fields,
            last_participant: None,
            version: 0,
        }
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(&FieldKey::from(key)).map(|c| &c.value)
    }

    pub fn cell(&self, key: &FieldKey) -> Option<&FieldCell> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &FieldKey) -> bool {
        self.fields.contains_key(key)
    }

    pub fn bool(&self, key: &str) -> bool {
        self.get(key).and_then(FieldValue::as_bool).unwrap_or(false)
    }

    pub fn int(&self, key: &str) -> i64 {
        self.get(key).and_then(FieldValue::as_int).unwrap_or(0)
    }

    pub fn float(&self, key: &str) -> f64 {
        self.get(key).and_then(FieldValue::as_float).unwrap_or(0.0)
    }

    pub fn text(&self, key: &str) -> &str {
        self.get(key).and_then(FieldValue::as_text).unwrap_or("")
    }

    /// Participant whose input was most recently accepted
    pub fn last_participant(&self) -> Option<ParticipantId> {
        self.last_participant
    }

    /// Number of mutations that changed this task
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Running and not paused
    pub fn accepts_input(&self) -> bool {
        self.bool("running") && !self.bool("paused")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &FieldCell)> {
        self.fields.iter()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task: self.task,
            version: self.version,
            last_participant: self.last_participant,
            fields: self
                .fields
                .iter()
                .map(|(k, c)| (k.clone(), c.value.clone()))
                .collect(),
        }
    }

    /// Apply one change if its stamp is not older than the field's.
    /// Returns whether the visible state changed.
    fn write(&mut self, change: &FieldChange) -> bool {
        match self.fields.get_mut(&change.key) {
            Some(cell) => {
                if change.stamp < cell.stamp {
                    return false;
                }
                if change.stamp == cell.stamp && change.value == cell.value {
                    return false;
                }
                cell.value = change.value.clone();
                cell.stamp = change.stamp;
                true
            }
            None => {
                self.fields.insert(
                    change.key.clone(),
                    FieldCell {
                        value: change.value.clone(),
                        stamp: change.stamp,
                    },
                );
                true
            }
        }
    }
}

/// Read-only copy of a task's fields for the renderer
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task: TaskId,
    pub version: u64,
    pub last_participant: Option<ParticipantId>,
    pub fields: BTreeMap<FieldKey, FieldValue>,
}

/// Emitted for every mutation that changed at least one field
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeNotification {
    pub task: TaskId,
    pub origin: MutationOrigin,
    pub version: u64,
    pub changes: Vec<FieldChange>,
}

impl ChangeNotification {
    /// Only local input travels to the peer. Scripted writes happen on both
    /// sides and remote writes came from there.
    pub fn is_broadcast(&self) -> bool {
        matches!(self.origin, MutationOrigin::LocalInput(_))
    }
}

/// Result of one apply
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplyOutcome {
    /// Changes that took effect, in mutation order
    pub applied: Vec<FieldChange>,
    /// Changes rejected because the field held a newer write
    pub superseded: usize,
}

impl ApplyOutcome {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Shared, lock-protected snapshots for readers outside the session loop
#[derive(Clone, Debug, Default)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<BTreeMap<TaskId, TaskSnapshot>>>,
}

impl SnapshotHandle {
    pub fn read(&self, task: TaskId) -> Option<TaskSnapshot> {
        self.inner.read().get(&task).cloned()
    }

    pub fn all(&self) -> Vec<TaskSnapshot> {
        self.inner.read().values().cloned().collect()
    }

    fn publish(&self, snapshot: TaskSnapshot) {
        self.inner.write().insert(snapshot.task, snapshot);
    }
}

/// Task state store
pub struct TaskStateStore {
    tasks: BTreeMap<TaskId, TaskState>,
    /// Every applied mutation since the last drain
    journal: Vec<ChangeNotification>,
    /// Renderer queue; disabled when the capacity is zero
    notifications: VecDeque<ChangeNotification>,
    notification_capacity: usize,
    dropped_notifications: u64,
    snapshots: SnapshotHandle,
}

impl TaskStateStore {
    pub fn new() -> Self {
        Self::with_notification_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }

    /// Store with a renderer queue of `capacity` entries, none if zero
    pub fn with_notification_capacity(capacity: usize) -> Self {
        let mut store = TaskStateStore {
            tasks: BTreeMap::new(),
            journal: Vec::new(),
            notifications: VecDeque::new(),
            notification_capacity: capacity,
            dropped_notifications: 0,
            snapshots: SnapshotHandle::default(),
        };
        store.reset();
        store
    }

    /// Restore every task to its defaults (session boundary)
    pub fn reset(&mut self) {
        self.tasks = TaskId::ALL
            .into_iter()
            .map(|t| (t, TaskState::with_defaults(t)))
            .collect();
        self.journal.clear();
        self.notifications.clear();
        for state in self.tasks.values() {
            self.snapshots.publish(state.snapshot());
        }
    }

    /// Apply a mutation. Changes are applied in the order given; each one
    /// takes effect only if its stamp is at least the field's current stamp.
    pub fn apply(&mut self, mutation: Mutation) -> ApplyOutcome {
        let Mutation {
            task,
            origin,
            changes,
        } = mutation;
        let mut outcome = ApplyOutcome::default();

        let Some(state) = self.tasks.get_mut(&task) else {
            return outcome;
        };

        for change in changes {
            if state.write(&change) {
                outcome.applied.push(change);
            } else {
                outcome.superseded += 1;
            }
        }

        if outcome.is_noop() {
            trace!(task = %task, origin = origin.label(), "mutation had no effect");
            return outcome;
        }

        state.version += 1;
        if let Some(participant) = origin.participant() {
            state.last_participant = Some(participant);
        }
        self.snapshots.publish(state.snapshot());

        let notification = ChangeNotification {
            task,
            origin,
            version: state.version,
            changes: outcome.applied.clone(),
        };
        if self.notification_capacity > 0 {
            if self.notifications.len() == self.notification_capacity {
                self.notifications.pop_front();
                self.dropped_notifications += 1;
                if self.dropped_notifications == 1 {
                    warn!(task = %task, "renderer notification queue full, dropping oldest");
                }
            }
            self.notifications.push_back(notification.clone());
        }
        self.journal.push(notification);

        outcome
    }

    /// Current state of a task
    pub fn read(&self, task: TaskId) -> &TaskState {
        // Every task is created in reset() and never removed
        &self.tasks[&task]
    }

    pub fn snapshot(&self, task: TaskId) -> TaskSnapshot {
        self.read(task).snapshot()
    }

    /// Handle for readers on other threads
    pub fn snapshots(&self) -> SnapshotHandle {
        self.snapshots.clone()
    }

    /// Every mutation applied since the last call, none dropped
    pub fn drain_journal(&mut self) -> Vec<ChangeNotification> {
        std::mem::take(&mut self.journal)
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Renderer notifications, possibly missing the oldest ones
    pub fn drain_notifications(&mut self) -> Vec<ChangeNotification> {
        self.notifications.drain(..).collect()
    }

    pub fn pending_notifications(&self) -> usize {
        self.notifications.len()
    }

    pub fn dropped_notifications(&self) -> u64 {
        self.dropped_notifications
    }

    /// Field values of every task, for convergence checks
    pub fn values(&self) -> BTreeMap<TaskId, BTreeMap<FieldKey, FieldValue>> {
        self.tasks
            .iter()
            .map(|(t, s)| (*t, s.snapshot().fields))
            .collect()
    }
}

impl Default for TaskStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matbc_core::{SessionTime, Writer};

    fn stamp(ms: u64, p: u64) -> Stamp {
        Stamp {
            at: SessionTime::from_millis(ms),
            counter: 0,
            writer: Writer::Participant(ParticipantId::new(p)),
        }
    }

    fn set(task: TaskId, origin: MutationOrigin, key: &str, value: FieldValue, s: Stamp) -> Mutation {
        Mutation::new(task, origin, vec![FieldChange::new(key, value, s)])
    }

    #[test]
    fn test_defaults_present() {
        let store = TaskStateStore::new();
        let sysmon = store.read(TaskId::SystemMonitoring);
        assert_eq!(sysmon.text("scales-1-failure"), "no");
        assert!(sysmon.bool("lights-1-on"));
        assert!(!sysmon.bool("lights-2-on"));
        assert_eq!(store.read(TaskId::ResourceManagement).int("pump-8-state"), 0);
    }

    #[test]
    fn test_apply_tags_last_participant() {
        let mut store = TaskStateStore::new();
        let p = ParticipantId::new(2);
        let outcome = store.apply(set(
            TaskId::Tracking,
            MutationOrigin::RemoteInput(p),
            "cursor",
            FieldValue::Point { x: 0.1, y: 0.2 },
            stamp(100, 2),
        ));
        assert_eq!(outcome.applied.len(), 1);
        let track = store.read(TaskId::Tracking);
        assert_eq!(track.last_participant(), Some(p));
        assert_eq!(track.version(), 1);
    }

    #[test]
    fn test_older_stamp_is_superseded() {
        let mut store = TaskStateStore::new();
        let origin = MutationOrigin::LocalInput(ParticipantId::new(1));
        store.apply(set(TaskId::Tracking, origin, "targetradius", FieldValue::Float(0.3), stamp(200, 1)));
        let outcome = store.apply(set(
            TaskId::Tracking,
            origin,
            "targetradius",
            FieldValue::Float(0.5),
            stamp(150, 1),
        ));
        assert!(outcome.is_noop());
        assert_eq!(outcome.superseded, 1);
        assert_eq!(store.read(TaskId::Tracking).float("targetradius"), 0.3);
    }

    #[test]
    fn test_equal_stamp_later_write_applies() {
        let mut store = TaskStateStore::new();
        let scripted = Stamp::scripted(SessionTime::from_secs(5));
        store.apply(set(TaskId::Tracking, MutationOrigin::Scenario, "title", FieldValue::text("y"), scripted));
        store.apply(set(TaskId::Tracking, MutationOrigin::Scenario, "title", FieldValue::text("x"), scripted));
        assert_eq!(store.read(TaskId::Tracking).text("title"), "x");
    }

    #[test]
    fn test_replayed_mutation_is_noop() {
        let mut store = TaskStateStore::new();
        let m = set(
            TaskId::ResourceManagement,
            MutationOrigin::RemoteDelta(ParticipantId::new(2)),
            "pump-1-state",
            FieldValue::Int(1),
            stamp(300, 2),
        );
        assert!(!store.apply(m.clone()).is_noop());
        store.drain_notifications();

        assert!(store.apply(m).is_noop());
        assert_eq!(store.pending_notifications(), 0);
        assert_eq!(store.read(TaskId::ResourceManagement).version(), 1);
    }

    #[test]
    fn test_notifications_and_broadcast_flag() {
        let mut store = TaskStateStore::new();
        let p1 = ParticipantId::new(1);
        let p2 = ParticipantId::new(2);
        store.apply(set(TaskId::Tracking, MutationOrigin::LocalInput(p1), "cursor", FieldValue::Point { x: 0.0, y: 0.1 }, stamp(10, 1)));
        store.apply(set(TaskId::Tracking, MutationOrigin::RemoteDelta(p2), "cursor", FieldValue::Point { x: 0.0, y: 0.2 }, stamp(20, 2)));
        store.apply(set(TaskId::Tracking, MutationOrigin::Scenario, "targetradius", FieldValue::Float(0.2), Stamp::scripted(SessionTime::from_secs(1))));

        let flags: Vec<bool> = store
            .drain_notifications()
            .iter()
            .map(ChangeNotification::is_broadcast)
            .collect();
        assert_eq!(flags, vec![true, false, false]);
    }

    #[test]
    fn test_notification_queue_bounded() {
        let mut store = TaskStateStore::with_notification_capacity(2);
        for i in 1..=4u64 {
            store.apply(set(
                TaskId::Tracking,
                MutationOrigin::Scenario,
                "targetradius",
                FieldValue::Float(i as f64 / 10.0),
                Stamp::scripted(SessionTime::from_secs(i)),
            ));
        }
        assert_eq!(store.pending_notifications(), 2);
        assert_eq!(store.dropped_notifications(), 2);
        let versions: Vec<u64> = store.drain_notifications().iter().map(|n| n.version).collect();
        assert_eq!(versions, vec![3, 4]);
    }

    #[test]
    fn test_journal_survives_renderer_overflow() {
        let mut store = TaskStateStore::with_notification_capacity(2);
        for i in 1..=5u64 {
            store.apply(set(
                TaskId::Tracking,
                MutationOrigin::Scenario,
                "targetradius",
                FieldValue::Float(i as f64 / 10.0),
                Stamp::scripted(SessionTime::from_secs(i)),
            ));
        }
        assert_eq!(store.dropped_notifications(), 3);
        let versions: Vec<u64> = store.drain_journal().iter().map(|n| n.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.journal_len(), 0);
        assert_eq!(store.pending_notifications(), 2);
    }

    #[test]
    fn test_zero_capacity_disables_renderer_queue() {
        let mut store = TaskStateStore::with_notification_capacity(0);
        store.apply(set(
            TaskId::Tracking,
            MutationOrigin::Scenario,
            "targetradius",
            FieldValue::Float(0.4),
            Stamp::scripted(SessionTime::from_secs(1)),
        ));
        assert_eq!(store.pending_notifications(), 0);
        assert_eq!(store.dropped_notifications(), 0);
        assert_eq!(store.journal_len(), 1);
    }

    #[test]
    fn test_snapshot_handle_sees_latest() {
        let mut store = TaskStateStore::new();
        let handle = store.snapshots();
        store.apply(set(
            TaskId::Communications,
            MutationOrigin::LocalInput(ParticipantId::new(1)),
            "radio-com1-frequency",
            FieldValue::Float(121.5),
            stamp(50, 1),
        ));
        let snap = handle.read(TaskId::Communications).unwrap();
        assert_eq!(
            snap.fields.get(&FieldKey::from("radio-com1-frequency")),
            Some(&FieldValue::Float(121.5))
        );
        assert_eq!(snap, store.snapshot(TaskId::Communications));
    }
}
