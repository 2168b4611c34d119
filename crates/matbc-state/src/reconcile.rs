//! Input reconciliation pipeline
//!
//! Local input is applied immediately and then forwarded. Forwarded input is
//! re-run against this peer's state under the originator's stamp, and the
//! originator's resulting field values follow as a delta. Both paths go
//! through the stamp-gated store, so any interleaving converges.
//!
//! Tasks in the `no` network mode stay local: their input is applied on
//! this peer only and the peer's messages for them are dropped.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use matbc_core::{
    InputEvent, InputPayload, MatbcError, MatbcResult, Mutation, MutationOrigin, ParticipantId,
    SessionTime, Stamp, TaskId, Writer,
};
use matbc_time::StampClock;
use matbc_wire::SyncMessage;

use crate::matching::MatchingCoordinator;
use crate::store::{ApplyOutcome, TaskStateStore};
use crate::tasks::{input_changes, is_shared};

/// Counters over the reconciler's lifetime
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub local_inputs: u64,
    pub remote_inputs: u64,
    pub remote_deltas: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub superseded: u64,
    /// Local inputs kept on this peer and peer messages dropped, both for
    /// tasks in local network mode
    pub local_only: u64,
}

/// What happened to a message from the peer
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteOutcome {
    Applied(ApplyOutcome),
    /// Input already seen; nothing applied
    Duplicate,
    /// Input refused by task semantics (late selection, unknown object)
    Rejected(MatbcError),
    /// The task runs in local network mode on this peer
    LocalTask(TaskId),
    /// Not a state message; the session layer handles it
    Passthrough(SyncMessage),
}

/// Input reconciler for one peer
pub struct Reconciler {
    clock: StampClock,
    /// Highest input stamp applied per remote participant
    remote_high: BTreeMap<ParticipantId, Stamp>,
    stats: ReconcileStats,
}

impl Reconciler {
    pub fn new(local: ParticipantId) -> Self {
        Reconciler {
            clock: StampClock::new(local),
            remote_high: BTreeMap::new(),
            stats: ReconcileStats::default(),
        }
    }

    pub fn local(&self) -> ParticipantId {
        self.clock.writer()
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    /// Merge a stamp written by the scenario or observed elsewhere
    pub fn observe(&mut self, stamp: Stamp) {
        self.clock.observe(stamp);
    }

    /// Apply a local input and return the messages to send to the peer.
    ///
    /// Input the task refuses is logged and never forwarded.
    pub fn on_local_input(
        &mut self,
        event: InputEvent,
        now: SessionTime,
        store: &mut TaskStateStore,
        matching: &mut MatchingCoordinator,
    ) -> Vec<SyncMessage> {
        self.stats.local_inputs += 1;
        let stamp = self.clock.issue(now);
        let origin = MutationOrigin::LocalInput(event.origin);

        let outcome = match apply_input(&event, stamp, origin, store, matching) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.rejected += 1;
                debug!(participant = %event.origin, task = %event.target_task, error = %e, "local input rejected");
                return Vec::new();
            }
        };
        self.stats.superseded += outcome.superseded as u64;

        if outcome.is_noop() {
            trace!(task = %event.target_task, "local input changed nothing");
            return Vec::new();
        }

        let task = event.target_task;
        if !is_shared(store.read(task)) {
            self.stats.local_only += 1;
            trace!(task = %task, "local task, input not forwarded");
            return Vec::new();
        }
        vec![
            SyncMessage::InputForward { event, stamp },
            SyncMessage::StateDelta {
                task,
                changes: outcome.applied,
            },
        ]
    }

    /// Apply a message received from the peer participant `from`
    pub fn on_remote_message(
        &mut self,
        from: ParticipantId,
        message: SyncMessage,
        store: &mut TaskStateStore,
        matching: &mut MatchingCoordinator,
    ) -> RemoteOutcome {
        if let Some(task) = message.task().filter(|t| !is_shared(store.read(*t))) {
            self.stats.local_only += 1;
            debug!(from = %from, task = %task, "peer message for a local task dropped");
            return RemoteOutcome::LocalTask(task);
        }

        match message {
            SyncMessage::InputForward { event, stamp } => {
                self.on_remote_input(from, event, stamp, store, matching)
            }
            SyncMessage::StateDelta { task, changes } => {
                self.stats.remote_deltas += 1;
                for change in &changes {
                    self.clock.observe(change.stamp);
                }
                let outcome = store.apply(Mutation::new(task, MutationOrigin::RemoteDelta(from), changes));
                self.stats.superseded += outcome.superseded as u64;
                RemoteOutcome::Applied(outcome)
            }
            other => RemoteOutcome::Passthrough(other),
        }
    }

    fn on_remote_input(
        &mut self,
        from: ParticipantId,
        event: InputEvent,
        stamp: Stamp,
        store: &mut TaskStateStore,
        matching: &mut MatchingCoordinator,
    ) -> RemoteOutcome {
        // Stage 1: Origin check - a peer only forwards its own participant's input
        if event.origin != from || stamp.writer != Writer::Participant(from) {
            self.stats.rejected += 1;
            debug!(from = %from, origin = %event.origin, "forwarded input from the wrong participant");
            return RemoteOutcome::Rejected(MatbcError::TransportError(format!(
                "input of {} forwarded by {}",
                event.origin, from
            )));
        }

        // Stage 2: Duplicate check - stamps of one participant strictly increase
        if let Some(high) = self.remote_high.get(&from) {
            if stamp <= *high {
                self.stats.duplicates += 1;
                trace!(from = %from, "duplicate input dropped");
                return RemoteOutcome::Duplicate;
            }
        }
        self.remote_high.insert(from, stamp);
        self.clock.observe(stamp);
        self.stats.remote_inputs += 1;

        // Stage 3: Apply under the originator's stamp
        match apply_input(&event, stamp, MutationOrigin::RemoteInput(from), store, matching) {
            Ok(outcome) => {
                self.stats.superseded += outcome.superseded as u64;
                RemoteOutcome::Applied(outcome)
            }
            Err(e) => {
                self.stats.rejected += 1;
                debug!(from = %from, error = %e, "remote input rejected");
                RemoteOutcome::Rejected(e)
            }
        }
    }
}

/// Run an input's task semantics and apply the result
fn apply_input(
    event: &InputEvent,
    stamp: Stamp,
    origin: MutationOrigin,
    store: &mut TaskStateStore,
    matching: &mut MatchingCoordinator,
) -> MatbcResult<ApplyOutcome> {
    let state = store.read(event.target_task);
    if !state.accepts_input() {
        debug!(task = %event.target_task, "input ignored, task not running");
        return Ok(ApplyOutcome::default());
    }

    let changes = match &event.payload {
        InputPayload::MatchSelect { object } => matching.select(event.origin, *object, stamp)?,
        InputPayload::MatchCentering { score } => matching.centering(event.origin, *score, stamp),
        payload => input_changes(state, payload, stamp),
    };
    if changes.is_empty() {
        return Ok(ApplyOutcome::default());
    }
    Ok(store.apply(Mutation::new(event.target_task, origin, changes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::apply_scripted;
    use crate::tasks::monitoring_totals;
    use matbc_core::{FieldValue, GaugeRef, ObjectId, TaskId};
    use matbc_scenario::parse_line;
    use proptest::prelude::*;

    const P1: ParticipantId = ParticipantId(1);
    const P2: ParticipantId = ParticipantId(2);

    struct Side {
        store: TaskStateStore,
        matching: MatchingCoordinator,
        reconciler: Reconciler,
    }

    impl Side {
        fn new(local: ParticipantId, script: &[&str]) -> Self {
            let mut side = Side {
                store: TaskStateStore::new(),
                matching: MatchingCoordinator::new([P1, P2]),
                reconciler: Reconciler::new(local),
            };
            for (i, line) in script.iter().enumerate() {
                let command = parse_line(i + 1, i, line).unwrap();
                apply_scripted(&command, &mut side.store, &mut side.matching);
            }
            side
        }

        fn input(&mut self, at_ms: u64, payload: InputPayload) -> Vec<SyncMessage> {
            let local = self.reconciler.local();
            let now = SessionTime::from_millis(at_ms);
            self.reconciler.on_local_input(
                InputEvent::local(local, now, payload),
                now,
                &mut self.store,
                &mut self.matching,
            )
        }

        fn receive(&mut self, from: ParticipantId, messages: Vec<SyncMessage>) -> Vec<RemoteOutcome> {
            messages
                .into_iter()
                .map(|m| {
                    let m = match m {
                        SyncMessage::InputForward { event, stamp } => SyncMessage::InputForward {
                            event: event.into_remote(),
                            stamp,
                        },
                        other => other,
                    };
                    self.reconciler
                        .on_remote_message(from, m, &mut self.store, &mut self.matching)
                })
                .collect()
        }
    }

    const BATTERY: &[&str] = &[
        "0:00:00;sysmon;start",
        "0:00:00;track;start",
        "0:00:00;communications;start",
        "0:00:00;resman;start",
        "0:00:01;sysmon;lights-2-failure;True",
    ];

    #[test]
    fn test_local_input_forwarded_with_delta() {
        let mut a = Side::new(P1, BATTERY);
        let out = a.input(2_000, InputPayload::PumpToggle { pump: 3 });
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], SyncMessage::InputForward { .. }));
        match &out[1] {
            SyncMessage::StateDelta { task, changes } => {
                assert_eq!(*task, TaskId::ResourceManagement);
                assert_eq!(changes[0].value, FieldValue::Int(1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(a.reconciler.stats().local_inputs, 1);
    }

    #[test]
    fn test_input_ignored_while_task_stopped() {
        let mut a = Side::new(P1, &[]);
        assert!(a.input(1_000, InputPayload::PumpToggle { pump: 1 }).is_empty());
    }

    #[test]
    fn test_remote_input_applied_once() {
        let mut a = Side::new(P1, BATTERY);
        let mut b = Side::new(P2, BATTERY);
        let out = a.input(2_000, InputPayload::MonitoringAck { gauge: GaugeRef::Light(2) });

        b.receive(P1, out.clone());
        let replay = b.receive(P1, out);
        assert_eq!(replay[0], RemoteOutcome::Duplicate);
        assert!(matches!(&replay[1], RemoteOutcome::Applied(o) if o.is_noop()));

        let state = b.store.read(TaskId::SystemMonitoring);
        assert_eq!(state.int("performance-hit-1"), 1);
        assert!(!state.bool("lights-2-failure"));
        assert_eq!(state.last_participant(), Some(P1));
        assert_eq!(a.store.values(), b.store.values());
    }

    #[test]
    fn test_local_task_input_stays_on_peer() {
        let mut script = BATTERY.to_vec();
        script.push("0:00:01;resman;network;no");
        let mut a = Side::new(P1, &script);
        let mut b = Side::new(P2, &script);

        assert!(a.input(2_000, InputPayload::PumpToggle { pump: 2 }).is_empty());
        assert_eq!(a.store.read(TaskId::ResourceManagement).int("pump-2-state"), 1);
        assert_eq!(a.reconciler.stats().local_only, 1);

        // A shared task on the same peer is still forwarded
        let shared = a.input(2_100, InputPayload::TrackingMove { dx: 0.1, dy: 0.0 });
        assert_eq!(shared.len(), 2);

        // Messages for the local task from a peer that still shares it
        let mut c = Side::new(P2, BATTERY);
        let out = c.input(2_200, InputPayload::PumpToggle { pump: 4 });
        let outcomes = b.receive(P2, out);
        assert!(outcomes
            .iter()
            .all(|o| *o == RemoteOutcome::LocalTask(TaskId::ResourceManagement)));
        assert_eq!(b.store.read(TaskId::ResourceManagement).int("pump-4-state"), 0);
    }

    #[test]
    fn test_concurrent_acks_both_count() {
        let mut script = BATTERY.to_vec();
        script.extend(["0:00:01;sysmon;scales-1-failure;up", "0:00:01;sysmon;scales-2-failure;down"]);
        let mut a = Side::new(P1, &script);
        let mut b = Side::new(P2, &script);
        let from_a = a.input(2_000, InputPayload::MonitoringAck { gauge: GaugeRef::Scale(1) });
        let from_b = b.input(2_000, InputPayload::MonitoringAck { gauge: GaugeRef::Scale(2) });
        a.receive(P2, from_b);
        b.receive(P1, from_a);

        for side in [&a, &b] {
            assert_eq!(monitoring_totals(side.store.read(TaskId::SystemMonitoring)), (2, 0));
        }
        assert_eq!(a.store.values(), b.store.values());
    }

    #[test]
    fn test_concurrent_toggles_converge() {
        let mut a = Side::new(P1, BATTERY);
        let mut b = Side::new(P2, BATTERY);
        let from_a = a.input(3_000, InputPayload::PumpToggle { pump: 1 });
        let from_b = b.input(3_000, InputPayload::PumpToggle { pump: 1 });
        a.receive(P2, from_b);
        b.receive(P1, from_a);
        assert_eq!(a.store.values(), b.store.values());
    }

    #[test]
    fn test_wrong_origin_rejected() {
        let mut a = Side::new(P1, BATTERY);
        let mut b = Side::new(P2, BATTERY);
        let out = a.input(2_000, InputPayload::TrackingMove { dx: 0.2, dy: 0.0 });
        let outcomes = b.receive(P2, out[..1].to_vec());
        assert!(matches!(outcomes[0], RemoteOutcome::Rejected(_)));
    }

    #[test]
    fn test_heartbeat_passes_through() {
        let mut a = Side::new(P1, BATTERY);
        let beat = SyncMessage::Heartbeat { at: SessionTime::from_secs(1) };
        assert_eq!(a.receive(P2, vec![beat.clone()]), vec![RemoteOutcome::Passthrough(beat)]);
    }

    #[test]
    fn test_matching_round_completes_on_both_peers() {
        let script = &[
            "0:00:00;collaborativematching;start",
            "0:00:01;collaborativematching;targetobjectid;2",
            "0:00:01;collaborativematching;newround",
            "0:00:01;collaborativematching;nextobjecttypeid;2",
            "0:00:01;collaborativematching;addobject",
            "0:00:01;collaborativematching;nextobjecttypeid;7",
            "0:00:01;collaborativematching;addobject",
        ];
        let mut a = Side::new(P1, script);
        let mut b = Side::new(P2, script);

        let from_a = a.input(2_000, InputPayload::MatchSelect { object: ObjectId::new(1) });
        let from_b = b.input(2_100, InputPayload::MatchSelect { object: ObjectId::new(1) });
        b.receive(P1, from_a);
        a.receive(P2, from_b);

        for side in [&a, &b] {
            let state = side.store.read(TaskId::CollaborativeMatching);
            assert_eq!(state.text("round-status"), "completed");
        }
        assert_eq!(a.store.values(), b.store.values());

        // Rejected selections are not forwarded
        assert!(a.input(2_200, InputPayload::MatchSelect { object: ObjectId::new(2) }).is_empty());
        assert_eq!(a.reconciler.stats().rejected, 1);
    }

    fn payload_strategy() -> impl Strategy<Value = InputPayload> {
        prop_oneof![
            (1u8..=8).prop_map(|pump| InputPayload::PumpToggle { pump }),
            (1u8..=2).prop_map(|n| InputPayload::MonitoringAck { gauge: GaugeRef::Light(n) }),
            (-0.5f64..0.5, -0.5f64..0.5).prop_map(|(dx, dy)| InputPayload::TrackingMove { dx, dy }),
            (100.0f64..140.0).prop_map(|frequency| InputPayload::CommunicationTune {
                radio: "com1".into(),
                frequency
            }),
        ]
    }

    proptest! {
        /// Any interleaving of the two streams, with replays, ends in the same state
        #[test]
        fn prop_interleavings_converge(
            inputs in proptest::collection::vec((any::<bool>(), 0u64..50, payload_strategy()), 1..24),
            replay in any::<bool>(),
        ) {
            let mut a = Side::new(P1, BATTERY);
            let mut b = Side::new(P2, BATTERY);
            let mut to_a = Vec::new();
            let mut to_b = Vec::new();
            let mut at = 2_000;

            for (on_a, dt, payload) in inputs {
                at += dt;
                if on_a {
                    to_b.extend(a.input(at, payload));
                } else {
                    to_a.extend(b.input(at, payload));
                }
                // Deliver half the backlog now, the rest later
                let half = to_b.len() / 2;
                let now: Vec<_> = to_b.drain(..half).collect();
                b.receive(P1, now);
            }
            if replay {
                b.receive(P1, to_b.clone());
            }
            b.receive(P1, to_b);
            a.receive(P2, to_a);

            prop_assert_eq!(a.store.values(), b.store.values());
        }
    }
}
