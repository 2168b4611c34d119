//! Input events and store mutations
//!
//! An `InputEvent` is what a participant did. A `Mutation` is what the task
//! state store applies: a batch of stamped field changes plus where it came
//! from.

use serde::{Deserialize, Serialize};

use crate::{FieldKey, FieldValue, ObjectId, ParticipantId, SessionTime, Stamp, TaskId};

/// Whether an input was captured on this peer or received from the other
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Locality {
    Local,
    Remote,
}

/// Gauge of the system monitoring task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GaugeRef {
    Light(u8),
    Scale(u8),
}

impl GaugeRef {
    /// Field prefix of the gauge (`lights-1`, `scales-3`)
    pub fn prefix(self) -> String {
        match self {
            GaugeRef::Light(n) => format!("lights-{}", n),
            GaugeRef::Scale(n) => format!("scales-{}", n),
        }
    }
}

/// What the participant did
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputPayload {
    /// Acknowledge a monitoring gauge (hit if failing, false alarm otherwise)
    MonitoringAck { gauge: GaugeRef },
    /// Joystick displacement of the tracking cursor
    TrackingMove { dx: f64, dy: f64 },
    /// Tune a communication radio
    CommunicationTune { radio: String, frequency: f64 },
    /// Toggle a resource management pump
    PumpToggle { pump: u8 },
    /// Select an object in the shared matching scene
    MatchSelect { object: ObjectId },
    /// Continuous viewport centering score for the matching task
    MatchCentering { score: f64 },
}

impl InputPayload {
    /// Task the payload applies to
    pub fn task(&self) -> TaskId {
        match self {
            InputPayload::MonitoringAck { .. } => TaskId::SystemMonitoring,
            InputPayload::TrackingMove { .. } => TaskId::Tracking,
            InputPayload::CommunicationTune { .. } => TaskId::Communications,
            InputPayload::PumpToggle { .. } => TaskId::ResourceManagement,
            InputPayload::MatchSelect { .. } | InputPayload::MatchCentering { .. } => {
                TaskId::CollaborativeMatching
            }
        }
    }
}

/// Participant input event
#[derive(Clone, Debug, PartialEq)]
pub struct InputEvent {
    /// Participant who produced the input
    pub origin: ParticipantId,
    /// Captured here or forwarded by the peer
    pub locality: Locality,
    /// Task the input targets
    pub target_task: TaskId,
    /// Session time at which the input was captured, on the origin's clock
    pub timestamp: SessionTime,
    pub payload: InputPayload,
}

impl InputEvent {
    /// Create a locally captured input event
    pub fn local(origin: ParticipantId, timestamp: SessionTime, payload: InputPayload) -> Self {
        InputEvent {
            origin,
            locality: Locality::Local,
            target_task: payload.task(),
            timestamp,
            payload,
        }
    }

    /// The same event as seen by the other peer
    pub fn into_remote(mut self) -> Self {
        self.locality = Locality::Remote;
        self
    }

    pub fn is_local(&self) -> bool {
        self.locality == Locality::Local
    }
}

/// One stamped field write
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldChange {
    pub key: FieldKey,
    pub value: FieldValue,
    pub stamp: Stamp,
}

impl FieldChange {
    pub fn new(key: impl Into<FieldKey>, value: FieldValue, stamp: Stamp) -> Self {
        FieldChange {
            key: key.into(),
            value,
            stamp,
        }
    }
}

/// Where a mutation came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "source", content = "participant", rename_all = "snake_case")]
pub enum MutationOrigin {
    /// Dispatched scenario command
    Scenario,
    /// Input from the participant at this peer
    LocalInput(ParticipantId),
    /// Forwarded input from the other participant
    RemoteInput(ParticipantId),
    /// Authoritative values computed by the other peer
    RemoteDelta(ParticipantId),
}

impl MutationOrigin {
    /// Mutations from the remote peer must never be sent back to it
    pub fn is_remote(self) -> bool {
        matches!(
            self,
            MutationOrigin::RemoteInput(_) | MutationOrigin::RemoteDelta(_)
        )
    }

    /// Participant to record as the task's last accepted writer
    pub fn participant(self) -> Option<ParticipantId> {
        match self {
            MutationOrigin::Scenario => None,
            MutationOrigin::LocalInput(p)
            | MutationOrigin::RemoteInput(p)
            | MutationOrigin::RemoteDelta(p) => Some(p),
        }
    }

    /// Stable label used by the mutation log
    pub fn label(self) -> &'static str {
        match self {
            MutationOrigin::Scenario => "scenario",
            MutationOrigin::LocalInput(_) => "local_input",
            MutationOrigin::RemoteInput(_) => "remote_input",
            MutationOrigin::RemoteDelta(_) => "remote_delta",
        }
    }
}

/// Batch of field changes for one task
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub task: TaskId,
    pub origin: MutationOrigin,
    pub changes: Vec<FieldChange>,
}

impl Mutation {
    pub fn new(task: TaskId, origin: MutationOrigin, changes: Vec<FieldChange>) -> Self {
        Mutation {
            task,
            origin,
            changes,
        }
    }
}
