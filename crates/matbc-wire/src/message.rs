//! Sync messages and their payload encoding

use bytes::{BufMut, BytesMut};

use matbc_core::{
    FieldChange, GaugeRef, InputEvent, InputPayload, Locality, MatbcError, MatbcResult,
    ParticipantId, SessionTime, Stamp, TaskId,
};

use crate::codec::{put_key, put_stamp, put_str, put_time, put_value, Reader};
use crate::MessageType;

/// Session lifecycle control
#[derive(Clone, Debug, PartialEq)]
pub enum ControlMessage {
    /// Sent first on every (re)connect. `resume_from` is the highest
    /// contiguous sequence number the sender has received.
    Hello {
        participant: ParticipantId,
        resume_from: u64,
    },
    /// Start the session clock at `seed`
    Start { seed: SessionTime },
    Pause { at: SessionTime },
    Resume { at: SessionTime },
    End,
}

impl ControlMessage {
    fn tag(&self) -> u8 {
        match self {
            ControlMessage::Hello { .. } => 0,
            ControlMessage::Start { .. } => 1,
            ControlMessage::Pause { .. } => 2,
            ControlMessage::Resume { .. } => 3,
            ControlMessage::End => 4,
        }
    }
}

/// Message exchanged between the two peers
#[derive(Clone, Debug, PartialEq)]
pub enum SyncMessage {
    /// Absolute field values of one task after a participant input
    StateDelta {
        task: TaskId,
        changes: Vec<FieldChange>,
    },
    /// A participant input and the stamp its writes were issued under
    InputForward { event: InputEvent, stamp: Stamp },
    Heartbeat { at: SessionTime },
    SessionControl(ControlMessage),
}

impl SyncMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            SyncMessage::StateDelta { .. } => MessageType::StateDelta,
            SyncMessage::InputForward { .. } => MessageType::InputForward,
            SyncMessage::Heartbeat { .. } => MessageType::Heartbeat,
            SyncMessage::SessionControl(_) => MessageType::SessionControl,
        }
    }

    /// Task whose state the message carries
    pub fn task(&self) -> Option<TaskId> {
        match self {
            SyncMessage::StateDelta { task, .. } => Some(*task),
            SyncMessage::InputForward { event, .. } => Some(event.target_task),
            _ => None,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::StateDelta { .. } => "state_delta",
            SyncMessage::InputForward { .. } => "input_forward",
            SyncMessage::Heartbeat { .. } => "heartbeat",
            SyncMessage::SessionControl(ControlMessage::Hello { .. }) => "hello",
            SyncMessage::SessionControl(ControlMessage::Start { .. }) => "start",
            SyncMessage::SessionControl(ControlMessage::Pause { .. }) => "pause",
            SyncMessage::SessionControl(ControlMessage::Resume { .. }) => "resume",
            SyncMessage::SessionControl(ControlMessage::End) => "end",
        }
    }

    /// Hello and heartbeats describe the connection itself and are never
    /// retained for resend.
    pub fn is_link_local(&self) -> bool {
        matches!(
            self,
            SyncMessage::Heartbeat { .. }
                | SyncMessage::SessionControl(ControlMessage::Hello { .. })
        )
    }

    /// Encode the payload (without frame header)
    pub fn encode_payload(&self) -> MatbcResult<BytesMut> {
        let mut buf = BytesMut::with_capacity(64);
        match self {
            SyncMessage::StateDelta { task, changes } => {
                buf.put_u8(task.to_byte());
                let count = u16::try_from(changes.len()).map_err(|_| {
                    MatbcError::InvalidWireFormat(format!("too many changes: {}", changes.len()))
                })?;
                buf.put_u16_le(count);
                for change in changes {
                    put_key(&mut buf, &change.key)?;
                    put_value(&mut buf, &change.value)?;
                    put_stamp(&mut buf, &change.stamp);
                }
            }
            SyncMessage::InputForward { event, stamp } => {
                buf.put_u64_le(event.origin.0);
                put_time(&mut buf, event.timestamp);
                put_stamp(&mut buf, stamp);
                put_input(&mut buf, &event.payload)?;
            }
            SyncMessage::Heartbeat { at } => put_time(&mut buf, *at),
            SyncMessage::SessionControl(control) => {
                buf.put_u8(control.tag());
                match control {
                    ControlMessage::Hello {
                        participant,
                        resume_from,
                    } => {
                        buf.put_u64_le(participant.0);
                        buf.put_u64_le(*resume_from);
                    }
                    ControlMessage::Start { seed } => put_time(&mut buf, *seed),
                    ControlMessage::Pause { at } | ControlMessage::Resume { at } => {
                        put_time(&mut buf, *at)
                    }
                    ControlMessage::End => {}
                }
            }
        }
        Ok(buf)
    }

    /// Decode a payload of the given type. Forwarded inputs decode as
    /// remote events.
    pub fn decode_payload(message_type: MessageType, payload: &[u8]) -> MatbcResult<Self> {
        let mut r = Reader::new(payload);
        let message = match message_type {
            MessageType::StateDelta => {
                let task = r.task()?;
                let count = r.u16()? as usize;
                let mut changes = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = r.key()?;
                    let value = r.value()?;
                    let stamp = r.stamp()?;
                    changes.push(FieldChange { key, value, stamp });
                }
                SyncMessage::StateDelta { task, changes }
            }
            MessageType::InputForward => {
                let origin = r.participant()?;
                let timestamp = r.time()?;
                let stamp = r.stamp()?;
                let payload = read_input(&mut r)?;
                SyncMessage::InputForward {
                    event: InputEvent {
                        origin,
                        locality: Locality::Remote,
                        target_task: payload.task(),
                        timestamp,
                        payload,
                    },
                    stamp,
                }
            }
            MessageType::Heartbeat => SyncMessage::Heartbeat { at: r.time()? },
            MessageType::SessionControl => {
                let control = match r.u8()? {
                    0 => ControlMessage::Hello {
                        participant: r.participant()?,
                        resume_from: r.u64()?,
                    },
                    1 => ControlMessage::Start { seed: r.time()? },
                    2 => ControlMessage::Pause { at: r.time()? },
                    3 => ControlMessage::Resume { at: r.time()? },
                    4 => ControlMessage::End,
                    other => {
                        return Err(MatbcError::InvalidWireFormat(format!(
                            "unknown control tag {}",
                            other
                        )))
                    }
                };
                SyncMessage::SessionControl(control)
            }
        };
        r.finish()?;
        Ok(message)
    }
}

const INPUT_ACK: u8 = 0;
const INPUT_MOVE: u8 = 1;
const INPUT_TUNE: u8 = 2;
const INPUT_PUMP: u8 = 3;
const INPUT_SELECT: u8 = 4;
const INPUT_CENTERING: u8 = 5;

fn put_input(buf: &mut BytesMut, payload: &InputPayload) -> MatbcResult<()> {
    match payload {
        InputPayload::MonitoringAck { gauge } => {
            buf.put_u8(INPUT_ACK);
            match gauge {
                GaugeRef::Light(n) => {
                    buf.put_u8(0);
                    buf.put_u8(*n);
                }
                GaugeRef::Scale(n) => {
                    buf.put_u8(1);
                    buf.put_u8(*n);
                }
            }
        }
        InputPayload::TrackingMove { dx, dy } => {
            buf.put_u8(INPUT_MOVE);
            buf.put_f64_le(*dx);
            buf.put_f64_le(*dy);
        }
        InputPayload::CommunicationTune { radio, frequency } => {
            buf.put_u8(INPUT_TUNE);
            put_str(buf, radio)?;
            buf.put_f64_le(*frequency);
        }
        InputPayload::PumpToggle { pump } => {
            buf.put_u8(INPUT_PUMP);
            buf.put_u8(*pump);
        }
        InputPayload::MatchSelect { object } => {
            buf.put_u8(INPUT_SELECT);
            buf.put_u32_le(object.0);
        }
        InputPayload::MatchCentering { score } => {
            buf.put_u8(INPUT_CENTERING);
            buf.put_f64_le(*score);
        }
    }
    Ok(())
}

fn read_input(r: &mut Reader<'_>) -> MatbcResult<InputPayload> {
    let payload = match r.u8()? {
        INPUT_ACK => {
            let kind = r.u8()?;
            let n = r.u8()?;
            let gauge = match kind {
                0 => GaugeRef::Light(n),
                1 => GaugeRef::Scale(n),
                other => {
                    return Err(MatbcError::InvalidWireFormat(format!(
                        "unknown gauge kind {}",
                        other
                    )))
                }
            };
            InputPayload::MonitoringAck { gauge }
        }
        INPUT_MOVE => InputPayload::TrackingMove {
            dx: r.f64()?,
            dy: r.f64()?,
        },
        INPUT_TUNE => InputPayload::CommunicationTune {
            radio: r.str()?,
            frequency: r.f64()?,
        },
        INPUT_PUMP => InputPayload::PumpToggle { pump: r.u8()? },
        INPUT_SELECT => InputPayload::MatchSelect { object: r.object()? },
        INPUT_CENTERING => InputPayload::MatchCentering { score: r.f64()? },
        other => {
            return Err(MatbcError::InvalidWireFormat(format!(
                "unknown input tag {}",
                other
            )))
        }
    };
    Ok(payload)
}
