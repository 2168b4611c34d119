//! Fixed frame header
//!
//! Fixed header is 40 bytes:
//! - Byte 0: Wire version
//! - Byte 1: Message type
//! - Bytes 2-3: Flags (LE)
//! - Bytes 4-11: Session ID (LE)
//! - Bytes 12-19: Sender participant ID (LE)
//! - Bytes 20-27: Sequence number (LE)
//! - Bytes 28-35: Cumulative ack, highest contiguous seq received (LE)
//! - Bytes 36-39: Payload length (LE)

use matbc_core::{MatbcError, MatbcResult, ParticipantId, SessionId};

use crate::FrameFlags;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 40;

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Message type carried by a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    StateDelta = 0x01,
    InputForward = 0x02,
    Heartbeat = 0x03,
    SessionControl = 0x04,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(MessageType::StateDelta),
            0x02 => Some(MessageType::InputForward),
            0x03 => Some(MessageType::Heartbeat),
            0x04 => Some(MessageType::SessionControl),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Fixed header structure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub message_type: MessageType,
    pub flags: FrameFlags,
    pub session_id: SessionId,
    /// Participant that originated the frame
    pub sender: ParticipantId,
    /// Per-originator sequence number, starting at 1
    pub seq: u64,
    /// Highest contiguous sequence number received from the other side
    pub ack: u64,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn new(message_type: MessageType, session_id: SessionId, sender: ParticipantId) -> Self {
        FrameHeader {
            version: WIRE_VERSION,
            message_type,
            flags: FrameFlags::NONE,
            session_id,
            sender,
            seq: 0,
            ack: 0,
            payload_len: 0,
        }
    }

    /// Parse header from bytes
    pub fn parse(buf: &[u8]) -> MatbcResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(MatbcError::BufferTooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let version = buf[0];
        if version != WIRE_VERSION {
            return Err(MatbcError::InvalidWireFormat(format!(
                "unsupported wire version {}",
                version
            )));
        }

        let message_type =
            MessageType::from_byte(buf[1]).ok_or(MatbcError::UnknownMessageType(buf[1]))?;

        let flags = FrameFlags::new(u16::from_le_bytes([buf[2], buf[3]]));

        Ok(FrameHeader {
            version,
            message_type,
            flags,
            session_id: SessionId::from_bytes(le8(&buf[4..12])),
            sender: ParticipantId::from_bytes(le8(&buf[12..20])),
            seq: u64::from_le_bytes(le8(&buf[20..28])),
            ack: u64::from_le_bytes(le8(&buf[28..36])),
            payload_len: u32::from_le_bytes([buf[36], buf[37], buf[38], buf[39]]),
        })
    }

    /// Serialize header into the first `HEADER_SIZE` bytes of `buf`
    pub fn serialize(&self, buf: &mut [u8]) -> MatbcResult<()> {
        if buf.len() < HEADER_SIZE {
            return Err(MatbcError::BufferTooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        buf[0] = self.version;
        buf[1] = self.message_type.to_byte();
        buf[2..4].copy_from_slice(&self.flags.0.to_le_bytes());
        buf[4..12].copy_from_slice(&self.session_id.to_bytes());
        buf[12..20].copy_from_slice(&self.sender.to_bytes());
        buf[20..28].copy_from_slice(&self.seq.to_le_bytes());
        buf[28..36].copy_from_slice(&self.ack.to_le_bytes());
        buf[36..40].copy_from_slice(&self.payload_len.to_le_bytes());

        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        // Fixed-size buffer, serialize cannot fail
        let _ = self.serialize(&mut buf);
        buf
    }
}

fn le8(slice: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(slice);
    out
}
