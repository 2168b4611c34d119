//! Identity types for MATBC sessions
//!
//! Identifiers are fixed-width integers so they travel in the frame header
//! without any length prefix.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Participant identity - one per peer process, one human per participant
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct ParticipantId(pub u64);

impl ParticipantId {
    pub const ZERO: ParticipantId = ParticipantId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        ParticipantId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        ParticipantId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Participant({})", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Session identity - both peers of one session share it
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct SessionId(pub u64);

impl SessionId {
    pub const ZERO: SessionId = SessionId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        SessionId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        SessionId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({:016x})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Scene object instance in the collaborative matching task.
///
/// Instance ids are assigned in `addobject` order, which is identical on both
/// peers because both run the same scenario.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

impl ObjectId {
    #[inline]
    pub fn new(id: u32) -> Self {
        ObjectId(id)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object kind - the criterion the matching task compares
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Serialize)]
pub struct ObjectKind(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_id_roundtrip() {
        let id = ParticipantId::new(0xDEADBEEF_CAFEBABE);
        assert_eq!(ParticipantId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn test_participant_ordering() {
        assert!(ParticipantId::new(1) < ParticipantId::new(2));
    }

    #[test]
    fn test_session_display() {
        assert_eq!(SessionId::new(0xAB).to_string(), "00000000000000ab");
    }
}
