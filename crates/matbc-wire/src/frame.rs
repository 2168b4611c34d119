//! Complete frame and stream framing
//!
//! Frame = Fixed Header + Payload. Frames are written back to back on the
//! stream; the header's payload length delimits them.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use matbc_core::{MatbcError, MatbcResult, ParticipantId, SessionId};

use crate::{FrameFlags, FrameHeader, SyncMessage, HEADER_SIZE};

/// Largest payload accepted from the stream
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024;

/// Complete frame
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame carrying `message`
    pub fn from_message(
        session_id: SessionId,
        sender: ParticipantId,
        seq: u64,
        message: &SyncMessage,
    ) -> MatbcResult<Self> {
        let payload = message.encode_payload()?.freeze();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(MatbcError::InvalidWireFormat(format!(
                "payload too large: {} > {}",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        let mut header = FrameHeader::new(message.message_type(), session_id, sender);
        header.seq = seq;
        header.payload_len = payload.len() as u32;
        Ok(Frame { header, payload })
    }

    /// Decode the carried message
    pub fn message(&self) -> MatbcResult<SyncMessage> {
        SyncMessage::decode_payload(self.header.message_type, &self.payload)
    }

    pub fn seq(&self) -> u64 {
        self.header.seq
    }

    /// Copy of this frame with a fresh ack and flags, for (re)transmission
    pub fn restamped(&self, ack: u64, flags: FrameFlags) -> Self {
        let mut frame = self.clone();
        frame.header.ack = ack;
        frame.header.flags = flags;
        frame
    }

    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append the encoded frame to `dst`
    pub fn encode_into(&self, dst: &mut BytesMut) -> MatbcResult<()> {
        let mut header = self.header.clone();
        header.payload_len = self.payload.len() as u32;
        dst.reserve(self.size());
        let start = dst.len();
        dst.put_bytes(0, HEADER_SIZE);
        header.serialize(&mut dst[start..start + HEADER_SIZE])?;
        dst.put_slice(&self.payload);
        Ok(())
    }

    pub fn to_bytes(&self) -> MatbcResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse exactly one frame from `buf`
    pub fn parse(buf: &[u8]) -> MatbcResult<Self> {
        let header = FrameHeader::parse(buf)?;
        let total = HEADER_SIZE + header.payload_len as usize;
        if buf.len() != total {
            return Err(MatbcError::InvalidWireFormat(format!(
                "frame length {} does not match header ({})",
                buf.len(),
                total
            )));
        }
        Ok(Frame {
            payload: Bytes::copy_from_slice(&buf[HEADER_SIZE..]),
            header,
        })
    }
}

/// Incremental decoder splitting a byte stream into frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Buffer to read socket data into directly
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, or `None` if more bytes are needed.
    ///
    /// An error leaves the stream unusable; the connection must be dropped.
    pub fn next_frame(&mut self) -> MatbcResult<Option<Frame>> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let header = FrameHeader::parse(&self.buf[..HEADER_SIZE])?;
        let payload_len = header.payload_len as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(MatbcError::InvalidWireFormat(format!(
                "payload too large: {} > {}",
                payload_len, MAX_PAYLOAD_SIZE
            )));
        }
        if self.buf.len() < HEADER_SIZE + payload_len {
            self.buf.reserve(HEADER_SIZE + payload_len - self.buf.len());
            return Ok(None);
        }
        self.buf.advance(HEADER_SIZE);
        let payload = self.buf.split_to(payload_len).freeze();
        Ok(Some(Frame { header, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ControlMessage, MessageType};
    use matbc_core::SessionTime;
    use proptest::prelude::*;

    fn heartbeat(seq: u64) -> Frame {
        Frame::from_message(
            SessionId::new(0xABCD),
            ParticipantId::new(1),
            seq,
            &SyncMessage::Heartbeat {
                at: SessionTime::from_millis(seq * 250),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = heartbeat(3).restamped(2, FrameFlags(FrameFlags::RESEND));
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes.len(), frame.size());

        let parsed = Frame::parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.header.ack, 2);
        assert!(parsed.header.flags.is_resend());
        assert_eq!(
            parsed.message().unwrap(),
            SyncMessage::Heartbeat {
                at: SessionTime::from_millis(750)
            }
        );
    }

    #[test]
    fn test_parse_rejects_length_mismatch() {
        let mut bytes = heartbeat(1).to_bytes().unwrap().to_vec();
        bytes.push(0);
        assert!(Frame::parse(&bytes).is_err());
    }

    #[test]
    fn test_decoder_handles_partial_frames() {
        let mut stream = BytesMut::new();
        for seq in 1..=3 {
            heartbeat(seq).encode_into(&mut stream).unwrap();
        }
        let end = Frame::from_message(
            SessionId::new(0xABCD),
            ParticipantId::new(1),
            4,
            &SyncMessage::SessionControl(ControlMessage::End),
        )
        .unwrap();
        end.encode_into(&mut stream).unwrap();

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in stream.chunks(7) {
            decoder.extend(chunk);
            while let Some(frame) = decoder.next_frame().unwrap() {
                frames.push(frame);
            }
        }

        let seqs: Vec<u64> = frames.iter().map(Frame::seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(frames[3].header.message_type, MessageType::SessionControl);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_rejects_oversized_payload() {
        let mut header = FrameHeader::new(MessageType::StateDelta, SessionId::ZERO, ParticipantId::ZERO);
        header.payload_len = (MAX_PAYLOAD_SIZE + 1) as u32;
        let mut decoder = FrameDecoder::new();
        decoder.extend(&header.to_bytes());
        assert!(decoder.next_frame().is_err());
    }

    proptest! {
        #[test]
        fn prop_decoder_any_split(split in 0usize..200) {
            let mut stream = BytesMut::new();
            for seq in 1..=4 {
                heartbeat(seq).encode_into(&mut stream).unwrap();
            }
            let split = split.min(stream.len());
            let mut decoder = FrameDecoder::new();
            decoder.extend(&stream[..split]);
            let mut count = 0;
            while decoder.next_frame().unwrap().is_some() {
                count += 1;
            }
            decoder.extend(&stream[split..]);
            while decoder.next_frame().unwrap().is_some() {
                count += 1;
            }
            prop_assert_eq!(count, 4);
        }
    }
}
