//! Payload primitives
//!
//! All integers are little-endian. Strings are a u16 length followed by
//! UTF-8 bytes.

use bytes::{Buf, BufMut};

use matbc_core::{
    FieldKey, FieldValue, MatbcError, MatbcResult, ObjectId, ParticipantId, SessionTime, Stamp,
    TaskId, Writer,
};

pub(crate) fn put_str<B: BufMut>(buf: &mut B, s: &str) -> MatbcResult<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| MatbcError::InvalidWireFormat(format!("string too long: {}", s.len())))?;
    buf.put_u16_le(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub(crate) fn put_time<B: BufMut>(buf: &mut B, t: SessionTime) {
    buf.put_u64_le(t.as_millis());
}

pub(crate) fn put_stamp<B: BufMut>(buf: &mut B, stamp: &Stamp) {
    put_time(buf, stamp.at);
    buf.put_u32_le(stamp.counter);
    match stamp.writer {
        Writer::Scenario => buf.put_u8(0),
        Writer::Participant(p) => {
            buf.put_u8(1);
            buf.put_u64_le(p.0);
        }
    }
}

const VALUE_BOOL: u8 = 0;
const VALUE_INT: u8 = 1;
const VALUE_FLOAT: u8 = 2;
const VALUE_TEXT: u8 = 3;
const VALUE_POINT: u8 = 4;

pub(crate) fn put_value<B: BufMut>(buf: &mut B, value: &FieldValue) -> MatbcResult<()> {
    match value {
        FieldValue::Bool(b) => {
            buf.put_u8(VALUE_BOOL);
            buf.put_u8(u8::from(*b));
        }
        FieldValue::Int(i) => {
            buf.put_u8(VALUE_INT);
            buf.put_i64_le(*i);
        }
        FieldValue::Float(f) => {
            buf.put_u8(VALUE_FLOAT);
            buf.put_f64_le(*f);
        }
        FieldValue::Text(s) => {
            buf.put_u8(VALUE_TEXT);
            put_str(buf, s)?;
        }
        FieldValue::Point { x, y } => {
            buf.put_u8(VALUE_POINT);
            buf.put_f64_le(*x);
            buf.put_f64_le(*y);
        }
    }
    Ok(())
}

pub(crate) fn put_key<B: BufMut>(buf: &mut B, key: &FieldKey) -> MatbcResult<()> {
    put_str(buf, key.as_str())
}

/// Bounds-checked reader over a payload
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    fn need(&self, n: usize) -> MatbcResult<()> {
        if self.buf.remaining() < n {
            return Err(MatbcError::BufferTooShort {
                expected: n,
                actual: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> MatbcResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> MatbcResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self) -> MatbcResult<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self) -> MatbcResult<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn i64(&mut self) -> MatbcResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn f64(&mut self) -> MatbcResult<f64> {
        self.need(8)?;
        Ok(self.buf.get_f64_le())
    }

    pub fn str(&mut self) -> MatbcResult<String> {
        let len = self.u16()? as usize;
        self.need(len)?;
        let s = std::str::from_utf8(&self.buf[..len])
            .map_err(|_| MatbcError::InvalidWireFormat("string is not UTF-8".into()))?
            .to_string();
        self.buf.advance(len);
        Ok(s)
    }

    pub fn time(&mut self) -> MatbcResult<SessionTime> {
        Ok(SessionTime::from_millis(self.u64()?))
    }

    pub fn participant(&mut self) -> MatbcResult<ParticipantId> {
        Ok(ParticipantId::new(self.u64()?))
    }

    pub fn object(&mut self) -> MatbcResult<ObjectId> {
        Ok(ObjectId::new(self.u32()?))
    }

    pub fn task(&mut self) -> MatbcResult<TaskId> {
        let b = self.u8()?;
        TaskId::from_byte(b)
            .ok_or_else(|| MatbcError::InvalidWireFormat(format!("unknown task byte {:#04x}", b)))
    }

    pub fn stamp(&mut self) -> MatbcResult<Stamp> {
        let at = self.time()?;
        let counter = self.u32()?;
        let writer = match self.u8()? {
            0 => Writer::Scenario,
            1 => Writer::Participant(self.participant()?),
            other => {
                return Err(MatbcError::InvalidWireFormat(format!(
                    "unknown writer tag {}",
                    other
                )))
            }
        };
        Ok(Stamp {
            at,
            counter,
            writer,
        })
    }

    pub fn key(&mut self) -> MatbcResult<FieldKey> {
        Ok(FieldKey::from(self.str()?))
    }

    pub fn value(&mut self) -> MatbcResult<FieldValue> {
        match self.u8()? {
            VALUE_BOOL => Ok(FieldValue::Bool(self.u8()? != 0)),
            VALUE_INT => Ok(FieldValue::Int(self.i64()?)),
            VALUE_FLOAT => Ok(FieldValue::Float(self.f64()?)),
            VALUE_TEXT => Ok(FieldValue::Text(self.str()?)),
            VALUE_POINT => Ok(FieldValue::Point {
                x: self.f64()?,
                y: self.f64()?,
            }),
            other => Err(MatbcError::InvalidWireFormat(format!(
                "unknown value tag {}",
                other
            ))),
        }
    }

    /// Fail if bytes are left over
    pub fn finish(self) -> MatbcResult<()> {
        if self.buf.has_remaining() {
            return Err(MatbcError::InvalidWireFormat(format!(
                "{} trailing bytes",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}
