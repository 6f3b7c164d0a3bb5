use std::fmt;

use bytes::{Buf, Bytes};

use crate::codec::Header;
use crate::message::DecodeError;

/// Type-specific message decoder.
///
/// Decoders are registered per message type in a
/// [`PolicyMap`](crate::PolicyMap). The header step has a default
/// implementation; most decoders only describe the body layout by reading
/// fields through the [`PayloadReader`]. Fields read before an error are
/// kept on the message.
pub trait Decoder: Send + Sync {
    /// Diagnostic name, shown in policy listings.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Decode the fixed header at the start of the raw message.
    fn decode_header(&self, raw: &[u8]) -> Result<Header, DecodeError> {
        Header::decode(raw)
    }

    /// Decode the message body.
    fn decode_payload(
        &self,
        header: &Header,
        reader: &mut PayloadReader<'_>,
    ) -> Result<(), DecodeError>;
}

/// Generic fallback: keeps the raw body and decodes no fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn decode_payload(
        &self,
        _header: &Header,
        _reader: &mut PayloadReader<'_>,
    ) -> Result<(), DecodeError> {
        Ok(())
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    Str(String),
    Bytes(Bytes),
}

impl Value {
    /// Widen any unsigned integer value.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Value::I32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bytes(b) => {
                for byte in b.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// The decoded body of a message: raw bytes plus named fields in the
/// order the decoder produced them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    body: Bytes,
    fields: Vec<(&'static str, Value)>,
}

impl Payload {
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            fields: Vec::new(),
        }
    }

    /// The raw body bytes (everything after the header).
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn fields(&self) -> &[(&'static str, Value)] {
        &self.fields
    }

    /// First field with the given name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    pub fn push(&mut self, name: &'static str, value: Value) {
        self.fields.push((name, value));
    }

    /// True when there is neither a body nor any decoded field.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty() && self.fields.is_empty()
    }
}

/// Cursor over a message body that records each field it reads.
pub struct PayloadReader<'a> {
    body: Bytes,
    pos: usize,
    payload: &'a mut Payload,
}

impl<'a> PayloadReader<'a> {
    /// Read over the payload's own body.
    pub fn new(payload: &'a mut Payload) -> Self {
        Self {
            body: payload.body.clone(),
            pos: 0,
            payload,
        }
    }

    /// Offset of the cursor within the body.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<Bytes, DecodeError> {
        if self.remaining() < needed {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed,
                available: self.remaining(),
            });
        }
        let chunk = self.body.slice(self.pos..self.pos + needed);
        self.pos += needed;
        Ok(chunk)
    }

    /// Skip padding or ignored bytes.
    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.take(len).map(|_| ())
    }

    pub fn u8(&mut self, name: &'static str) -> Result<u8, DecodeError> {
        let v = self.take(1)?.get_u8();
        self.payload.push(name, Value::U8(v));
        Ok(v)
    }

    pub fn u16(&mut self, name: &'static str) -> Result<u16, DecodeError> {
        let v = self.take(2)?.get_u16_ne();
        self.payload.push(name, Value::U16(v));
        Ok(v)
    }

    pub fn u32(&mut self, name: &'static str) -> Result<u32, DecodeError> {
        let v = self.take(4)?.get_u32_ne();
        self.payload.push(name, Value::U32(v));
        Ok(v)
    }

    pub fn u64(&mut self, name: &'static str) -> Result<u64, DecodeError> {
        let v = self.take(8)?.get_u64_ne();
        self.payload.push(name, Value::U64(v));
        Ok(v)
    }

    pub fn i32(&mut self, name: &'static str) -> Result<i32, DecodeError> {
        let v = self.take(4)?.get_i32_ne();
        self.payload.push(name, Value::I32(v));
        Ok(v)
    }

    /// Read `len` raw bytes.
    pub fn bytes(&mut self, name: &'static str, len: usize) -> Result<Bytes, DecodeError> {
        let v = self.take(len)?;
        self.payload.push(name, Value::Bytes(v.clone()));
        Ok(v)
    }

    /// Read a NUL-padded string occupying exactly `len` bytes.
    pub fn string(&mut self, name: &'static str, len: usize) -> Result<String, DecodeError> {
        let start = self.pos;
        let raw = self.take(len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let s = std::str::from_utf8(&raw[..end])
            .map_err(|err| {
                self.pos = start;
                DecodeError::Invalid(format!("field {name} is not valid UTF-8: {err}"))
            })?
            .to_string();
        self.payload.push(name, Value::Str(s.clone()));
        Ok(s)
    }

    /// Read everything left in the body.
    pub fn rest(&mut self, name: &'static str) -> Result<Bytes, DecodeError> {
        let len = self.remaining();
        self.bytes(name, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn payload_of(build: impl FnOnce(&mut BytesMut)) -> Payload {
        let mut body = BytesMut::new();
        build(&mut body);
        Payload::new(body.freeze())
    }

    #[test]
    fn reader_records_fields_in_order() {
        let mut payload = payload_of(|b| {
            b.put_u8(2);
            b.put_u8(0);
            b.put_u16_ne(1);
            b.put_i32_ne(-5);
            b.put_slice(b"eth0\0\0\0\0");
        });

        let mut reader = PayloadReader::new(&mut payload);
        assert_eq!(reader.u8("family").unwrap(), 2);
        reader.skip(1).unwrap();
        assert_eq!(reader.u16("kind").unwrap(), 1);
        assert_eq!(reader.i32("index").unwrap(), -5);
        assert_eq!(reader.string("name", 8).unwrap(), "eth0");
        assert_eq!(reader.remaining(), 0);

        let names: Vec<&str> = payload.fields().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["family", "kind", "index", "name"]);
        assert_eq!(payload.get("index"), Some(&Value::I32(-5)));
        assert_eq!(payload.get("name").and_then(Value::as_str), Some("eth0"));
        assert_eq!(payload.get("family").and_then(Value::as_u64), Some(2));
    }

    #[test]
    fn truncated_read_keeps_earlier_fields() {
        let mut payload = payload_of(|b| {
            b.put_u32_ne(7);
            b.put_u16_ne(1);
        });

        let mut reader = PayloadReader::new(&mut payload);
        reader.u32("first").unwrap();
        let err = reader.u32("second").unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                offset: 4,
                needed: 4,
                available: 2,
            }
        );
        assert_eq!(payload.fields().len(), 1);
        assert_eq!(payload.get("first"), Some(&Value::U32(7)));
    }

    #[test]
    fn invalid_utf8_string_is_rejected() {
        let mut payload = payload_of(|b| b.put_slice(&[0xff, 0xfe, 0, 0]));
        let mut reader = PayloadReader::new(&mut payload);
        assert!(matches!(
            reader.string("name", 4),
            Err(DecodeError::Invalid(_))
        ));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn raw_decoder_keeps_body_only() {
        let mut payload = payload_of(|b| b.put_slice(b"abcd"));
        let header = Header::default();
        let mut reader = PayloadReader::new(&mut payload);
        RawDecoder.decode_payload(&header, &mut reader).unwrap();

        assert!(payload.fields().is_empty());
        assert_eq!(payload.body().as_ref(), b"abcd");
        assert_eq!(RawDecoder.name(), "raw");
    }

    #[test]
    fn bytes_value_displays_as_hex() {
        assert_eq!(Value::Bytes(Bytes::from_static(&[0xde, 0xad])).to_string(), "dead");
        assert_eq!(Value::U16(80).to_string(), "80");
    }
}
