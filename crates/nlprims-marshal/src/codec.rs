use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MarshalError, Result};
use crate::message::DecodeError;

/// Fixed header: length (4) + type (2) + flags (2) + sequence (4) + pid (4).
pub const HEADER_LEN: usize = 16;

/// Bytes needed to peek the length and type of a message.
pub(crate) const PEEK_LEN: usize = 6;

/// The fixed prefix of every netlink message.
///
/// All fields are in host byte order, matching the kernel convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Total message length, header included.
    pub length: u32,
    pub msg_type: u16,
    pub flags: u16,
    pub sequence: u32,
    /// Sender identity (0 for the kernel).
    pub pid: u32,
}

impl Header {
    /// Decode the header at the start of `raw`.
    ///
    /// Wire format:
    /// ```text
    /// ┌─────────────┬───────────┬───────────┬──────────────┬─────────────┐
    /// │ Length (4B) │ Type (2B) │ Flags (2B)│ Sequence (4B)│ PID (4B)    │
    /// └─────────────┴───────────┴───────────┴──────────────┴─────────────┘
    /// ```
    pub fn decode(raw: &[u8]) -> std::result::Result<Self, DecodeError> {
        if raw.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                offset: 0,
                needed: HEADER_LEN,
                available: raw.len(),
            });
        }

        let mut buf = &raw[..HEADER_LEN];
        let header = Header {
            length: buf.get_u32_ne(),
            msg_type: buf.get_u16_ne(),
            flags: buf.get_u16_ne(),
            sequence: buf.get_u32_ne(),
            pid: buf.get_u32_ne(),
        };

        if (header.length as usize) < HEADER_LEN {
            return Err(DecodeError::LengthTooShort(header.length));
        }
        Ok(header)
    }

    /// Append the encoded header to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_LEN);
        dst.put_u32_ne(self.length);
        dst.put_u16_ne(self.msg_type);
        dst.put_u16_ne(self.flags);
        dst.put_u32_ne(self.sequence);
        dst.put_u32_ne(self.pid);
    }

    /// Length of the body following the header.
    pub fn body_len(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_LEN)
    }

    /// True when every bit of `flag` is set.
    pub fn has_flags(&self, flag: u16) -> bool {
        self.flags & flag == flag
    }
}

/// Read the declared length and type at the start of `raw` without
/// validating anything else. Returns `None` when fewer than 6 bytes remain.
pub(crate) fn peek(raw: &[u8]) -> Option<(u32, u16)> {
    if raw.len() < PEEK_LEN {
        return None;
    }
    let mut buf = &raw[..PEEK_LEN];
    Some((buf.get_u32_ne(), buf.get_u16_ne()))
}

/// An outgoing message; the header length and sender pid are filled in
/// when it is encoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    pub msg_type: u16,
    pub flags: u16,
    /// Sequence number; an endpoint assigns the next one when this is 0.
    pub sequence: u32,
    pub body: Bytes,
}

impl Request {
    /// Create a request with no sequence number assigned.
    pub fn new(msg_type: u16, flags: u16, body: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            flags,
            sequence: 0,
            body: body.into(),
        }
    }

    /// Set an explicit sequence number.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// The total wire size of this request (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_LEN + self.body.len()
    }
}

/// Encode a request into the wire format with `pid` as the sender.
pub fn encode_request(request: &Request, pid: u32, max: usize, dst: &mut BytesMut) -> Result<()> {
    let size = request.wire_size();
    let limit = max.min(u32::MAX as usize);
    if size > limit {
        return Err(MarshalError::MessageTooLarge { size, max: limit });
    }

    let header = Header {
        length: size as u32,
        msg_type: request.msg_type,
        flags: request.flags,
        sequence: request.sequence,
        pid,
    };
    dst.reserve(size);
    header.encode(dst);
    dst.put_slice(&request.body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtypes::{NLM_F_DUMP, NLM_F_REQUEST, RTM_GETLINK};

    #[test]
    fn header_decodes_native_order_fields() {
        let mut wire = BytesMut::new();
        wire.put_u32_ne(20);
        wire.put_u16_ne(16);
        wire.put_u16_ne(0x2);
        wire.put_u32_ne(99);
        wire.put_u32_ne(1234);
        wire.put_u32_ne(0);

        let header = Header::decode(&wire).unwrap();
        assert_eq!(
            header,
            Header {
                length: 20,
                msg_type: 16,
                flags: 0x2,
                sequence: 99,
                pid: 1234,
            }
        );
        assert_eq!(header.body_len(), 4);
        assert!(header.has_flags(0x2));
    }

    #[test]
    fn header_rejects_short_input() {
        let err = Header::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                offset: 0,
                needed: HEADER_LEN,
                available: 10,
            }
        );
    }

    #[test]
    fn header_rejects_length_below_header_size() {
        let mut wire = BytesMut::new();
        Header {
            length: 8,
            ..Header::default()
        }
        .encode(&mut wire);
        assert_eq!(
            Header::decode(&wire).unwrap_err(),
            DecodeError::LengthTooShort(8)
        );
    }

    #[test]
    fn peek_needs_six_bytes() {
        assert_eq!(peek(&[0u8; 5]), None);

        let mut wire = BytesMut::new();
        wire.put_u32_ne(40);
        wire.put_u16_ne(17);
        assert_eq!(peek(&wire), Some((40, 17)));
    }

    #[test]
    fn encode_request_fills_length_and_pid() {
        let request = Request::new(RTM_GETLINK, NLM_F_REQUEST | NLM_F_DUMP, vec![0u8; 4])
            .with_sequence(7);
        let mut wire = BytesMut::new();
        encode_request(&request, 4242, usize::MAX, &mut wire).unwrap();

        assert_eq!(wire.len(), request.wire_size());
        let header = Header::decode(&wire).unwrap();
        assert_eq!(header.length, 20);
        assert_eq!(header.msg_type, RTM_GETLINK);
        assert_eq!(header.flags, NLM_F_REQUEST | NLM_F_DUMP);
        assert_eq!(header.sequence, 7);
        assert_eq!(header.pid, 4242);
    }

    #[test]
    fn encode_request_enforces_maximum() {
        let request = Request::new(RTM_GETLINK, NLM_F_REQUEST, vec![0u8; 64]);
        let mut wire = BytesMut::new();
        let err = encode_request(&request, 1, 32, &mut wire).unwrap_err();
        assert!(matches!(
            err,
            MarshalError::MessageTooLarge { size: 80, max: 32 }
        ));
        assert!(wire.is_empty());
    }
}
