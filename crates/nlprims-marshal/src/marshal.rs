use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::codec::{peek, Header, HEADER_LEN};
use crate::decoder::{Decoder, Payload, PayloadReader, RawDecoder};
use crate::error::Result;
use crate::message::{DecodeError, KernelError, Message, MessageError};
use crate::mtypes::{event_name, NLMSG_ERROR};
use crate::policy::PolicyMap;

/// Default maximum declared message length: 16 MiB.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Offset of the signed error code inside an error frame.
const ERROR_CODE_OFFSET: usize = HEADER_LEN;

/// Offset of the embedded failed request inside an error frame.
const ERROR_REQUEST_OFFSET: usize = HEADER_LEN + 4;

/// Configuration for a [`Marshal`].
#[derive(Debug, Clone)]
pub struct MarshalConfig {
    /// Messages declaring a larger length are treated as malformed headers
    /// instead of being held back for reassembly.
    pub max_message_len: usize,
}

impl Default for MarshalConfig {
    fn default() -> Self {
        Self {
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

/// Unconsumed trailing bytes waiting for the rest of their message.
#[derive(Debug)]
struct Partial {
    bytes: BytesMut,
    /// Declared total length, when the length field was readable.
    expected: Option<usize>,
}

/// Splits raw datagrams into messages and decodes them.
///
/// One `Marshal` serves one endpoint. [`parse`](Marshal::parse) holds an
/// internal lock for its whole duration, so parses through the same
/// instance never interleave. Incomplete trailing messages are kept per
/// connection identity (at most one buffer each) and prepended to the next
/// parse for that identity.
pub struct Marshal {
    policy: RwLock<PolicyMap>,
    fallback: Arc<dyn Decoder>,
    pending: Mutex<HashMap<u32, Partial>>,
    config: MarshalConfig,
}

impl Marshal {
    /// Create a marshal with an empty policy and default configuration.
    pub fn new() -> Self {
        Self::with_config(MarshalConfig::default())
    }

    /// Create a marshal with explicit configuration.
    pub fn with_config(config: MarshalConfig) -> Self {
        Self {
            policy: RwLock::new(PolicyMap::new()),
            fallback: Arc::new(RawDecoder),
            pending: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Replace the decoder used for types with no policy entry.
    pub fn with_fallback(mut self, fallback: Arc<dyn Decoder>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn config(&self) -> &MarshalConfig {
        &self.config
    }

    /// Merge decoders into the policy map and return the resulting map.
    pub fn register(&self, entries: impl IntoIterator<Item = (u16, Arc<dyn Decoder>)>) -> PolicyMap {
        let mut policy = self.policy.write().unwrap_or_else(PoisonError::into_inner);
        policy.extend(entries);
        policy.clone()
    }

    /// Remove decoders by type and return the resulting map.
    ///
    /// Nothing is removed if any listed type is not registered.
    pub fn unregister(&self, types: &[u16]) -> Result<PolicyMap> {
        let mut policy = self.policy.write().unwrap_or_else(PoisonError::into_inner);
        policy.remove_all(types)?;
        Ok(policy.clone())
    }

    /// The whole policy map, or the entries for `types`.
    pub fn policy_map(&self, types: Option<&[u16]>) -> Result<PolicyMap> {
        let policy = self.policy.read().unwrap_or_else(PoisonError::into_inner);
        match types {
            None => Ok(policy.clone()),
            Some(types) => policy.subset(types),
        }
    }

    /// Bytes currently held back for `conn`, if any.
    pub fn pending_len(&self, conn: u32) -> Option<usize> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.get(&conn).map(|p| p.bytes.len())
    }

    /// Copy of the bytes held back for `conn`, if any.
    pub fn pending_bytes(&self, conn: u32) -> Option<Bytes> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending
            .get(&conn)
            .map(|p| Bytes::copy_from_slice(&p.bytes))
    }

    /// Number of connection identities with a partial message.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop the partial message held for `conn`. Returns the discarded length.
    pub fn discard_pending(&self, conn: u32) -> Option<usize> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.remove(&conn).map(|p| p.bytes.len())
    }

    /// Parse a raw buffer into messages, in buffer order.
    ///
    /// With `conn` set, an incomplete trailing message is kept for that
    /// identity and completed by the next call with the same identity.
    /// Without it, an incomplete message is reported as a header error.
    pub fn parse(&self, data: &[u8], conn: Option<u32>) -> Vec<Message> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        let buf = match conn.and_then(|c| pending.remove(&c).map(|p| (c, p))) {
            Some((conn, mut partial)) => {
                partial.bytes.extend_from_slice(data);
                if partial.expected.is_some_and(|expected| partial.bytes.len() < expected) {
                    trace!(
                        conn,
                        held = partial.bytes.len(),
                        expected = ?partial.expected,
                        "partial message still incomplete"
                    );
                    pending.insert(conn, partial);
                    return Vec::new();
                }
                trace!(conn, held = partial.bytes.len(), "resuming partial message");
                partial.bytes.freeze()
            }
            None => Bytes::copy_from_slice(data),
        };

        let policy = self.policy.read().unwrap_or_else(PoisonError::into_inner);
        let mut messages = Vec::new();
        let mut offset = 0usize;

        while offset < buf.len() {
            let rest = &buf[offset..];
            let declared = peek(rest);

            if let Some(conn) = conn {
                let incomplete = match declared {
                    None => true,
                    Some((length, _)) => {
                        (length as usize) <= self.config.max_message_len
                            && (length as usize) > rest.len()
                    }
                };
                if incomplete {
                    let expected = declared.map(|(length, _)| length as usize);
                    debug!(
                        conn,
                        held = rest.len(),
                        ?expected,
                        "deferring incomplete message"
                    );
                    pending.insert(
                        conn,
                        Partial {
                            bytes: BytesMut::from(rest),
                            expected,
                        },
                    );
                    break;
                }
            }

            match self.decode_at(&policy, &buf, offset) {
                Ok((message, length)) => {
                    trace!(
                        msg_type = message.header.msg_type,
                        length,
                        seq = message.header.sequence,
                        "decoded message"
                    );
                    messages.push(message);
                    offset += length;
                }
                Err(err) => {
                    warn!(
                        offset,
                        dropped = buf.len() - offset,
                        error = %err,
                        "header decode failed; dropping rest of buffer"
                    );
                    messages.push(Message::empty(MessageError::Header(err)));
                    break;
                }
            }
        }

        messages
    }

    /// Decode the message starting at `offset`, returning it with its length.
    ///
    /// Framing uses the length declared on the wire; the decoder's header
    /// only supplies the fields. An error means the message boundary is
    /// unknown.
    fn decode_at(
        &self,
        policy: &PolicyMap,
        buf: &Bytes,
        offset: usize,
    ) -> std::result::Result<(Message, usize), DecodeError> {
        let rest = &buf[offset..];
        let Some((declared, msg_type)) = peek(rest) else {
            return Err(DecodeError::Truncated {
                offset,
                needed: HEADER_LEN,
                available: rest.len(),
            });
        };
        let length = declared as usize;
        if length < HEADER_LEN {
            return Err(DecodeError::LengthTooShort(declared));
        }
        if length > self.config.max_message_len {
            return Err(DecodeError::LengthTooLarge {
                length: declared,
                max: self.config.max_message_len,
            });
        }
        if length > rest.len() {
            return Err(DecodeError::Truncated {
                offset,
                needed: length,
                available: rest.len(),
            });
        }

        let decoder = self.decoder_for(policy, msg_type);
        let header = decoder.decode_header(&rest[..length])?;

        let raw = buf.slice(offset..offset + length);
        let mut message = self.decode_body(decoder.as_ref(), header, &raw);

        if header.msg_type == NLMSG_ERROR {
            self.attach_error_frame(policy, &raw, &mut message);
        }

        Ok((message, length))
    }

    fn decoder_for(&self, policy: &PolicyMap, msg_type: u16) -> Arc<dyn Decoder> {
        policy
            .get(msg_type)
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Decode the body of a message framed as `raw`.
    fn decode_body(&self, decoder: &dyn Decoder, header: Header, raw: &Bytes) -> Message {
        let mut payload = Payload::new(raw.slice(HEADER_LEN.min(raw.len())..));

        let result = {
            let mut reader = PayloadReader::new(&mut payload);
            decoder.decode_payload(&header, &mut reader)
        };

        Message {
            header,
            payload,
            error: result.err().map(|source| MessageError::Payload {
                msg_type: header.msg_type,
                source,
            }),
            failed_request: None,
            event: event_name(header.msg_type),
        }
    }

    /// Read the error code of an `NLMSG_ERROR` frame and decode the request
    /// it reports on.
    fn attach_error_frame(&self, policy: &PolicyMap, raw: &Bytes, message: &mut Message) {
        if raw.len() < ERROR_REQUEST_OFFSET {
            message.error.get_or_insert(MessageError::Payload {
                msg_type: NLMSG_ERROR,
                source: DecodeError::Truncated {
                    offset: ERROR_CODE_OFFSET,
                    needed: 4,
                    available: raw.len().saturating_sub(ERROR_CODE_OFFSET),
                },
            });
            return;
        }

        let code = (&raw[ERROR_CODE_OFFSET..ERROR_REQUEST_OFFSET]).get_i32_ne();
        let Some(kernel) = KernelError::from_wire(code) else {
            return;
        };
        message.error.get_or_insert(MessageError::Kernel(kernel));

        // With capped acks the kernel embeds only the request header, so the
        // embedded length may exceed what is present.
        let embedded = raw.slice(ERROR_REQUEST_OFFSET..);
        let Some((declared, embedded_type)) = peek(&embedded) else {
            return;
        };
        if embedded.len() < HEADER_LEN {
            return;
        }
        let end = (declared as usize).clamp(HEADER_LEN, embedded.len());
        let embedded = embedded.slice(..end);
        let decoder = self.decoder_for(policy, embedded_type);
        let failed = match decoder.decode_header(&embedded) {
            Ok(header) => self.decode_body(decoder.as_ref(), header, &embedded),
            Err(err) => Message::empty(MessageError::Header(err)),
        };
        message.failed_request = Some(Box::new(failed));
    }
}

impl Default for Marshal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Marshal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `parse` locks pending before policy; keep that order here.
        let pending = self.pending_count();
        f.debug_struct("Marshal")
            .field("policy", &*self.policy.read().unwrap_or_else(PoisonError::into_inner))
            .field("pending", &pending)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_request, Request};
    use crate::decoder::Value;
    use crate::mtypes::{NLMSG_DONE, RTM_DELLINK, RTM_GETLINK, RTM_NEWADDR, RTM_NEWLINK};

    /// ifinfomsg-like layout: family, pad, type, index, flags, change.
    struct LinkDecoder;

    impl Decoder for LinkDecoder {
        fn name(&self) -> &'static str {
            "link"
        }

        fn decode_payload(
            &self,
            _header: &Header,
            reader: &mut PayloadReader<'_>,
        ) -> std::result::Result<(), DecodeError> {
            reader.u8("family")?;
            reader.skip(1)?;
            reader.u16("type")?;
            reader.i32("index")?;
            reader.u32("flags")?;
            reader.u32("change")?;
            Ok(())
        }
    }

    fn message(msg_type: u16, seq: u32, body: &[u8]) -> BytesMut {
        let mut wire = BytesMut::new();
        let request = Request::new(msg_type, 0, body.to_vec()).with_sequence(seq);
        encode_request(&request, 0, usize::MAX, &mut wire).unwrap();
        wire
    }

    fn link_body(index: i32) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_u8(0);
        body.put_u8(0);
        body.put_u16_ne(1);
        body.put_i32_ne(index);
        body.put_u32_ne(0x1043);
        body.put_u32_ne(0);
        body.to_vec()
    }

    fn error_frame(code: i32, request: &[u8]) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_i32_ne(code);
        body.put_slice(request);
        message(NLMSG_ERROR, 9, &body)
    }

    fn stream() -> BytesMut {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&message(RTM_NEWLINK, 1, &link_body(1)));
        wire.extend_from_slice(&message(RTM_NEWADDR, 2, b"addr"));
        wire.extend_from_slice(&message(RTM_DELLINK, 3, &link_body(7)));
        wire.extend_from_slice(&message(NLMSG_DONE, 4, &[0, 0, 0, 0]));
        wire
    }

    fn link_marshal() -> Marshal {
        let marshal = Marshal::new();
        let link: Arc<dyn Decoder> = Arc::new(LinkDecoder);
        marshal.register([(RTM_NEWLINK, Arc::clone(&link)), (RTM_DELLINK, link)]);
        marshal
    }

    #[test]
    fn two_event_messages_in_one_buffer() {
        let mut wire = message(16, 1, b"abcd");
        wire.extend_from_slice(&message(17, 2, b"efgh"));
        assert_eq!(wire.len(), 40);

        let messages = Marshal::new().parse(&wire, None);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].msg_type(), 16);
        assert_eq!(messages[0].event, Some("RTM_NEWLINK"));
        assert_eq!(messages[0].payload.body().as_ref(), b"abcd");
        assert_eq!(messages[1].msg_type(), 17);
        assert_eq!(messages[1].event, Some("RTM_DELLINK"));
        assert!(messages.iter().all(|m| m.error.is_none()));
    }

    #[test]
    fn registered_decoder_is_used() {
        let marshal = link_marshal();
        let messages = marshal.parse(&message(RTM_NEWLINK, 1, &link_body(3)), None);

        assert_eq!(messages.len(), 1);
        let payload = &messages[0].payload;
        assert_eq!(payload.get("index"), Some(&Value::I32(3)));
        assert_eq!(payload.get("flags"), Some(&Value::U32(0x1043)));
    }

    #[test]
    fn unregistered_type_uses_fallback_without_error() {
        let marshal = link_marshal();
        let messages = marshal.parse(&message(RTM_NEWADDR, 1, b"xyzw"), None);

        assert_eq!(messages.len(), 1);
        assert!(messages[0].error.is_none());
        assert!(messages[0].payload.fields().is_empty());
        assert_eq!(messages[0].payload.body().as_ref(), b"xyzw");
        assert_eq!(messages[0].event, Some("RTM_NEWADDR"));
    }

    #[test]
    fn payload_error_keeps_header_and_partial_fields() {
        let marshal = link_marshal();
        let body = &link_body(5)[..8];
        let mut wire = message(RTM_NEWLINK, 1, body);
        wire.extend_from_slice(&message(NLMSG_DONE, 2, &[0, 0, 0, 0]));

        let messages = marshal.parse(&wire, None);

        assert_eq!(messages.len(), 2);
        let broken = &messages[0];
        assert_eq!(broken.header.sequence, 1);
        assert_eq!(broken.event, Some("RTM_NEWLINK"));
        assert_eq!(broken.payload.get("index"), Some(&Value::I32(5)));
        assert!(broken.payload.get("flags").is_none());
        assert!(matches!(
            broken.error,
            Some(MessageError::Payload {
                msg_type: RTM_NEWLINK,
                source: DecodeError::Truncated { .. }
            })
        ));
        assert_eq!(messages[1].msg_type(), NLMSG_DONE);
        assert!(messages[1].error.is_none());
    }

    #[test]
    fn header_error_yields_empty_message_and_stops() {
        let mut wire = message(RTM_NEWADDR, 1, b"good");
        let mut bad = BytesMut::new();
        bad.put_u32_ne(8);
        bad.put_u16_ne(RTM_NEWLINK);
        bad.put_slice(&[0u8; 10]);
        wire.extend_from_slice(&bad);
        wire.extend_from_slice(&message(NLMSG_DONE, 3, &[0, 0, 0, 0]));

        let messages = Marshal::new().parse(&wire, None);

        assert_eq!(messages.len(), 2);
        assert!(messages[0].error.is_none());
        let empty = &messages[1];
        assert_eq!(
            empty.error,
            Some(MessageError::Header(DecodeError::LengthTooShort(8)))
        );
        assert_eq!(empty.header, Header::default());
        assert!(empty.payload.is_empty());
        assert_eq!(empty.event, None);
    }

    #[test]
    fn truncated_message_without_reassembly_is_a_header_error() {
        let wire = message(RTM_NEWLINK, 1, &link_body(1));
        let marshal = link_marshal();

        let messages = marshal.parse(&wire[..20], None);

        assert_eq!(messages.len(), 1);
        assert!(matches!(
            messages[0].error,
            Some(MessageError::Header(DecodeError::Truncated { .. }))
        ));
        assert_eq!(marshal.pending_count(), 0);
    }

    #[test]
    fn split_stream_matches_whole_parse() {
        let wire = stream();
        let expected = link_marshal().parse(&wire, Some(1));
        assert_eq!(expected.len(), 4);

        for split in 0..=wire.len() {
            let marshal = link_marshal();
            let mut got = marshal.parse(&wire[..split], Some(1));
            got.extend(marshal.parse(&wire[split..], Some(1)));
            assert_eq!(got, expected, "split at {split}");
            assert_eq!(marshal.pending_count(), 0, "split at {split}");
        }
    }

    #[test]
    fn repeated_partials_share_one_buffer() {
        let wire = message(RTM_NEWLINK, 1, &link_body(4));
        let marshal = link_marshal();

        assert!(marshal.parse(&wire[..3], Some(5)).is_empty());
        assert!(marshal.parse(&wire[3..10], Some(5)).is_empty());
        assert!(marshal.parse(&wire[10..25], Some(5)).is_empty());

        assert_eq!(marshal.pending_count(), 1);
        assert_eq!(marshal.pending_len(5), Some(25));
        assert_eq!(marshal.pending_bytes(5).unwrap().as_ref(), &wire[..25]);

        let messages = marshal.parse(&wire[25..], Some(5));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload.get("index"), Some(&Value::I32(4)));
        assert_eq!(marshal.pending_count(), 0);
    }

    #[test]
    fn partials_are_tracked_per_connection() {
        let wire = message(RTM_NEWADDR, 1, b"abcd");
        let marshal = Marshal::new();

        marshal.parse(&wire[..10], Some(1));
        marshal.parse(&wire[..4], Some(2));
        assert_eq!(marshal.pending_count(), 2);

        let messages = marshal.parse(&wire[10..], Some(1));
        assert_eq!(messages.len(), 1);
        assert_eq!(marshal.pending_len(1), None);
        assert_eq!(marshal.pending_len(2), Some(4));

        assert_eq!(marshal.discard_pending(2), Some(4));
        assert_eq!(marshal.pending_count(), 0);
    }

    #[test]
    fn oversized_declared_length_is_not_deferred() {
        let marshal = Marshal::with_config(MarshalConfig {
            max_message_len: 64,
        });
        let mut wire = BytesMut::new();
        wire.put_u32_ne(4096);
        wire.put_u16_ne(RTM_NEWLINK);
        wire.put_slice(&[0u8; 26]);

        let messages = marshal.parse(&wire, Some(1));

        assert_eq!(messages.len(), 1);
        assert!(matches!(
            messages[0].error,
            Some(MessageError::Header(DecodeError::LengthTooLarge { length: 4096, max: 64 }))
        ));
        assert_eq!(marshal.pending_count(), 0);
    }

    #[test]
    fn error_frame_with_zero_code_is_an_ack() {
        let request = message(RTM_GETLINK, 9, &[0u8; 4]);
        let messages = Marshal::new().parse(&error_frame(0, &request), None);

        assert_eq!(messages.len(), 1);
        assert!(messages[0].error.is_none());
        assert!(messages[0].failed_request.is_none());
    }

    #[test]
    fn error_frame_attaches_kernel_error_and_failed_request() {
        let marshal = link_marshal();
        let request = message(RTM_NEWLINK, 9, &link_body(12));
        let messages = marshal.parse(&error_frame(-1, &request), None);

        assert_eq!(messages.len(), 1);
        let frame = &messages[0];
        assert_eq!(frame.kernel_error(), Some(&KernelError { code: 1 }));

        let failed = frame.failed_request.as_ref().unwrap();
        assert_eq!(failed.header.msg_type, RTM_NEWLINK);
        assert_eq!(failed.header.sequence, 9);
        assert_eq!(failed.payload.get("index"), Some(&Value::I32(12)));
    }

    #[test]
    fn error_frame_with_capped_request_decodes_header_only() {
        let marshal = link_marshal();
        let request = message(RTM_NEWLINK, 9, &link_body(12));
        let messages = marshal.parse(&error_frame(-22, &request[..HEADER_LEN]), None);

        let frame = &messages[0];
        assert_eq!(frame.kernel_error().map(|e| e.code), Some(22));
        let failed = frame.failed_request.as_ref().unwrap();
        assert_eq!(failed.header.msg_type, RTM_NEWLINK);
        assert!(matches!(failed.error, Some(MessageError::Payload { .. })));
    }

    #[test]
    fn short_error_frame_is_a_payload_error() {
        let messages = Marshal::new().parse(&message(NLMSG_ERROR, 1, &[0xff, 0xff]), None);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].msg_type(), NLMSG_ERROR);
        assert!(matches!(
            messages[0].error,
            Some(MessageError::Payload {
                msg_type: NLMSG_ERROR,
                source: DecodeError::Truncated { available: 2, .. }
            })
        ));
        assert!(messages[0].failed_request.is_none());
    }

    #[test]
    fn register_and_unregister_report_resulting_map() {
        let marshal = Marshal::new();
        let map = marshal.register([(RTM_NEWLINK, Arc::new(LinkDecoder) as Arc<dyn Decoder>)]);
        assert_eq!(map.types(), vec![RTM_NEWLINK]);

        let map = marshal.register([(RTM_DELLINK, Arc::new(LinkDecoder) as Arc<dyn Decoder>)]);
        assert_eq!(map.types(), vec![RTM_NEWLINK, RTM_DELLINK]);

        assert!(marshal.unregister(&[RTM_NEWADDR]).is_err());
        let map = marshal.unregister(&[RTM_NEWLINK]).unwrap();
        assert_eq!(map.types(), vec![RTM_DELLINK]);

        assert_eq!(marshal.policy_map(None).unwrap().len(), 1);
        assert!(marshal.policy_map(Some(&[RTM_NEWLINK])).is_err());
    }

    /// Reports the body length in the header, as some legacy decoders do.
    struct BodyLengthHeader;

    impl Decoder for BodyLengthHeader {
        fn decode_header(&self, raw: &[u8]) -> std::result::Result<Header, DecodeError> {
            let mut header = Header::decode(raw)?;
            header.length -= HEADER_LEN as u32;
            Ok(header)
        }

        fn decode_payload(
            &self,
            _header: &Header,
            _reader: &mut PayloadReader<'_>,
        ) -> std::result::Result<(), DecodeError> {
            Ok(())
        }
    }

    #[test]
    fn framing_follows_wire_length_not_decoder_header() {
        let marshal = Marshal::new();
        marshal.register([(RTM_NEWLINK, Arc::new(BodyLengthHeader) as Arc<dyn Decoder>)]);

        let mut wire = message(RTM_NEWLINK, 1, &[]);
        wire.extend_from_slice(&message(RTM_NEWLINK, 2, b"abcd"));
        wire.extend_from_slice(&message(NLMSG_DONE, 3, &[0, 0, 0, 0]));

        let messages = marshal.parse(&wire, Some(5));

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].header.length, 0);
        assert!(messages[0].payload.body().is_empty());
        assert_eq!(messages[1].header.sequence, 2);
        assert_eq!(messages[1].payload.body().as_ref(), b"abcd");
        assert_eq!(messages[2].msg_type(), NLMSG_DONE);
        assert!(messages.iter().all(|m| m.error.is_none()));
        assert_eq!(marshal.pending_count(), 0);
    }

    /// Error-frame decoder that expects a longer body than the kernel sends.
    struct StrictErrorDecoder;

    impl Decoder for StrictErrorDecoder {
        fn decode_payload(
            &self,
            _header: &Header,
            reader: &mut PayloadReader<'_>,
        ) -> std::result::Result<(), DecodeError> {
            reader.i32("code")?;
            reader.bytes("request", 256)?;
            Ok(())
        }
    }

    #[test]
    fn payload_error_on_error_frame_wins_over_kernel_error() {
        let marshal = link_marshal();
        marshal.register([(NLMSG_ERROR, Arc::new(StrictErrorDecoder) as Arc<dyn Decoder>)]);
        let request = message(RTM_NEWLINK, 9, &link_body(4));

        let messages = marshal.parse(&error_frame(-1, &request), None);

        assert_eq!(messages.len(), 1);
        let frame = &messages[0];
        assert!(matches!(
            frame.error,
            Some(MessageError::Payload {
                msg_type: NLMSG_ERROR,
                source: DecodeError::Truncated { .. }
            })
        ));
        assert_eq!(frame.kernel_error(), None);
        assert_eq!(frame.payload.get("code"), Some(&Value::I32(-1)));

        let failed = frame.failed_request.as_ref().unwrap();
        assert_eq!(failed.msg_type(), RTM_NEWLINK);
        assert_eq!(failed.payload.get("index"), Some(&Value::I32(4)));
    }

    #[test]
    fn known_length_partial_waits_without_rescanning() {
        let marshal = link_marshal();
        let wire = message(RTM_NEWLINK, 1, &link_body(2));
        assert_eq!(wire.len(), 32);

        assert!(marshal.parse(&wire[..10], Some(1)).is_empty());
        assert!(marshal.parse(&wire[10..20], Some(1)).is_empty());
        assert_eq!(marshal.pending_len(1), Some(20));
        assert_eq!(marshal.pending_bytes(1).unwrap().as_ref(), &wire[..20]);

        let messages = marshal.parse(&wire[20..], Some(1));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload.get("index"), Some(&Value::I32(2)));
        assert_eq!(marshal.pending_count(), 0);
    }

    #[test]
    fn debug_output_does_not_hold_policy_while_counting() {
        let marshal = link_marshal();
        marshal.parse(&message(RTM_NEWLINK, 1, &link_body(1))[..8], Some(3));

        let shown = format!("{marshal:?}");
        assert!(shown.contains("pending: 1"));
        assert!(shown.contains("\"link\""));
    }

    #[test]
    fn concurrent_parses_on_shared_marshal() {
        let marshal = Arc::new(link_marshal());
        let wire = stream().freeze();

        let handles: Vec<_> = (0..4u32)
            .map(|conn| {
                let marshal = Arc::clone(&marshal);
                let wire = wire.clone();
                std::thread::spawn(move || {
                    let mut total = 0;
                    for chunk in wire.chunks(7) {
                        total += marshal.parse(chunk, Some(conn)).len();
                    }
                    total
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 4);
        }
        assert_eq!(marshal.pending_count(), 0);
    }
}
