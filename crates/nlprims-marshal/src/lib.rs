//! Netlink message reassembly and policy-driven decoding.
//!
//! This is the core value-add layer of nlprims. Every netlink message starts
//! with a 16-byte header:
//! - a 4-byte total length (header included)
//! - a 2-byte message type and 2-byte flags
//! - a 4-byte sequence number and 4-byte sender identity
//!
//! [`Marshal`] slices raw datagrams into messages, holds back incomplete
//! trailing messages until the rest arrives, and decodes each message with
//! the [`Decoder`] registered for its type in a [`PolicyMap`]. Decode and
//! kernel errors are attached to the [`Message`], never raised.

pub mod codec;
pub mod decoder;
pub mod error;
pub mod marshal;
pub mod message;
pub mod mtypes;
pub mod policy;

pub use codec::{encode_request, Header, Request, HEADER_LEN};
pub use decoder::{Decoder, Payload, PayloadReader, RawDecoder, Value};
pub use error::{MarshalError, Result};
pub use marshal::{Marshal, MarshalConfig, DEFAULT_MAX_MESSAGE_LEN};
pub use message::{DecodeError, KernelError, Message, MessageError};
pub use mtypes::{
    event_name, type_name, NLMSG_DONE, NLMSG_ERROR, NLMSG_NOOP, NLMSG_OVERRUN, NLM_F_ACK,
    NLM_F_DUMP, NLM_F_ECHO, NLM_F_MATCH, NLM_F_MULTI, NLM_F_REQUEST, NLM_F_ROOT,
};
pub use policy::PolicyMap;
