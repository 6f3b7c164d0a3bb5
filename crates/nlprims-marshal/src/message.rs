use std::fmt;

use crate::codec::Header;
use crate::decoder::Payload;

/// Why a header or payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes were available than the field being read needs.
    #[error("truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The declared message length cannot even hold the fixed header.
    #[error("declared length {0} is shorter than the header")]
    LengthTooShort(u32),

    /// The declared message length exceeds the configured maximum.
    #[error("declared length {length} exceeds maximum {max}")]
    LengthTooLarge { length: u32, max: usize },

    /// Decoder-specific validation failure.
    #[error("{0}")]
    Invalid(String),
}

/// A non-zero error code carried by an `NLMSG_ERROR` frame.
///
/// The code is stored as a positive errno value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelError {
    pub code: i32,
}

impl KernelError {
    /// Build from the signed wire value; returns `None` for zero (an ack).
    pub fn from_wire(raw: i32) -> Option<Self> {
        match raw.unsigned_abs() {
            0 => None,
            code => Some(Self {
                code: i32::try_from(code).unwrap_or(i32::MAX),
            }),
        }
    }

    /// The code as an OS error, for display and `ErrorKind` matching.
    pub fn as_io_error(&self) -> std::io::Error {
        std::io::Error::from_raw_os_error(self.code)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", self.as_io_error(), self.code)
    }
}

impl std::error::Error for KernelError {}

/// Error attached to a decoded [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// The fixed header was malformed; the message carries no payload.
    #[error("header decode error: {0}")]
    Header(DecodeError),

    /// The header decoded but the body did not; fields decoded before the
    /// failure are kept.
    #[error("payload decode error (type {msg_type}): {source}")]
    Payload {
        msg_type: u16,
        #[source]
        source: DecodeError,
    },

    /// The kernel reported that a request failed.
    #[error("kernel error: {0}")]
    Kernel(KernelError),
}

/// One decoded netlink message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub header: Header,
    pub payload: Payload,
    pub error: Option<MessageError>,
    /// Decoded copy of the request an error frame reports on.
    pub failed_request: Option<Box<Message>>,
    /// Event-class tag for link/address/route/neighbour notifications.
    pub event: Option<&'static str>,
}

impl Message {
    /// An empty shell carrying only an error.
    pub fn empty(error: MessageError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// The message type from the header.
    pub fn msg_type(&self) -> u16 {
        self.header.msg_type
    }

    /// True when an error of any kind is attached.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The kernel-reported error, if this is a failed-request frame.
    pub fn kernel_error(&self) -> Option<&KernelError> {
        match &self.error {
            Some(MessageError::Kernel(err)) => Some(err),
            _ => None,
        }
    }
}
