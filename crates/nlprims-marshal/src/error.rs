/// Errors returned by marshal operations.
///
/// Per-message decode problems are not errors at this level; they are
/// attached to the [`Message`](crate::Message) as a
/// [`MessageError`](crate::MessageError).
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    /// A policy query or removal referenced a type with no registered decoder.
    #[error("no decode policy registered for message type {0}")]
    UnknownPolicy(u16),

    /// The encoded message would exceed the maximum message length.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, MarshalError>;
