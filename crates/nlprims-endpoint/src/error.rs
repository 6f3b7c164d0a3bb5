use crate::pool::PoolError;

/// Errors that can occur in endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] nlprims_transport::TransportError),

    /// Marshal-level error (policy lookups, request encoding).
    #[error("marshal error: {0}")]
    Marshal(#[from] nlprims_marshal::MarshalError),

    /// Address pool error.
    #[error("address pool error: {0}")]
    Pool(#[from] PoolError),

    /// No free address could be bound.
    #[error("address already in use (last tried {address:#x}, {attempts} attempts)")]
    AddressInUse { address: u32, attempts: usize },

    /// A fixed port does not fit above the process-id bits.
    #[error("port {port} out of range (max {max})")]
    PortOutOfRange { port: u32, max: u32 },

    /// The endpoint is already bound.
    #[error("endpoint already bound to {0:#x}")]
    AlreadyBound(u32),

    /// The endpoint has been closed.
    #[error("endpoint closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, EndpointError>;
