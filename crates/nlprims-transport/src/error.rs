use crate::addr::NetlinkAddr;

/// Errors that can occur in netlink transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to create the netlink socket.
    #[error("failed to open netlink socket: {0}")]
    Open(std::io::Error),

    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: NetlinkAddr,
        source: std::io::Error,
    },

    /// An I/O error occurred on the socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket has been closed.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// True when the kernel rejected a bind because the address is taken.
    pub fn is_addr_in_use(&self) -> bool {
        match self {
            TransportError::Bind { source, .. } => {
                source.kind() == std::io::ErrorKind::AddrInUse
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
