//! Netlink endpoint lifecycle.
//!
//! This is the "just works" layer. An [`Endpoint`] owns one netlink socket
//! and one [`Marshal`](nlprims_marshal::Marshal), binds to an address that is
//! unique within the process (allocated from an [`AddrPool`]), and returns
//! decoded messages from each read.

pub mod endpoint;
pub mod error;
pub mod identity;
pub mod pool;

pub use endpoint::{Endpoint, EndpointConfig, Phase, DEFAULT_BIND_ATTEMPTS, DEFAULT_RECV_BUFFER};
pub use error::{EndpointError, Result};
pub use identity::{compose_address, process_pid, IdentityRequest, MAX_PORT, PID_BITS, PID_MASK};
pub use pool::{AddrPool, AllocOrder, PoolConfig, PoolError};
