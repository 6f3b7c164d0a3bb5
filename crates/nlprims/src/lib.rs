//! Netlink transport primitives for Linux.
//!
//! nlprims turns raw netlink datagrams into decoded messages and manages the
//! sockets that carry them: message reassembly across reads, per-type decode
//! policies, kernel error extraction, and process-unique endpoint addresses.
//!
//! # Crate Structure
//!
//! - [`transport`]: Netlink socket, addresses, and the `Datagram` seam
//! - [`marshal`]: Header codec, reassembly, and policy-driven decoding
//! - [`endpoint`]: Endpoint lifecycle and address allocation (behind `endpoint` feature)

/// Re-export transport types.
pub mod transport {
    pub use nlprims_transport::*;
}

/// Re-export marshal types.
pub mod marshal {
    pub use nlprims_marshal::*;
}

/// Re-export endpoint types (requires `endpoint` feature).
#[cfg(feature = "endpoint")]
pub mod endpoint {
    pub use nlprims_endpoint::*;
}
