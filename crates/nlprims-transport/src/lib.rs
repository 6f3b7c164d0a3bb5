//! Netlink socket transport.
//!
//! Provides the raw `AF_NETLINK` datagram socket used by the upper layers:
//! - [`NetlinkAddr`] and [`Protocol`] for addressing
//! - the [`Datagram`] trait, the seam the endpoint layer is written against
//! - [`NetlinkSocket`], the Linux implementation backed by `libc`
//!
//! This is the lowest layer of nlprims. Everything else builds on top of
//! the [`Datagram`] trait provided here.

pub mod addr;
pub mod error;
pub mod traits;

#[cfg(target_os = "linux")]
pub mod socket;

pub use addr::{NetlinkAddr, Protocol};
pub use error::{Result, TransportError};
pub use traits::Datagram;

#[cfg(target_os = "linux")]
pub use socket::NetlinkSocket;
