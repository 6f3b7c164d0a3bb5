use crate::addr::NetlinkAddr;
use crate::error::Result;

/// A connectionless message socket the endpoint layer can drive.
///
/// On Linux this is [`NetlinkSocket`](crate::NetlinkSocket). The trait is the
/// seam that lets endpoint lifecycle logic run against in-memory sockets.
///
/// All methods take `&self`: one thread may block in [`recv`](Datagram::recv)
/// while another calls [`close`](Datagram::close), which must make the pending
/// receive fail with [`TransportError::Shutdown`](crate::TransportError::Shutdown).
pub trait Datagram: Send + Sync {
    /// Bind the socket to a local address.
    ///
    /// An address collision must surface as a `TransportError::Bind` whose
    /// source has kind `AddrInUse`.
    fn bind(&self, addr: NetlinkAddr) -> Result<()>;

    /// Receive one datagram (blocking), returning the number of bytes written.
    fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Send one datagram to `addr`.
    fn send_to(&self, buf: &[u8], addr: NetlinkAddr) -> Result<usize>;

    /// Release the socket. Returns `true` only for the call that closed it.
    fn close(&self) -> bool;

    /// Whether [`close`](Datagram::close) has been called.
    fn is_closed(&self) -> bool;
}
