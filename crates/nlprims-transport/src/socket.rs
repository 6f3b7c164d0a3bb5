use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, trace};

use crate::addr::{NetlinkAddr, Protocol};
use crate::error::{Result, TransportError};
use crate::traits::Datagram;

/// Linux `AF_NETLINK` datagram socket.
///
/// Besides the socket itself this owns a wake pipe. [`close`](Datagram::close)
/// writes to the pipe before releasing the descriptor, so a thread blocked in
/// [`recv`](Datagram::recv) wakes up and fails with
/// [`TransportError::Shutdown`] instead of hanging. The descriptor lives
/// behind a `RwLock`: readers hold it shared while polling, close takes it
/// exclusively, so the fd is released exactly once and never under a reader.
pub struct NetlinkSocket {
    fd: RwLock<Option<OwnedFd>>,
    wake_rx: OwnedFd,
    wake_tx: OwnedFd,
    protocol: Protocol,
    closed: AtomicBool,
}

impl NetlinkSocket {
    /// Open a netlink socket for the given protocol family.
    pub fn open(protocol: Protocol) -> Result<Self> {
        // SAFETY: plain syscall with constant arguments; the result is checked.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                protocol.as_raw(),
            )
        };
        if raw < 0 {
            return Err(TransportError::Open(io::Error::last_os_error()));
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let (wake_rx, wake_tx) = wake_pipe().map_err(TransportError::Open)?;

        debug!(protocol = protocol.name(), fd = raw, "opened netlink socket");

        Ok(Self {
            fd: RwLock::new(Some(fd)),
            wake_rx,
            wake_tx,
            protocol,
            closed: AtomicBool::new(false),
        })
    }

    /// The protocol family this socket was opened with.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The address the kernel reports for this socket (`getsockname`).
    pub fn local_addr(&self) -> Result<NetlinkAddr> {
        let guard = self.fd.read().unwrap_or_else(PoisonError::into_inner);
        let fd = guard.as_ref().ok_or(TransportError::Shutdown)?.as_raw_fd();

        let mut addr = empty_sockaddr();
        let mut len = std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
        // SAFETY: `addr` and `len` are valid writable pointers sized for
        // `sockaddr_nl`, and `fd` is open while the read guard is held.
        let rc = unsafe {
            libc::getsockname(
                fd,
                (&mut addr as *mut libc::sockaddr_nl).cast::<libc::sockaddr>(),
                &mut len,
            )
        };
        if rc < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }
        Ok(NetlinkAddr::new(addr.nl_pid, addr.nl_groups))
    }

    /// Block until the socket or the wake pipe is readable.
    ///
    /// Returns `Ok(false)` when woken by close.
    fn wait_readable(&self, fd: RawFd) -> io::Result<bool> {
        let mut fds = [
            libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.wake_rx.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        loop {
            // SAFETY: `fds` is a valid array of two pollfd entries.
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if fds[1].revents != 0 || self.closed.load(Ordering::SeqCst) {
                return Ok(false);
            }
            if fds[0].revents != 0 {
                return Ok(true);
            }
        }
    }
}

impl Datagram for NetlinkSocket {
    fn bind(&self, addr: NetlinkAddr) -> Result<()> {
        let guard = self.fd.read().unwrap_or_else(PoisonError::into_inner);
        let fd = guard.as_ref().ok_or(TransportError::Shutdown)?.as_raw_fd();

        let sa = sockaddr_for(addr);
        // SAFETY: `sa` is a fully initialised `sockaddr_nl` and the length
        // matches its size; `fd` stays open while the guard is held.
        let rc = unsafe {
            libc::bind(
                fd,
                (&sa as *const libc::sockaddr_nl).cast::<libc::sockaddr>(),
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(TransportError::Bind {
                addr,
                source: io::Error::last_os_error(),
            });
        }
        trace!(%addr, "bound netlink socket");
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let guard = self.fd.read().unwrap_or_else(PoisonError::into_inner);
        let fd = guard.as_ref().ok_or(TransportError::Shutdown)?.as_raw_fd();

        loop {
            if !self.wait_readable(fd)? {
                return Err(TransportError::Shutdown);
            }
            // SAFETY: `buf` is valid for `buf.len()` writable bytes.
            let n = unsafe {
                libc::recv(
                    fd,
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => continue,
                    _ => return Err(TransportError::Io(err)),
                }
            }
            return Ok(n as usize);
        }
    }

    fn send_to(&self, buf: &[u8], addr: NetlinkAddr) -> Result<usize> {
        let guard = self.fd.read().unwrap_or_else(PoisonError::into_inner);
        let fd = guard.as_ref().ok_or(TransportError::Shutdown)?.as_raw_fd();

        let sa = sockaddr_for(addr);
        loop {
            // SAFETY: `buf` is valid for reads of `buf.len()` bytes and `sa`
            // is a fully initialised `sockaddr_nl`.
            let n = unsafe {
                libc::sendto(
                    fd,
                    buf.as_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    0,
                    (&sa as *const libc::sockaddr_nl).cast::<libc::sockaddr>(),
                    std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(TransportError::Io(err));
            }
            return Ok(n as usize);
        }
    }

    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let byte = 1u8;
        // SAFETY: writes one byte from a valid stack location to our own pipe.
        let _ = unsafe {
            libc::write(
                self.wake_tx.as_raw_fd(),
                (&byte as *const u8).cast::<libc::c_void>(),
                1,
            )
        };

        let mut guard = self.fd.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(fd) = guard.take() {
            debug!(fd = fd.as_raw_fd(), "closing netlink socket");
            drop(fd);
        }
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for NetlinkSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlinkSocket")
            .field("protocol", &self.protocol)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn empty_sockaddr() -> libc::sockaddr_nl {
    // SAFETY: `sockaddr_nl` is plain old data; all-zero is a valid value.
    let mut sa: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
    sa.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    sa
}

fn sockaddr_for(addr: NetlinkAddr) -> libc::sockaddr_nl {
    let mut sa = empty_sockaddr();
    sa.nl_pid = addr.pid;
    sa.nl_groups = addr.groups;
    sa
}

fn wake_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` has room for the two descriptors `pipe2` writes.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just created and are owned by us.
    let pair = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok(pair)
}
