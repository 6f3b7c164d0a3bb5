use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;
use nlprims_marshal::{
    encode_request, Decoder, Marshal, MarshalConfig, Message, PolicyMap, Request,
};
#[cfg(target_os = "linux")]
use nlprims_transport::NetlinkSocket;
use nlprims_transport::{Datagram, NetlinkAddr, Protocol, TransportError};
use tracing::{debug, info, warn};

use crate::error::{EndpointError, Result};
use crate::identity::{compose_address, IdentityRequest, MAX_PORT};
use crate::pool::AddrPool;

/// Bind rounds tried before giving up with `AddressInUse`: one per port.
pub const DEFAULT_BIND_ATTEMPTS: usize = 1024;

/// Receive buffer size; one read returns at most one datagram of this size.
pub const DEFAULT_RECV_BUFFER: usize = 16 * 1024;

/// Configuration for an [`Endpoint`].
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Netlink protocol family of the socket.
    pub protocol: Protocol,
    /// How the bind address is chosen.
    pub identity: IdentityRequest,
    /// Maximum allocate-and-bind rounds for pool-allocated addresses.
    pub bind_attempts: usize,
    /// Size of the buffer each read receives into.
    pub recv_buffer_size: usize,
    /// Configuration of the owned marshal.
    pub marshal: MarshalConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            identity: IdentityRequest::Auto,
            bind_attempts: DEFAULT_BIND_ATTEMPTS,
            recv_buffer_size: DEFAULT_RECV_BUFFER,
            marshal: MarshalConfig::default(),
        }
    }
}

/// Lifecycle phase of an [`Endpoint`]. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unbound,
    Bound,
    Closed,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    pid: u32,
    port: u32,
    fixed: bool,
    address: Option<u32>,
    groups: u32,
}

/// One netlink endpoint: a socket, its marshal, and its address.
///
/// Every method takes `&self`. Share an endpoint through an `Arc` to read
/// on one thread and [`close`](Endpoint::close) from another; the blocked
/// read then fails with [`EndpointError::Closed`].
pub struct Endpoint<S: Datagram> {
    socket: S,
    marshal: Marshal,
    pool: Arc<AddrPool>,
    config: EndpointConfig,
    state: Mutex<State>,
    sequence: AtomicU32,
}

#[cfg(target_os = "linux")]
impl Endpoint<NetlinkSocket> {
    /// Open an endpoint for `protocol` with default configuration and the
    /// process-wide address pool.
    pub fn open(protocol: Protocol) -> Result<Self> {
        Self::open_with_config(EndpointConfig {
            protocol,
            ..EndpointConfig::default()
        })
    }

    /// Open an endpoint with explicit configuration and the process-wide pool.
    pub fn open_with_config(config: EndpointConfig) -> Result<Self> {
        Self::open_with_pool(config, AddrPool::process_wide())
    }

    /// Open an endpoint that allocates ports from `pool`.
    pub fn open_with_pool(config: EndpointConfig, pool: Arc<AddrPool>) -> Result<Self> {
        let socket = NetlinkSocket::open(config.protocol)?;
        Ok(Self::with_socket(socket, config, pool))
    }
}

impl<S: Datagram> Endpoint<S> {
    /// Build an endpoint around an already opened socket.
    pub fn with_socket(socket: S, config: EndpointConfig, pool: Arc<AddrPool>) -> Self {
        let (pid, port, fixed) = config.identity.resolve();
        Self {
            socket,
            marshal: Marshal::with_config(config.marshal.clone()),
            pool,
            state: Mutex::new(State {
                phase: Phase::Unbound,
                pid,
                port,
                fixed,
                address: None,
                groups: 0,
            }),
            config,
            sequence: AtomicU32::new(1),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge decoders into the decode policy and return the resulting map.
    pub fn register_policy(
        &self,
        entries: impl IntoIterator<Item = (u16, Arc<dyn Decoder>)>,
    ) -> PolicyMap {
        self.marshal.register(entries)
    }

    /// Register a single decoder for `msg_type`.
    pub fn register_decoder(&self, msg_type: u16, decoder: impl Decoder + 'static) -> PolicyMap {
        let decoder: Arc<dyn Decoder> = Arc::new(decoder);
        self.marshal.register([(msg_type, decoder)])
    }

    /// Remove decoders by type. Fails without removing anything if a type is
    /// not registered.
    pub fn unregister_policy(&self, types: &[u16]) -> Result<PolicyMap> {
        Ok(self.marshal.unregister(types)?)
    }

    /// The whole decode policy, or the entries for `types`.
    pub fn policy_map(&self, types: Option<&[u16]>) -> Result<PolicyMap> {
        Ok(self.marshal.policy_map(types)?)
    }

    /// Bind to `groups`, returning the bound address.
    ///
    /// `identity` overrides the configured identity: `Some(0)` binds to the
    /// raw process id, any other value is used verbatim. Fixed identities are
    /// bound once; otherwise ports are taken from the pool until the kernel
    /// accepts one or the attempt budget runs out.
    pub fn bind(&self, groups: u32, identity: Option<u32>) -> Result<u32> {
        let mut state = self.lock_state();
        match state.phase {
            Phase::Closed => return Err(EndpointError::Closed),
            Phase::Bound => {
                return Err(EndpointError::AlreadyBound(state.address.unwrap_or_default()))
            }
            Phase::Unbound => {}
        }

        if let Some(value) = identity {
            let (pid, port, fixed) = IdentityRequest::from_value(value).resolve();
            state.pid = pid;
            state.port = port;
            state.fixed = fixed;
        }

        let address = if state.fixed {
            self.bind_fixed(&state, groups)?
        } else {
            let (port, address) = self.bind_allocated(state.pid, groups)?;
            state.port = port;
            address
        };

        state.address = Some(address);
        state.groups = groups;
        state.phase = Phase::Bound;
        info!(
            address = format_args!("{address:#x}"),
            pid = state.pid,
            port = state.port,
            groups = format_args!("{groups:#x}"),
            fixed = state.fixed,
            "endpoint bound"
        );
        Ok(address)
    }

    fn bind_fixed(&self, state: &State, groups: u32) -> Result<u32> {
        if state.port > MAX_PORT {
            return Err(EndpointError::PortOutOfRange {
                port: state.port,
                max: MAX_PORT,
            });
        }
        let address = compose_address(state.pid, state.port);
        match self.socket.bind(NetlinkAddr::new(address, groups)) {
            Ok(()) => Ok(address),
            Err(err) if err.is_addr_in_use() => Err(EndpointError::AddressInUse {
                address,
                attempts: 1,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Allocate-and-bind loop. Ports the kernel rejects as in use are held
    /// until the loop ends so each round tries a new one, then released.
    fn bind_allocated(&self, pid: u32, groups: u32) -> Result<(u32, u32)> {
        let mut rejected = Vec::new();
        let outcome = self.try_ports(pid, groups, &mut rejected);
        for port in rejected {
            self.release_port(port);
        }
        outcome
    }

    fn try_ports(&self, pid: u32, groups: u32, rejected: &mut Vec<u32>) -> Result<(u32, u32)> {
        let mut last = 0u32;
        for attempt in 1..=self.config.bind_attempts {
            let port = self.pool.allocate()?;
            let address = compose_address(pid, port);
            match self.socket.bind(NetlinkAddr::new(address, groups)) {
                Ok(()) => return Ok((port, address)),
                Err(err) if err.is_addr_in_use() => {
                    debug!(attempt, port, "address in use; trying another port");
                    rejected.push(port);
                    last = address;
                }
                Err(err) => {
                    self.release_port(port);
                    return Err(err.into());
                }
            }
        }
        Err(EndpointError::AddressInUse {
            address: last,
            attempts: self.config.bind_attempts,
        })
    }

    fn release_port(&self, port: u32) {
        if let Err(err) = self.pool.free(port) {
            warn!(port, error = %err, "failed to return port to pool");
        }
    }

    /// Receive one datagram (blocking) and decode it.
    ///
    /// Incomplete trailing messages are kept and completed by later reads.
    pub fn read(&self) -> Result<Vec<Message>> {
        let conn = {
            let state = self.lock_state();
            if state.phase == Phase::Closed {
                return Err(EndpointError::Closed);
            }
            state.address.unwrap_or_default()
        };

        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let n = match self.socket.recv(&mut buf) {
            Ok(n) => n,
            Err(TransportError::Shutdown) => return Err(EndpointError::Closed),
            Err(err) => return Err(err.into()),
        };

        Ok(self.marshal.parse(&buf[..n], Some(conn)))
    }

    /// Send a request to the kernel, returning the sequence number used.
    ///
    /// A request with sequence 0 gets the endpoint's next sequence number.
    pub fn send(&self, request: &Request) -> Result<u32> {
        let pid = {
            let state = self.lock_state();
            if state.phase == Phase::Closed {
                return Err(EndpointError::Closed);
            }
            state.address.unwrap_or_default()
        };

        let sequence = match request.sequence {
            0 => self.next_sequence(),
            seq => seq,
        };
        let outgoing = Request {
            sequence,
            ..request.clone()
        };

        let mut wire = BytesMut::with_capacity(outgoing.wire_size());
        encode_request(&outgoing, pid, self.config.marshal.max_message_len, &mut wire)?;

        match self.socket.send_to(&wire, NetlinkAddr::KERNEL) {
            Ok(_) => Ok(sequence),
            Err(TransportError::Shutdown) => Err(EndpointError::Closed),
            Err(err) => Err(err.into()),
        }
    }

    fn next_sequence(&self) -> u32 {
        match self.sequence.fetch_add(1, Ordering::Relaxed) {
            0 => self.sequence.fetch_add(1, Ordering::Relaxed),
            seq => seq,
        }
    }

    /// Release the address and the socket. Calling it again does nothing.
    pub fn close(&self) {
        let mut state = self.lock_state();
        if state.phase == Phase::Closed {
            return;
        }
        if state.phase == Phase::Bound && !state.fixed {
            self.release_port(state.port);
        }
        self.socket.close();
        state.phase = Phase::Closed;
        state.address = None;
        debug!(pid = state.pid, port = state.port, "endpoint closed");
    }

    pub fn phase(&self) -> Phase {
        self.lock_state().phase
    }

    /// The bound address, while bound.
    pub fn address(&self) -> Option<u32> {
        self.lock_state().address
    }

    pub fn pid(&self) -> u32 {
        self.lock_state().pid
    }

    pub fn port(&self) -> u32 {
        self.lock_state().port
    }

    /// Multicast groups of the current binding.
    pub fn groups(&self) -> u32 {
        self.lock_state().groups
    }

    /// True when the address is not allocated from the pool.
    pub fn is_fixed(&self) -> bool {
        self.lock_state().fixed
    }

    pub fn marshal(&self) -> &Marshal {
        &self.marshal
    }

    pub fn pool(&self) -> &Arc<AddrPool> {
        &self.pool
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }
}

impl<S: Datagram> Drop for Endpoint<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: Datagram> std::fmt::Debug for Endpoint<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Endpoint")
            .field("protocol", &self.config.protocol)
            .field("phase", &state.phase)
            .field("address", &state.address)
            .field("groups", &state.groups)
            .field("fixed", &state.fixed)
            .finish()
    }
}
