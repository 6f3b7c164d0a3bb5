//! Endpoint identity composition.
//!
//! A netlink address is 32 bits. The low [`PID_BITS`] hold the process id
//! (Linux caps pids at 2^22), the bits above hold a port that tells apart
//! several sockets opened by the same process.

/// Width of the process-id segment of an address.
pub const PID_BITS: u32 = 22;

/// Mask selecting the process-id segment.
pub const PID_MASK: u32 = (1 << PID_BITS) - 1;

/// Largest port that fits above the process-id segment.
pub const MAX_PORT: u32 = u32::MAX >> PID_BITS;

/// Combine a process id and a port into one address.
///
/// The pid is used as given; callers mask it when they want a port segment.
/// Port bits above [`MAX_PORT`] do not fit and are lost, so callers check
/// the range first.
pub fn compose_address(pid: u32, port: u32) -> u32 {
    pid | (port << PID_BITS)
}

/// The current process id.
pub fn process_pid() -> u32 {
    std::process::id()
}

/// How an endpoint chooses the address it binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityRequest {
    /// Masked process id plus a port allocated from the pool at bind time.
    #[default]
    Auto,
    /// Masked process id plus this fixed port; no pool interaction.
    Port(u32),
    /// The raw process id with no port segment.
    Process,
    /// This address, verbatim.
    Fixed(u32),
}

impl IdentityRequest {
    /// Interpret an explicit identity value: `0` means the process id.
    pub fn from_value(value: u32) -> Self {
        match value {
            0 => IdentityRequest::Process,
            id => IdentityRequest::Fixed(id),
        }
    }

    /// Resolve to `(pid, port, fixed)` for the current process.
    pub(crate) fn resolve(self) -> (u32, u32, bool) {
        match self {
            IdentityRequest::Auto => (process_pid() & PID_MASK, 0, false),
            IdentityRequest::Port(port) => (process_pid() & PID_MASK, port, true),
            IdentityRequest::Process => (process_pid(), 0, true),
            IdentityRequest::Fixed(id) => (id, 0, true),
        }
    }
}
