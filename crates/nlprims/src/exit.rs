use std::fmt;
use std::io;

use nlprims_endpoint::EndpointError;
use nlprims_marshal::{KernelError, MarshalError};
use nlprims_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        io::ErrorKind::InvalidInput => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open(source)
        | TransportError::Bind { source, .. }
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Shutdown => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn marshal_error(context: &str, err: MarshalError) -> CliError {
    match err {
        MarshalError::MessageTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        MarshalError::UnknownPolicy(_) => CliError::new(USAGE, format!("{context}: {err}")),
    }
}

pub fn kernel_error(context: &str, err: &KernelError) -> CliError {
    io_error(context, err.as_io_error())
}

pub fn endpoint_error(context: &str, err: EndpointError) -> CliError {
    match err {
        EndpointError::Transport(err) => transport_error(context, err),
        EndpointError::Marshal(err) => marshal_error(context, err),
        EndpointError::Pool(_) | EndpointError::AddressInUse { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        EndpointError::AlreadyBound(_) | EndpointError::PortOutOfRange { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        EndpointError::Closed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}
