use clap::{Args, Subcommand};
use nlprims_marshal::mtypes::{NLMSG_NOOP, RTM_GETNEIGH};
use nlprims_marshal::type_name;
use nlprims_transport::Protocol;

#[cfg(target_os = "linux")]
use nlprims_endpoint::Endpoint;
#[cfg(target_os = "linux")]
use nlprims_transport::NetlinkSocket;

#[cfg(target_os = "linux")]
use crate::decoders::route_policy;
#[cfg(target_os = "linux")]
use crate::exit::endpoint_error;
use crate::exit::CliResult;
#[cfg(not(target_os = "linux"))]
use crate::exit::{CliError, USAGE};
use crate::output::OutputFormat;

#[cfg(target_os = "linux")]
pub mod dump;
#[cfg(target_os = "linux")]
pub mod listen;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bind to multicast groups and print received messages.
    Listen(ListenArgs),
    /// Send a dump request and print the replies.
    Dump(DumpArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        #[cfg(target_os = "linux")]
        Command::Listen(args) => listen::run(args, format),
        #[cfg(target_os = "linux")]
        Command::Dump(args) => dump::run(args, format),
        #[cfg(not(target_os = "linux"))]
        Command::Listen(_) | Command::Dump(_) => {
            let _ = format;
            Err(CliError::new(USAGE, "netlink sockets require Linux"))
        }
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Netlink protocol (name or number).
    #[arg(long, default_value = "route")]
    pub protocol: Protocol,
    /// Multicast group mask (decimal or 0x-prefixed hex).
    #[arg(long, default_value = "0", value_parser = parse_mask)]
    pub groups: u32,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Netlink protocol (name or number).
    #[arg(long, default_value = "route")]
    pub protocol: Protocol,
    /// Request message type (number or name such as RTM_GETLINK).
    #[arg(long = "type", value_name = "TYPE", value_parser = parse_msg_type)]
    pub msg_type: u16,
    /// Address family byte of the request body.
    #[arg(long, default_value = "0")]
    pub family: u8,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[cfg(target_os = "linux")]
/// Open an endpoint with the rtnetlink decoders registered for route sockets.
fn open_endpoint(protocol: Protocol) -> CliResult<Endpoint<NetlinkSocket>> {
    let endpoint = Endpoint::open(protocol).map_err(|err| endpoint_error("open failed", err))?;
    if protocol == Protocol::Route {
        endpoint.register_policy(route_policy());
    }
    Ok(endpoint)
}

fn parse_mask(raw: &str) -> Result<u32, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|err| format!("invalid group mask {raw:?}: {err}"))
}

fn parse_msg_type(raw: &str) -> Result<u16, String> {
    if let Ok(value) = raw.parse::<u16>() {
        return Ok(value);
    }
    (NLMSG_NOOP..=RTM_GETNEIGH)
        .filter(|&t| !matches!(type_name(t), "UNKNOWN" | "RESERVED"))
        .find(|&t| {
            let name = type_name(t);
            name.eq_ignore_ascii_case(raw)
                || name
                    .strip_prefix("RTM_")
                    .is_some_and(|short| short.eq_ignore_ascii_case(raw))
        })
        .ok_or_else(|| format!("unknown message type: {raw}"))
}
