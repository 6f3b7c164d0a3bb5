use std::fmt;

/// A netlink socket address: the numeric endpoint identity plus the
/// multicast group mask.
///
/// The kernel itself is always `pid = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NetlinkAddr {
    pub pid: u32,
    pub groups: u32,
}

impl NetlinkAddr {
    /// The kernel endpoint, destination of every request.
    pub const KERNEL: NetlinkAddr = NetlinkAddr { pid: 0, groups: 0 };

    pub const fn new(pid: u32, groups: u32) -> Self {
        Self { pid, groups }
    }
}

impl fmt::Display for NetlinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid={} groups={:#x}", self.pid, self.groups)
    }
}

/// Netlink protocol family, the third argument of `socket(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Routing and link updates (`NETLINK_ROUTE`).
    Route,
    /// Kernel audit (`NETLINK_AUDIT`).
    Audit,
    /// IPsec (`NETLINK_XFRM`).
    Xfrm,
    /// Kernel object events (`NETLINK_KOBJECT_UEVENT`).
    KobjectUevent,
    /// Generic netlink (`NETLINK_GENERIC`).
    #[default]
    Generic,
    /// Any other protocol number.
    Other(i32),
}

impl Protocol {
    /// The numeric protocol passed to `socket(2)`.
    pub fn as_raw(self) -> i32 {
        match self {
            Protocol::Route => 0,
            Protocol::Xfrm => 6,
            Protocol::Audit => 9,
            Protocol::KobjectUevent => 15,
            Protocol::Generic => 16,
            Protocol::Other(n) => n,
        }
    }

    /// Map a raw protocol number back to a named variant when one exists.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Protocol::Route,
            6 => Protocol::Xfrm,
            9 => Protocol::Audit,
            15 => Protocol::KobjectUevent,
            16 => Protocol::Generic,
            n => Protocol::Other(n),
        }
    }

    /// Short lowercase name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Protocol::Route => "route",
            Protocol::Audit => "audit",
            Protocol::Xfrm => "xfrm",
            Protocol::KobjectUevent => "kobject-uevent",
            Protocol::Generic => "generic",
            Protocol::Other(_) => "other",
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "route" => Ok(Protocol::Route),
            "audit" => Ok(Protocol::Audit),
            "xfrm" => Ok(Protocol::Xfrm),
            "kobject-uevent" | "uevent" => Ok(Protocol::KobjectUevent),
            "generic" | "genl" => Ok(Protocol::Generic),
            other => other
                .parse::<i32>()
                .map(Protocol::from_raw)
                .map_err(|_| format!("unknown netlink protocol: {s}")),
        }
    }
}
