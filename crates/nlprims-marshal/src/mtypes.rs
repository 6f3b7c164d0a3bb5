//! Message type and flag constants.
//!
//! Types below 16 are reserved for netlink control messages. The `RTM_*`
//! types are the rtnetlink link/address/route/neighbour families that carry
//! an event-class tag after decoding.

/// No-op, ignored by receivers.
pub const NLMSG_NOOP: u16 = 1;

/// In-band error frame (also used for acknowledgements, with code 0).
pub const NLMSG_ERROR: u16 = 2;

/// End of a multipart dump.
pub const NLMSG_DONE: u16 = 3;

/// Data lost.
pub const NLMSG_OVERRUN: u16 = 4;

/// First type available to protocol families.
pub const NLMSG_MIN_TYPE: u16 = 16;

pub const RTM_NEWLINK: u16 = 16;
pub const RTM_DELLINK: u16 = 17;
pub const RTM_GETLINK: u16 = 18;
pub const RTM_SETLINK: u16 = 19;
pub const RTM_NEWADDR: u16 = 20;
pub const RTM_DELADDR: u16 = 21;
pub const RTM_GETADDR: u16 = 22;
pub const RTM_NEWROUTE: u16 = 24;
pub const RTM_DELROUTE: u16 = 25;
pub const RTM_GETROUTE: u16 = 26;
pub const RTM_NEWNEIGH: u16 = 28;
pub const RTM_DELNEIGH: u16 = 29;
pub const RTM_GETNEIGH: u16 = 30;

/// Request message.
pub const NLM_F_REQUEST: u16 = 0x1;
/// Part of a multipart message terminated by `NLMSG_DONE`.
pub const NLM_F_MULTI: u16 = 0x2;
/// Ask for an acknowledgement.
pub const NLM_F_ACK: u16 = 0x4;
/// Echo this request back.
pub const NLM_F_ECHO: u16 = 0x8;
/// Return the complete table.
pub const NLM_F_ROOT: u16 = 0x100;
/// Return all matching entries.
pub const NLM_F_MATCH: u16 = 0x200;
/// `NLM_F_ROOT | NLM_F_MATCH`.
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

/// Returns a human-readable name for a message type.
pub fn type_name(msg_type: u16) -> &'static str {
    match msg_type {
        NLMSG_NOOP => "NLMSG_NOOP",
        NLMSG_ERROR => "NLMSG_ERROR",
        NLMSG_DONE => "NLMSG_DONE",
        NLMSG_OVERRUN => "NLMSG_OVERRUN",
        RTM_NEWLINK => "RTM_NEWLINK",
        RTM_DELLINK => "RTM_DELLINK",
        RTM_GETLINK => "RTM_GETLINK",
        RTM_SETLINK => "RTM_SETLINK",
        RTM_NEWADDR => "RTM_NEWADDR",
        RTM_DELADDR => "RTM_DELADDR",
        RTM_GETADDR => "RTM_GETADDR",
        RTM_NEWROUTE => "RTM_NEWROUTE",
        RTM_DELROUTE => "RTM_DELROUTE",
        RTM_GETROUTE => "RTM_GETROUTE",
        RTM_NEWNEIGH => "RTM_NEWNEIGH",
        RTM_DELNEIGH => "RTM_DELNEIGH",
        RTM_GETNEIGH => "RTM_GETNEIGH",
        0..=15 => "RESERVED",
        _ => "UNKNOWN",
    }
}

/// Event-class tag for link/address/route/neighbour notifications.
///
/// Returns `None` for every other type.
pub fn event_name(msg_type: u16) -> Option<&'static str> {
    match msg_type {
        RTM_NEWLINK | RTM_DELLINK | RTM_NEWADDR | RTM_DELADDR | RTM_NEWROUTE
        | RTM_DELROUTE | RTM_NEWNEIGH | RTM_DELNEIGH => Some(type_name(msg_type)),
        _ => None,
    }
}

/// Returns true for the netlink control types (`NLMSG_*`).
pub fn is_control(msg_type: u16) -> bool {
    msg_type < NLMSG_MIN_TYPE
}
