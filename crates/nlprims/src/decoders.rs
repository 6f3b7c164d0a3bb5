//! Fixed-header decoders for the rtnetlink families the CLI prints.
//!
//! Only the leading struct of each message is decoded; the attributes that
//! follow stay in the raw body.

use std::sync::Arc;

use nlprims_marshal::mtypes::{
    RTM_DELADDR, RTM_DELLINK, RTM_DELNEIGH, RTM_DELROUTE, RTM_NEWADDR, RTM_NEWLINK, RTM_NEWNEIGH,
    RTM_NEWROUTE,
};
use nlprims_marshal::{DecodeError, Decoder, Header, PayloadReader};

/// `struct ifinfomsg`.
pub struct LinkDecoder;

impl Decoder for LinkDecoder {
    fn name(&self) -> &'static str {
        "ifinfomsg"
    }

    fn decode_payload(&self, _header: &Header, r: &mut PayloadReader<'_>) -> Result<(), DecodeError> {
        r.u8("family")?;
        r.skip(1)?;
        r.u16("device_type")?;
        r.i32("index")?;
        r.u32("flags")?;
        r.u32("change")?;
        Ok(())
    }
}

/// `struct ifaddrmsg`.
pub struct AddrDecoder;

impl Decoder for AddrDecoder {
    fn name(&self) -> &'static str {
        "ifaddrmsg"
    }

    fn decode_payload(&self, _header: &Header, r: &mut PayloadReader<'_>) -> Result<(), DecodeError> {
        r.u8("family")?;
        r.u8("prefix_len")?;
        r.u8("flags")?;
        r.u8("scope")?;
        r.u32("index")?;
        Ok(())
    }
}

/// `struct rtmsg`.
pub struct RouteDecoder;

impl Decoder for RouteDecoder {
    fn name(&self) -> &'static str {
        "rtmsg"
    }

    fn decode_payload(&self, _header: &Header, r: &mut PayloadReader<'_>) -> Result<(), DecodeError> {
        r.u8("family")?;
        r.u8("dst_len")?;
        r.u8("src_len")?;
        r.u8("tos")?;
        r.u8("table")?;
        r.u8("protocol")?;
        r.u8("scope")?;
        r.u8("route_type")?;
        r.u32("flags")?;
        Ok(())
    }
}

/// `struct ndmsg`.
pub struct NeighDecoder;

impl Decoder for NeighDecoder {
    fn name(&self) -> &'static str {
        "ndmsg"
    }

    fn decode_payload(&self, _header: &Header, r: &mut PayloadReader<'_>) -> Result<(), DecodeError> {
        r.u8("family")?;
        r.skip(3)?;
        r.i32("index")?;
        r.u16("state")?;
        r.u8("flags")?;
        r.u8("neigh_type")?;
        Ok(())
    }
}

/// Decode policy for `NETLINK_ROUTE` notifications and dump replies.
pub fn route_policy() -> Vec<(u16, Arc<dyn Decoder>)> {
    let link: Arc<dyn Decoder> = Arc::new(LinkDecoder);
    let addr: Arc<dyn Decoder> = Arc::new(AddrDecoder);
    let route: Arc<dyn Decoder> = Arc::new(RouteDecoder);
    let neigh: Arc<dyn Decoder> = Arc::new(NeighDecoder);
    vec![
        (RTM_NEWLINK, Arc::clone(&link)),
        (RTM_DELLINK, link),
        (RTM_NEWADDR, Arc::clone(&addr)),
        (RTM_DELADDR, addr),
        (RTM_NEWROUTE, Arc::clone(&route)),
        (RTM_DELROUTE, route),
        (RTM_NEWNEIGH, Arc::clone(&neigh)),
        (RTM_DELNEIGH, neigh),
    ]
}
