use nlprims_marshal::{MessageError, Request, NLMSG_DONE, NLMSG_ERROR, NLM_F_DUMP, NLM_F_REQUEST};
use tracing::{debug, info};

use crate::cmd::{open_endpoint, DumpArgs};
use crate::exit::{endpoint_error, kernel_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: DumpArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = open_endpoint(args.protocol)?;
    endpoint
        .bind(0, None)
        .map_err(|err| endpoint_error("bind failed", err))?;

    let request = Request::new(args.msg_type, NLM_F_REQUEST | NLM_F_DUMP, rtgenmsg(args.family));
    let sequence = endpoint
        .send(&request)
        .map_err(|err| endpoint_error("send failed", err))?;
    debug!(sequence, msg_type = args.msg_type, "dump requested");

    let mut printed = 0usize;
    loop {
        let messages = endpoint
            .read()
            .map_err(|err| endpoint_error("receive failed", err))?;

        for message in &messages {
            let unreadable = matches!(message.error, Some(MessageError::Header(_)));
            if !unreadable && message.header.sequence != sequence {
                continue;
            }

            match message.msg_type() {
                NLMSG_DONE if !unreadable => {
                    info!(messages = printed, "dump complete");
                    return Ok(SUCCESS);
                }
                NLMSG_ERROR => match message.kernel_error() {
                    Some(err) => return Err(kernel_error("dump rejected", err)),
                    None => {
                        info!(messages = printed, "dump acknowledged");
                        return Ok(SUCCESS);
                    }
                },
                _ => {
                    print_message(message, format);
                    printed = printed.saturating_add(1);
                }
            }
        }
    }
}

/// `struct rtgenmsg`: the family byte padded to four bytes.
fn rtgenmsg(family: u8) -> Vec<u8> {
    vec![family, 0, 0, 0]
}
