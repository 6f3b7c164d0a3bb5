use std::sync::Arc;

use nlprims_endpoint::{Endpoint, EndpointError};
use nlprims_transport::NetlinkSocket;
use tracing::info;

use crate::cmd::{open_endpoint, ListenArgs};
use crate::exit::{endpoint_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = Arc::new(open_endpoint(args.protocol)?);
    let address = endpoint
        .bind(args.groups, None)
        .map_err(|err| endpoint_error("bind failed", err))?;
    info!(
        protocol = args.protocol.name(),
        address = format_args!("{address:#x}"),
        groups = format_args!("{:#x}", args.groups),
        "listening"
    );

    install_ctrlc_handler(Arc::clone(&endpoint))?;

    if args.count == Some(0) {
        return Ok(SUCCESS);
    }

    let mut printed = 0usize;
    loop {
        let messages = match endpoint.read() {
            Ok(messages) => messages,
            Err(EndpointError::Closed) => return Ok(SUCCESS),
            Err(err) => return Err(endpoint_error("receive failed", err)),
        };

        for message in &messages {
            print_message(message, format);
            printed = printed.saturating_add(1);

            if args.count.is_some_and(|count| printed >= count) {
                endpoint.close();
                return Ok(SUCCESS);
            }
        }
    }
}

/// Ctrl-C closes the endpoint, which wakes the blocked read.
fn install_ctrlc_handler(endpoint: Arc<Endpoint<NetlinkSocket>>) -> CliResult<()> {
    ctrlc::set_handler(move || endpoint.close())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
