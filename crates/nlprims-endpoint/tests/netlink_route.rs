//! Round trips against the running kernel over `NETLINK_ROUTE`.
//!
//! Sandboxes without netlink support make `open` or `bind` fail; the tests
//! then return early instead of failing.

#![cfg(target_os = "linux")]

use std::sync::Arc;
use std::time::Duration;

use nlprims_endpoint::{
    AddrPool, Endpoint, EndpointConfig, EndpointError, Phase, PID_BITS,
};
use nlprims_marshal::{Request, NLMSG_DONE, NLMSG_ERROR, NLM_F_DUMP, NLM_F_REQUEST};
use nlprims_transport::{NetlinkSocket, Protocol};

const RTM_GETLINK: u16 = 18;
const RTM_NEWLINK: u16 = 16;

fn route_endpoint(pool: &Arc<AddrPool>) -> Option<Endpoint<NetlinkSocket>> {
    let config = EndpointConfig {
        protocol: Protocol::Route,
        ..EndpointConfig::default()
    };
    let endpoint = match Endpoint::open_with_pool(config, Arc::clone(pool)) {
        Ok(endpoint) => endpoint,
        Err(err) => {
            eprintln!("skipping: netlink unavailable: {err}");
            return None;
        }
    };
    if let Err(err) = endpoint.bind(0, None) {
        eprintln!("skipping: bind failed: {err}");
        return None;
    }
    Some(endpoint)
}

#[test]
fn link_dump_yields_tagged_messages_and_done() {
    let pool = Arc::new(AddrPool::default());
    let Some(endpoint) = route_endpoint(&pool) else {
        return;
    };

    let request = Request::new(RTM_GETLINK, NLM_F_REQUEST | NLM_F_DUMP, vec![0u8; 4]);
    let sequence = endpoint.send(&request).expect("send dump request");

    let mut links = 0usize;
    let mut done = false;
    for _ in 0..256 {
        for message in endpoint.read().expect("read dump reply") {
            assert_eq!(message.header.sequence, sequence);
            match message.msg_type() {
                RTM_NEWLINK => {
                    assert!(message.error.is_none());
                    assert_eq!(message.event, Some("RTM_NEWLINK"));
                    links += 1;
                }
                NLMSG_DONE => done = true,
                NLMSG_ERROR => panic!("kernel rejected dump: {:?}", message.error),
                _ => {}
            }
        }
        if done {
            break;
        }
    }

    assert!(done, "dump did not terminate");
    assert!(links >= 1, "expected at least the loopback link");
}

#[test]
fn endpoints_sharing_a_pool_bind_distinct_ports() {
    let pool = Arc::new(AddrPool::default());
    let Some(first) = route_endpoint(&pool) else {
        return;
    };
    let Some(second) = route_endpoint(&pool) else {
        return;
    };

    let a = first.address().expect("first bound");
    let b = second.address().expect("second bound");
    assert_ne!(a, b);
    assert_eq!(first.socket().local_addr().expect("getsockname").pid, a);
    assert_eq!(a >> PID_BITS, first.port());

    first.close();
    second.close();
    assert_eq!(pool.allocated_count(), 0);
}

#[test]
fn close_unblocks_a_pending_read() {
    let pool = Arc::new(AddrPool::default());
    let Some(endpoint) = route_endpoint(&pool) else {
        return;
    };
    let endpoint = Arc::new(endpoint);

    let reader = {
        let endpoint = Arc::clone(&endpoint);
        std::thread::spawn(move || endpoint.read())
    };

    std::thread::sleep(Duration::from_millis(100));
    endpoint.close();

    let result = reader.join().expect("reader thread");
    assert!(matches!(result, Err(EndpointError::Closed)));
    assert_eq!(endpoint.phase(), Phase::Closed);
    assert_eq!(pool.allocated_count(), 0);
}
