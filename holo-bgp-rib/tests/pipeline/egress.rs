//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::{ip, net};
use holo_bgp_rib::config::RibCfg;
use holo_bgp_rib::error::{Error, RibCommandError};
use holo_bgp_rib::peer::PeerType;
use holo_bgp_rib::policy::PolicyCfg;
use holo_bgp_rib::tasks::messages::input::RibReplyMsg;
use holo_bgp_rib::tasks::messages::output::RibRequest;
use holo_utils::bgp::AfiSafi;

use super::{Harness, attrs, summary};

fn reply(seq: u64, result: Result<(), RibCommandError>) -> RibReplyMsg {
    RibReplyMsg {
        afi_safi: AfiSafi::Ipv4Unicast,
        seq,
        result,
    }
}

#[test]
fn test_route_fields() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ibgp);

    let mut ebgp_attrs = attrs(ip!("2.0.0.1"), &[65001]);
    ebgp_attrs.base.med = Some(5);
    h.announce(1, net!("40.0.0.0/8"), ebgp_attrs);
    h.announce(2, net!("41.0.0.0/8"), attrs(ip!("10.0.0.2"), &[]));

    let requests = h.egress_requests();
    assert_eq!(
        summary(&requests),
        [
            "start 1",
            "add 1 40.0.0.0/8",
            "commit 1",
            "start 2",
            "add 2 41.0.0.0/8",
            "commit 2",
        ]
    );

    let RibRequest::AddRoute { route, .. } = &requests[1] else {
        panic!("unexpected request: {:?}", requests[1]);
    };
    assert_eq!(route.ribname, "ebgp");
    assert_eq!(route.cookie, "ebgp");
    assert_eq!(route.protocol_origin, "bgp");
    assert_eq!(route.distance, 20);
    assert_eq!(route.metric, 5);
    assert_eq!(route.nexthop, Some(ip!("2.0.0.1")));
    assert_eq!(route.ifname, None);

    let RibRequest::AddRoute { route, .. } = &requests[4] else {
        panic!("unexpected request: {:?}", requests[4]);
    };
    assert_eq!(route.ribname, "ibgp");
    assert_eq!(route.distance, 200);
    assert_eq!(route.metric, 0);
}

#[test]
fn test_batched_transaction() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);

    for prefix in [net!("40.0.0.0/8"), net!("41.0.0.0/8")] {
        h.plumbing
            .add_route(1, prefix, attrs(ip!("2.0.0.1"), &[65001]))
            .unwrap();
    }
    assert!(h.egress_recv().is_empty());
    h.plumbing.push(1).unwrap();

    assert_eq!(
        summary(&h.egress_requests()),
        ["start 1", "add 1 40.0.0.0/8", "add 1 41.0.0.0/8", "commit 1"]
    );
}

#[test]
fn test_window() {
    let mut config = RibCfg::default();
    config.egress_window = 2;
    let mut h = Harness::new(config);
    h.add_peer(1, PeerType::Ebgp);

    for prefix in [
        net!("40.0.0.0/8"),
        net!("41.0.0.0/8"),
        net!("42.0.0.0/8"),
    ] {
        h.plumbing
            .add_route(1, prefix, attrs(ip!("2.0.0.1"), &[65001]))
            .unwrap();
    }
    h.plumbing.push(1).unwrap();
    assert_eq!(h.plumbing.egress().in_flight_len(), 2);
    assert_eq!(h.plumbing.egress().pending_len(), 3);

    let msgs = h.egress_recv();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].seq, 1);
    assert_eq!(msgs[1].seq, 2);

    // Each completion opens room for one more request.
    h.ack(msgs[1].seq);
    assert_eq!(h.plumbing.egress().in_flight_len(), 2);
    assert_eq!(h.plumbing.egress().pending_len(), 2);
    h.ack(msgs[0].seq);

    let requests = h.egress_requests();
    assert_eq!(
        summary(&requests),
        ["add 1 41.0.0.0/8", "add 1 42.0.0.0/8", "commit 1"]
    );
    assert_eq!(h.plumbing.egress().in_flight_len(), 0);
    assert_eq!(h.plumbing.egress().pending_len(), 0);
}

#[test]
fn test_unknown_command() {
    let mut h = Harness::new(RibCfg::default());
    assert!(matches!(
        h.plumbing.rib_command_done(reply(99, Ok(()))),
        Err(Error::RibCommandUnknown(99))
    ));
    assert!(h.plumbing.status().is_ok());
}

#[test]
fn test_backlog() {
    let mut h =
        Harness::with_policies(RibCfg::default(), PolicyCfg::default(), 1);
    h.plumbing.igp_route_update(net!("0.0.0.0/0"), 10).unwrap();
    h.add_peer(1, PeerType::Ebgp);

    h.announce(1, net!("40.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(h.plumbing.egress().in_flight_len(), 1);
    assert_eq!(h.plumbing.egress().pending_len(), 2);

    // The backlog is resumed by completions.
    assert_eq!(
        summary(&h.egress_requests()),
        ["start 1", "add 1 40.0.0.0/8", "commit 1"]
    );
    assert!(h.plumbing.status().is_ok());
}

#[test]
fn test_rejected_command() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.announce(1, net!("40.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));

    let msgs = h.egress_recv();
    assert_eq!(msgs.len(), 3);
    let result = Err(RibCommandError::Rejected("no route".to_owned()));
    h.plumbing.rib_command_done(reply(msgs[1].seq, result)).unwrap();
    h.plumbing
        .rib_command_done(reply(msgs[0].seq, Err(RibCommandError::Timeout)))
        .unwrap();
    h.ack(msgs[2].seq);

    assert!(h.plumbing.status().is_ok());
    assert_eq!(h.plumbing.egress().in_flight_len(), 0);
}

#[test]
fn test_endpoint_gone() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    drop(h.egress_rx);

    h.plumbing
        .add_route(1, net!("40.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]))
        .unwrap();
    h.plumbing.push(1).unwrap();

    assert!(matches!(h.plumbing.status(), Err(Error::RibEndpointGone)));
}

#[test]
fn test_endpoint_gone_reply() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.announce(1, net!("40.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));

    let msgs = h.egress_recv();
    let result = Err(RibCommandError::EndpointGone);
    h.plumbing.rib_command_done(reply(msgs[0].seq, result)).unwrap();

    assert!(matches!(
        h.plumbing.status(),
        Err(Error::RibCommand(_, RibCommandError::EndpointGone))
    ));
}
