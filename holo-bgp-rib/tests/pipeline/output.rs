//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::{ip, net};
use holo_bgp_rib::config::RibCfg;
use holo_bgp_rib::error::Error;
use holo_bgp_rib::peer::{LOCAL_PEER_ID, PeerType};
use holo_bgp_rib::table::ribout::RouteUpdate;
use holo_bgp_rib::tasks::messages::output::SessionMsg;
use holo_utils::bgp::AfiSafi;
use ipnetwork::IpNetwork;

use super::{Harness, attrs};

fn prefixes(updates: &[RouteUpdate]) -> Vec<IpNetwork> {
    updates.iter().map(RouteUpdate::prefix).collect()
}

fn wakeups(h: &mut Harness) -> Vec<u32> {
    let mut peer_ids = vec![];
    while let Ok(msg) = h.session_rx.try_recv() {
        let SessionMsg::Wakeup { afi_safi, peer_id } = msg;
        assert_eq!(afi_safi, AfiSafi::Ipv4Unicast);
        peer_ids.push(peer_id);
    }
    peer_ids
}

#[test]
fn test_pull_updates() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);

    h.announce(1, net!("50.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));
    h.announce(1, net!("51.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));

    // A single wakeup until the queue is drained.
    assert_eq!(wakeups(&mut h), [2]);
    assert_eq!(h.plumbing.ribout(2).unwrap().queue_len(), 2);

    let updates = h.plumbing.pull_updates(2, 1).unwrap();
    assert_eq!(prefixes(&updates), [net!("50.0.0.0/8")]);
    let RouteUpdate::Announce { attrs, .. } = &updates[0] else {
        panic!("unexpected update: {:?}", updates[0]);
    };
    let attrs = &attrs.value.base;
    assert_eq!(attrs.as_path.iter().collect::<Vec<_>>(), [65000, 65001]);
    assert_eq!(attrs.nexthop, Some(ip!("192.0.2.254")));
    assert_eq!(attrs.local_pref, None);

    let updates = h.plumbing.pull_updates(2, 10).unwrap();
    assert_eq!(prefixes(&updates), [net!("51.0.0.0/8")]);
    assert!(h.plumbing.pull_updates(2, 10).unwrap().is_empty());
    assert!(h.plumbing.pull_updates(1, 10).unwrap().is_empty());

    h.withdraw(1, net!("50.0.0.0/8"));
    assert_eq!(wakeups(&mut h), [2]);
    assert_eq!(
        h.plumbing.pull_updates(2, 10).unwrap(),
        [RouteUpdate::Withdraw {
            prefix: net!("50.0.0.0/8")
        }]
    );
}

#[test]
fn test_pull_errors() {
    let mut h = Harness::new(RibCfg::default());
    assert!(matches!(
        h.plumbing.pull_updates(LOCAL_PEER_ID, 10),
        Err(Error::PeerReserved(LOCAL_PEER_ID))
    ));
    assert!(matches!(
        h.plumbing.pull_updates(9, 10),
        Err(Error::PeerUnknown(9))
    ));
}

#[test]
fn test_ibgp_split_horizon() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ibgp);
    h.add_peer(2, PeerType::Ibgp);
    h.add_peer(3, PeerType::Ebgp);

    let mut attrs = attrs(ip!("10.0.0.1"), &[]);
    attrs.base.local_pref = Some(150);
    h.announce(1, net!("50.0.0.0/8"), attrs);

    assert_eq!(wakeups(&mut h), [3]);
    assert!(h.plumbing.pull_updates(2, 10).unwrap().is_empty());
    let updates = h.plumbing.pull_updates(3, 10).unwrap();
    let RouteUpdate::Announce { attrs, .. } = &updates[0] else {
        panic!("unexpected update: {:?}", updates[0]);
    };
    assert_eq!(attrs.value.base.as_path.iter().collect::<Vec<_>>(), [65000]);
    assert_eq!(attrs.value.base.local_pref, None);
}

#[test]
fn test_coalescing() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);

    h.announce(1, net!("50.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(h.plumbing.pull_updates(2, 10).unwrap().len(), 1);

    // Only the last change of a batch is sent.
    h.plumbing
        .add_route(1, net!("50.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001, 1]))
        .unwrap();
    h.plumbing.delete_route(1, net!("50.0.0.0/8")).unwrap();
    assert_eq!(h.plumbing.ribout(2).unwrap().pending_len(), 1);
    assert_eq!(h.plumbing.ribout(2).unwrap().queue_len(), 0);
    h.plumbing.push(1).unwrap();

    assert_eq!(
        h.plumbing.pull_updates(2, 10).unwrap(),
        [RouteUpdate::Withdraw {
            prefix: net!("50.0.0.0/8")
        }]
    );
}

#[test]
fn test_flow_control() {
    let mut config = RibCfg::default();
    config.ribout_limit = 2;
    let mut h = Harness::new(config);
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);

    let announced = [
        net!("50.0.0.0/8"),
        net!("51.0.0.0/8"),
        net!("52.0.0.0/8"),
        net!("53.0.0.0/8"),
        net!("54.0.0.0/8"),
    ];
    for prefix in announced {
        h.announce(1, prefix, attrs(ip!("2.0.0.1"), &[65001]));
    }

    // Delivery stops while the peer's queue is full.
    let ribout = h.plumbing.ribout(2).unwrap();
    assert_eq!(ribout.queue_len(), 2);
    assert!(ribout.is_busy(&h.plumbing.tables.config));
    assert!(h.plumbing.fanout().lag(2).unwrap() > 0);
    assert_eq!(h.plumbing.fanout().lag(1), Some(0));
    assert!(h.plumbing.fanout().queue_len() > 0);

    // Pulling resumes it.
    let mut updates = vec![];
    loop {
        let chunk = h.plumbing.pull_updates(2, 10).unwrap();
        if chunk.is_empty() {
            break;
        }
        assert!(chunk.len() <= 2);
        updates.extend(chunk);
    }
    assert_eq!(prefixes(&updates), announced);
    assert_eq!(h.plumbing.fanout().lag(2), Some(0));
    assert_eq!(h.plumbing.fanout().queue_len(), 0);
}

#[test]
fn test_flush() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);

    h.announce(1, net!("50.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(wakeups(&mut h), [2]);
    h.plumbing.flush(2).unwrap();
    assert_eq!(h.plumbing.ribout(2).unwrap().queue_len(), 0);
    assert!(h.plumbing.pull_updates(2, 10).unwrap().is_empty());

    h.announce(1, net!("51.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(wakeups(&mut h), [2]);
    let updates = h.plumbing.pull_updates(2, 10).unwrap();
    assert_eq!(prefixes(&updates), [net!("51.0.0.0/8")]);
}
