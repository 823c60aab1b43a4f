//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::{ip, net, net4};
use holo_bgp_rib::af::Ipv4Unicast;
use holo_bgp_rib::config::RibCfg;
use holo_bgp_rib::error::Error;
use holo_bgp_rib::peer::{LOCAL_PEER_ID, PeerType};
use holo_bgp_rib::policy::PolicyDirection;
use holo_bgp_rib::table::RouteSink;
use holo_bgp_rib::table::filter::FilterTable;

use super::{Harness, attrs, peer, summary};

#[test]
fn test_flap_ordering() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    let genid = h.plumbing.ribin(1).unwrap().genid();

    h.announce(1, net!("20.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(
        summary(&h.egress_requests()),
        ["start 1", "add 1 20.0.0.0/8", "commit 1"]
    );

    // The old route is still being withdrawn in the background when the
    // new session announces it again.
    h.plumbing.peering_went_down(1).unwrap();
    assert_eq!(h.plumbing.get_prefix_count(1).unwrap(), 0);
    h.plumbing.peering_came_up(1).unwrap();
    assert_ne!(h.plumbing.ribin(1).unwrap().genid(), genid);
    h.announce(1, net!("20.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));
    h.run();

    assert_eq!(
        summary(&h.egress_requests()),
        [
            "start 2",
            "delete 2 20.0.0.0/8",
            "add 2 20.0.0.0/8",
            "commit 2",
        ]
    );
    assert_eq!(h.best(net!("20.0.0.0/8")), Some(1));
    assert_eq!(h.winners(net4!("20.0.0.0/8")), [1]);
}

#[test]
fn test_background_deletion() {
    let mut config = RibCfg::default();
    config.deletion_batch = 2;
    let mut h = Harness::new(config);
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);

    for prefix in [
        net!("20.1.0.0/16"),
        net!("20.2.0.0/16"),
        net!("20.3.0.0/16"),
        net!("20.4.0.0/16"),
        net!("20.5.0.0/16"),
    ] {
        h.plumbing
            .add_route(1, prefix, attrs(ip!("2.0.0.1"), &[65001]))
            .unwrap();
    }
    h.plumbing.push(1).unwrap();
    h.announce(2, net!("20.1.0.0/16"), attrs(ip!("2.0.0.2"), &[65002, 1]));
    assert_eq!(h.best(net!("20.1.0.0/16")), Some(1));

    h.plumbing.peering_went_down(1).unwrap();
    assert!(matches!(
        h.plumbing.peering_went_down(1),
        Err(Error::PeerDown(1))
    ));
    assert!(matches!(
        h.plumbing.add_route(1, net!("20.6.0.0/16"), Default::default()),
        Err(Error::PeerDown(1))
    ));

    // Old routes remain visible until the deletion stage reaches them.
    assert_eq!(h.best(net!("20.5.0.0/16")), Some(1));
    h.run();
    assert_eq!(h.best(net!("20.5.0.0/16")), None);
    assert_eq!(h.best(net!("20.1.0.0/16")), Some(2));
    assert_eq!(h.winners(net4!("20.1.0.0/16")), [2]);

    // The deletion stage is gone.
    let peer_tables = h.plumbing.peer_tables(1).unwrap();
    let next = h
        .plumbing
        .tables
        .get(peer_tables.ribin)
        .as_rib_in()
        .and_then(|ribin| ribin.next_table());
    assert_eq!(next, Some(peer_tables.damping));
}

#[test]
fn test_filter_version_drain() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    fn filter(h: &Harness) -> &FilterTable<Ipv4Unicast> {
        h.plumbing.filter(1, PolicyDirection::Import).unwrap()
    }
    assert_eq!(filter(&h).current_version(), 1);
    assert_eq!(filter(&h).version_count(), 1);

    h.announce(1, net!("30.1.0.0/16"), attrs(ip!("2.0.0.1"), &[65001]));
    h.announce(1, net!("30.2.0.0/16"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(filter(&h).ref_count(1), Some(2));

    // Routes of the current session stick to the version they started with.
    h.plumbing.reconfigure_filters(1).unwrap();
    assert_eq!(filter(&h).current_version(), 2);
    assert_eq!(filter(&h).version_count(), 2);
    h.announce(1, net!("30.3.0.0/16"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(filter(&h).ref_count(1), Some(3));
    assert_eq!(filter(&h).ref_count(2), Some(0));

    h.withdraw(1, net!("30.1.0.0/16"));
    assert_eq!(filter(&h).ref_count(1), Some(2));

    // The old version is released once its last route is gone.
    h.plumbing.peering_went_down(1).unwrap();
    h.run();
    assert_eq!(filter(&h).ref_count(1), None);
    assert_eq!(filter(&h).version_count(), 1);

    h.plumbing.peering_came_up(1).unwrap();
    h.announce(1, net!("30.1.0.0/16"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(filter(&h).ref_count(2), Some(1));
}

#[test]
fn test_delete_peering() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);
    h.announce(1, net!("40.1.0.0/16"), attrs(ip!("2.0.0.1"), &[65001]));
    h.announce(1, net!("40.2.0.0/16"), attrs(ip!("2.0.0.1"), &[65001]));
    h.egress_requests();

    h.plumbing.delete_peering(1).unwrap();
    assert_eq!(h.best(net!("40.1.0.0/16")), None);
    assert_eq!(h.best(net!("40.2.0.0/16")), None);
    assert!(h.plumbing.peer_tables(1).is_none());
    assert!(h.plumbing.fanout().peer_info(1).is_none());
    assert!(matches!(
        h.plumbing.get_prefix_count(1),
        Err(Error::PeerUnknown(1))
    ));
    assert_eq!(
        summary(&h.egress_requests()),
        [
            "start 3",
            "delete 3 40.1.0.0/16",
            "delete 3 40.2.0.0/16",
            "commit 3",
        ]
    );

    // Leftover follow-ups for the removed tables are ignored.
    h.run();

    // The peer can be added again.
    h.add_peer(1, PeerType::Ebgp);
    h.announce(1, net!("40.1.0.0/16"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(h.best(net!("40.1.0.0/16")), Some(1));
}

#[test]
fn test_stop_peering() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);
    h.announce(1, net!("50.1.0.0/16"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(h.plumbing.ribout(2).unwrap().queue_len(), 1);

    h.plumbing.stop_peering(2).unwrap();
    assert!(h.plumbing.ribout(2).is_none());
    assert!(matches!(
        h.plumbing.pull_updates(2, 10),
        Err(Error::PeerDown(2))
    ));

    // Routes learned from the peer are kept until the session goes down.
    h.announce(2, net!("50.2.0.0/16"), attrs(ip!("2.0.0.2"), &[65002]));
    assert_eq!(h.best(net!("50.2.0.0/16")), Some(2));
}

#[test]
fn test_peering_errors() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);

    assert!(matches!(
        h.plumbing.add_peering(peer(1, PeerType::Ebgp)),
        Err(Error::PeerDuplicate(1))
    ));
    assert!(matches!(
        h.plumbing.add_peering(peer(LOCAL_PEER_ID, PeerType::Ebgp)),
        Err(Error::PeerReserved(LOCAL_PEER_ID))
    ));
    assert!(matches!(
        h.plumbing.delete_peering(LOCAL_PEER_ID),
        Err(Error::PeerReserved(LOCAL_PEER_ID))
    ));
    assert!(matches!(
        h.plumbing.peering_went_down(7),
        Err(Error::PeerUnknown(7))
    ));
    assert!(matches!(
        h.plumbing.delete_route(1, net!("60.0.0.0/8")),
        Err(Error::PrefixUnknown(1, _))
    ));
    assert!(matches!(
        h.plumbing.add_route(1, net!("2001:db8::/32"), Default::default()),
        Err(Error::PrefixInvalid(_))
    ));

    // Coming up twice is harmless.
    h.plumbing.peering_came_up(1).unwrap();
    assert!(h.plumbing.ribin(1).unwrap().is_up());
}
