//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::{ip, net, net4};
use holo_bgp_rib::config::RibCfg;
use holo_bgp_rib::peer::PeerType;
use holo_bgp_rib::policy::PolicyCfg;
use holo_bgp_rib::route::AddRouteResult;

use super::{Harness, attrs, summary};

#[test]
fn test_add_delete() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);

    let result = h
        .plumbing
        .add_route(1, net!("1.0.1.0/24"), attrs(ip!("2.0.0.1"), &[65001]))
        .unwrap();
    assert_eq!(result, AddRouteResult::Used);
    h.plumbing.push(1).unwrap();
    assert_eq!(h.plumbing.get_prefix_count(1).unwrap(), 1);
    assert_eq!(h.best(net!("1.0.1.0/24")), Some(1));

    h.withdraw(1, net!("1.0.1.0/24"));
    assert_eq!(h.plumbing.get_prefix_count(1).unwrap(), 0);
    assert_eq!(h.best(net!("1.0.1.0/24")), None);

    assert_eq!(
        summary(&h.egress_requests()),
        [
            "start 1",
            "add 1 1.0.1.0/24",
            "commit 1",
            "start 2",
            "delete 2 1.0.1.0/24",
            "commit 2",
        ]
    );
}

#[test]
fn test_withdrawn_winner_replaced() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ibgp);
    h.add_peer(2, PeerType::Ibgp);

    let mut attrs_a = attrs(ip!("2.0.0.1"), &[65100]);
    attrs_a.base.local_pref = Some(200);
    let mut attrs_b = attrs(ip!("2.0.0.2"), &[65100]);
    attrs_b.base.local_pref = Some(100);

    h.announce(1, net!("10.0.0.0/8"), attrs_a);
    let result = h
        .plumbing
        .add_route(2, net!("10.0.0.0/8"), attrs_b)
        .unwrap();
    assert_eq!(result, AddRouteResult::Unused);
    h.plumbing.push(2).unwrap();
    assert_eq!(h.best(net!("10.0.0.0/8")), Some(1));
    assert_eq!(h.winners(net4!("10.0.0.0/8")), [1]);

    // The previous loser takes over.
    h.withdraw(1, net!("10.0.0.0/8"));
    assert_eq!(h.best(net!("10.0.0.0/8")), Some(2));
    assert_eq!(h.winners(net4!("10.0.0.0/8")), [2]);

    assert_eq!(
        summary(&h.egress_requests()),
        [
            "start 1",
            "add 1 10.0.0.0/8",
            "commit 1",
            "start 2",
            "delete 2 10.0.0.0/8",
            "add 2 10.0.0.0/8",
            "commit 2",
        ]
    );
}

#[test]
fn test_single_winner() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);
    h.add_peer(3, PeerType::Ibgp);
    let prefix = net!("172.16.0.0/12");
    let net = net4!("172.16.0.0/12");

    h.announce(1, prefix, attrs(ip!("2.0.0.1"), &[65001, 65100]));
    assert_eq!(h.winners(net), [1]);

    // Shorter AS path.
    h.announce(2, prefix, attrs(ip!("2.0.0.2"), &[65002]));
    assert_eq!(h.winners(net), [2]);

    // Higher local preference beats everything else.
    let mut attrs3 = attrs(ip!("2.0.0.3"), &[65100, 65200, 65300]);
    attrs3.base.local_pref = Some(300);
    h.announce(3, prefix, attrs3.clone());
    assert_eq!(h.winners(net), [3]);

    // The winner changes its mind.
    attrs3.base.local_pref = Some(50);
    h.announce(3, prefix, attrs3);
    assert_eq!(h.winners(net), [2]);

    h.withdraw(2, prefix);
    assert_eq!(h.winners(net), [1]);

    h.withdraw(1, prefix);
    assert_eq!(h.winners(net), [3]);

    h.withdraw(3, prefix);
    assert!(h.winners(net).is_empty());
    assert_eq!(h.best(prefix), None);
}

#[test]
fn test_idempotent_replace() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);
    let prefix = net!("1.0.2.0/24");
    let net = net4!("1.0.2.0/24");

    h.announce(1, prefix, attrs(ip!("2.0.0.1"), &[65001]));
    h.announce(2, prefix, attrs(ip!("2.0.0.2"), &[65002, 65100]));
    h.egress_requests();

    // Same content again, from the winner and from the loser.
    let result = h
        .plumbing
        .add_route(1, prefix, attrs(ip!("2.0.0.1"), &[65001]))
        .unwrap();
    assert_eq!(result, AddRouteResult::Used);
    let result = h
        .plumbing
        .add_route(2, prefix, attrs(ip!("2.0.0.2"), &[65002, 65100]))
        .unwrap();
    assert_eq!(result, AddRouteResult::Unused);
    h.plumbing.push(1).unwrap();
    h.plumbing.push(2).unwrap();

    assert_eq!(h.plumbing.get_prefix_count(1).unwrap(), 1);
    assert_eq!(h.plumbing.get_prefix_count(2).unwrap(), 1);
    assert_eq!(h.winners(net), [1]);
    assert!(h.egress_requests().is_empty());

    // Every stored route presented again to unchanged policies.
    h.plumbing.configure_policies(PolicyCfg::default()).unwrap();
    h.run();
    assert_eq!(h.plumbing.get_prefix_count(1).unwrap(), 1);
    assert_eq!(h.plumbing.get_prefix_count(2).unwrap(), 1);
    assert_eq!(h.winners(net), [1]);
}

#[test]
fn test_unresolvable_nexthop() {
    let mut h = Harness::without_igp(RibCfg::default());
    h.add_peer(1, PeerType::Ibgp);
    let prefix = net!("1.0.3.0/24");

    let result = h
        .plumbing
        .add_route(1, prefix, attrs(ip!("3.0.0.1"), &[65100]))
        .unwrap();
    assert_eq!(result, AddRouteResult::Unused);
    h.plumbing.push(1).unwrap();
    assert_eq!(h.best(prefix), None);

    // The next hop becomes reachable.
    h.plumbing.igp_route_update(net!("3.0.0.0/8"), 10).unwrap();
    h.run();
    assert_eq!(h.best(prefix), Some(1));

    // And unreachable again.
    h.plumbing.igp_route_delete(net!("3.0.0.0/8")).unwrap();
    h.run();
    assert_eq!(h.best(prefix), None);
    assert!(h.winners(net4!("1.0.3.0/24")).is_empty());

    assert_eq!(
        summary(&h.egress_requests()),
        [
            "start 1",
            "add 1 1.0.3.0/24",
            "commit 1",
            "start 2",
            "delete 2 1.0.3.0/24",
            "commit 2",
        ]
    );
}

#[test]
fn test_igp_distance() {
    let mut h = Harness::without_igp(RibCfg::default());
    h.add_peer(1, PeerType::Ibgp);
    h.add_peer(2, PeerType::Ibgp);
    let prefix = net!("1.0.4.0/24");
    h.plumbing.igp_route_update(net!("3.0.0.0/8"), 20).unwrap();
    h.plumbing.igp_route_update(net!("4.0.0.0/8"), 10).unwrap();

    h.announce(1, prefix, attrs(ip!("3.0.0.1"), &[65100]));
    h.announce(2, prefix, attrs(ip!("4.0.0.1"), &[65100]));
    assert_eq!(h.best(prefix), Some(2));

    h.plumbing.igp_route_update(net!("3.0.0.0/8"), 5).unwrap();
    h.run();
    assert_eq!(h.best(prefix), Some(1));
    assert_eq!(h.winners(net4!("1.0.4.0/24")), [1]);
}
