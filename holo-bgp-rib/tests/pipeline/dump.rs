//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use const_addrs::{ip, net, net4};
use holo_bgp_rib::af::Ipv4Unicast;
use holo_bgp_rib::config::RibCfg;
use holo_bgp_rib::error::Error;
use holo_bgp_rib::peer::PeerType;
use holo_bgp_rib::table::dump::{DumpIterator, DumpStatus};
use holo_bgp_rib::table::ribout::RouteUpdate;
use holo_bgp_rib::tasks::messages::input::PipelineMsg;
use ipnetwork::{IpNetwork, Ipv4Network};

use super::{Harness, attrs};

fn prefix(third: u8) -> IpNetwork {
    let net = Ipv4Network::new(Ipv4Addr::new(30, 0, third, 0), 24).unwrap();
    IpNetwork::V4(net)
}

// Two peers with partially overlapping prefixes. Peer 1 wins all the
// prefixes it announces.
fn populate(h: &mut Harness) {
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);
    for third in 0..6 {
        h.plumbing
            .add_route(1, prefix(third), attrs(ip!("2.0.0.1"), &[65001]))
            .unwrap();
    }
    h.plumbing.push(1).unwrap();
    for third in 3..9 {
        h.plumbing
            .add_route(
                2,
                prefix(third),
                attrs(ip!("2.0.0.2"), &[65002, 65100]),
            )
            .unwrap();
    }
    h.plumbing.push(2).unwrap();
}

// Drains the RibOut of a peer, returning all announced prefixes in order.
fn pull_announced(h: &mut Harness, peer_id: u32) -> Vec<IpNetwork> {
    let mut announced = vec![];
    loop {
        h.run();
        let updates = h.plumbing.pull_updates(peer_id, 4).unwrap();
        if updates.is_empty() && h.sched_rx.is_empty() {
            return announced;
        }
        for update in updates {
            match update {
                RouteUpdate::Announce { prefix, .. } => announced.push(prefix),
                RouteUpdate::Withdraw { prefix } => {
                    announced.retain(|announced| *announced != prefix)
                }
            }
        }
    }
}

#[test]
fn test_dump_new_peer() {
    let mut config = RibCfg::default();
    config.dump_batch = 2;
    let mut h = Harness::new(config);
    populate(&mut h);

    h.add_peer(3, PeerType::Ebgp);
    let head = h.plumbing.fanout().peer_info(3).unwrap().head;
    assert!(h.plumbing.tables.get(head).as_dump().is_some());

    let announced = pull_announced(&mut h, 3);
    let expected = (0..9).map(prefix).collect::<Vec<_>>();
    assert_eq!(announced, expected);

    // The output branch is handed back to the fanout.
    let output = h.plumbing.peer_tables(3).unwrap().output.as_ref().unwrap();
    let head = h.plumbing.fanout().peer_info(3).unwrap().head;
    assert_eq!(head, output.policy);

    // Later changes go straight through.
    h.announce(2, prefix(9), attrs(ip!("2.0.0.2"), &[65002]));
    assert_eq!(pull_announced(&mut h, 3), [prefix(9)]);
}

#[test]
fn test_dump_with_churn() {
    let mut config = RibCfg::default();
    config.dump_batch = 2;
    let mut h = Harness::new(config);
    populate(&mut h);

    h.add_peer(3, PeerType::Ebgp);

    // Changes ahead of the walk are left to the walk itself.
    h.announce(1, prefix(9), attrs(ip!("2.0.0.1"), &[65001]));
    h.withdraw(1, prefix(0));
    h.withdraw(2, prefix(8));
    // Peer 2 takes over a prefix of peer 1.
    h.withdraw(1, prefix(4));

    let announced = pull_announced(&mut h, 3);
    let unique = announced.iter().copied().collect::<BTreeSet<_>>();
    assert_eq!(unique.len(), announced.len());

    let winners = (0..10)
        .map(prefix)
        .filter(|prefix| h.best(*prefix).is_some())
        .collect::<BTreeSet<_>>();
    assert_eq!(unique, winners);
    assert_eq!(h.best(prefix(4)), Some(2));
}

#[test]
fn test_dump_peer_down() {
    let mut config = RibCfg::default();
    config.dump_batch = 1;
    let mut h = Harness::new(config);
    populate(&mut h);

    h.add_peer(3, PeerType::Ebgp);
    h.plumbing.peering_went_down(2).unwrap();

    let announced = pull_announced(&mut h, 3);
    let expected = (0..6).map(prefix).collect::<Vec<_>>();
    assert_eq!(announced, expected);
}

#[test]
fn test_dump_losing_routes() {
    let mut config = RibCfg::default();
    config.dump_batch = 1;
    let mut h = Harness::new(config);
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);
    for third in 0..6 {
        h.plumbing
            .add_route(
                1,
                prefix(third),
                attrs(ip!("2.0.0.1"), &[65001, 65100]),
            )
            .unwrap();
        h.plumbing
            .add_route(2, prefix(third), attrs(ip!("2.0.0.2"), &[65002]))
            .unwrap();
    }
    h.plumbing.push(1).unwrap();
    h.plumbing.push(2).unwrap();
    h.run();

    // Walking a route that loses still takes up a slice.
    h.add_peer(3, PeerType::Ebgp);
    let head = h.plumbing.fanout().peer_info(3).unwrap().head;
    while let Ok(msg) = h.sched_rx.try_recv() {
        let dump_slice = matches!(msg, PipelineMsg::DumpSlice(_));
        h.plumbing.process_msg(msg);
        if dump_slice {
            break;
        }
    }
    let dump = h.plumbing.tables.get(head).as_dump().unwrap();
    let first = Ipv4Network::new(Ipv4Addr::new(30, 0, 0, 0), 24).unwrap();
    assert_eq!(
        dump.iter().state(1).unwrap().status,
        DumpStatus::Dumping { last: first }
    );
    assert_eq!(
        dump.iter().state(2).unwrap().status,
        DumpStatus::NotStarted
    );
    assert!(h.plumbing.pull_updates(3, 10).unwrap().is_empty());

    let announced = pull_announced(&mut h, 3);
    let expected = (0..6).map(prefix).collect::<Vec<_>>();
    assert_eq!(announced, expected);
}

#[test]
fn test_dump_iterator_range() {
    let mut h = Harness::new(RibCfg::default());
    populate(&mut h);
    h.announce(1, net!("29.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));
    let ribin = h.plumbing.peer_tables(1).unwrap().ribin;
    let genid = h.plumbing.ribin(1).unwrap().genid();

    // The walk starts at the first prefix of the range and ends with it.
    let mut iter = DumpIterator::<Ipv4Unicast>::with_range(
        [(1, ribin, genid)],
        Some(net4!("30.0.2.0/23")),
    );
    let tables = &h.plumbing.tables;
    assert_eq!(iter.next(tables), Some((1, net4!("30.0.2.0/24"))));
    assert_eq!(iter.next(tables), Some((1, net4!("30.0.3.0/24"))));
    assert_eq!(iter.next(tables), None);
    assert_eq!(iter.state(1).unwrap().status, DumpStatus::Done);
}

#[test]
fn test_route_table_reader() {
    let mut h = Harness::new(RibCfg::default());
    populate(&mut h);
    h.announce(1, net!("31.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));

    let token = h
        .plumbing
        .create_route_table_reader(Some(net!("30.0.0.0/16")))
        .unwrap();
    let mut routes = vec![];
    while let Some(route) = h.plumbing.read_next_route(token).unwrap() {
        routes.push((route.origin.id, route.prefix, route.winner));
    }
    assert_eq!(routes.len(), 12);
    assert!(routes.iter().all(|(_, prefix, _)| prefix.prefix() == 24));
    for (peer_id, prefix, winner) in &routes {
        assert_eq!(*winner, *peer_id == 1 || prefix.ip().octets()[2] >= 6);
    }

    // Exhausted readers are discarded.
    assert!(matches!(
        h.plumbing.read_next_route(token),
        Err(Error::ReaderTokenUnknown(_))
    ));
}

#[test]
fn test_route_table_reader_peer_down() {
    let mut h = Harness::new(RibCfg::default());
    populate(&mut h);

    let token = h.plumbing.create_route_table_reader(None).unwrap();
    let first = h.plumbing.read_next_route(token).unwrap().unwrap();
    assert_eq!(first.origin.id, 1);
    assert_eq!(IpNetwork::V4(first.prefix), prefix(0));

    // Routes of a session that went down aren't returned anymore.
    h.plumbing.peering_went_down(2).unwrap();
    let mut count = 1;
    while let Some(route) = h.plumbing.read_next_route(token).unwrap() {
        assert_eq!(route.origin.id, 1);
        count += 1;
    }
    assert_eq!(count, 6);
}
