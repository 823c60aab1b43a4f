//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::{ip, net, net4};
use holo_bgp_rib::config::RibCfg;
use holo_bgp_rib::error::Error;
use holo_bgp_rib::peer::{LOCAL_PEER_ID, PeerType};
use holo_bgp_rib::policy::{
    DefaultPolicyType, IpPrefixRange, MatchSetRestrictedType, Policy,
    PolicyAction, PolicyCfg, PolicyCondition, PolicyDirection, PolicyError,
    PolicyStmt,
};
use holo_bgp_rib::route::AggrMarker;
use holo_bgp_rib::table::ribout::RouteUpdate;
use holo_bgp_rib::tasks::messages::input::{DampingReuseMsg, PipelineMsg};
use holo_utils::bgp::AfiSafi;

use super::{Harness, attrs, summary};

// Import policy rejecting everything within 60.0.0.0/8.
fn deny_policies() -> PolicyCfg {
    let mut policies = PolicyCfg::default();
    policies.match_sets.prefixes.insert(
        "deny".to_owned(),
        [IpPrefixRange::new(net!("60.0.0.0/8"), 8, 32)].into(),
    );
    policies.import.policies.push(Policy::new(
        "deny-60".to_owned(),
        vec![PolicyStmt::new(
            "10".to_owned(),
            vec![PolicyCondition::MatchPrefixSet {
                value: "deny".to_owned(),
                match_type: MatchSetRestrictedType::Any,
            }],
            vec![PolicyAction::Accept(false)],
        )],
    ));
    policies
}

#[test]
fn test_import_reject() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.announce(1, net!("60.1.0.0/16"), attrs(ip!("2.0.0.1"), &[65001]));
    h.announce(1, net!("61.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(h.best(net!("60.1.0.0/16")), Some(1));
    h.egress_requests();

    h.plumbing.configure_policies(deny_policies()).unwrap();
    h.run();
    assert_eq!(h.best(net!("60.1.0.0/16")), None);
    assert_eq!(h.best(net!("61.0.0.0/8")), Some(1));
    let requests = summary(&h.egress_requests());
    assert!(requests.iter().any(|request| {
        request.starts_with("delete") && request.ends_with("60.1.0.0/16")
    }));
    assert!(!requests.iter().any(|request| request.ends_with("61.0.0.0/8")));

    // New routes are subject to the same policy.
    h.announce(1, net!("60.2.0.0/16"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(h.best(net!("60.2.0.0/16")), None);
    assert_eq!(h.plumbing.get_prefix_count(1).unwrap(), 3);

    h.plumbing.configure_policies(PolicyCfg::default()).unwrap();
    h.run();
    assert_eq!(h.best(net!("60.1.0.0/16")), Some(1));
    assert_eq!(h.best(net!("60.2.0.0/16")), Some(1));
}

#[test]
fn test_reconfigure_unchanged() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);
    h.announce(1, net!("61.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(h.best(net!("61.0.0.0/8")), Some(1));
    h.egress_requests();
    assert_eq!(h.plumbing.pull_updates(2, 10).unwrap().len(), 1);

    // Re-applying policies that leave the route untouched is silent.
    h.plumbing.configure_policies(PolicyCfg::default()).unwrap();
    h.run();
    assert_eq!(h.best(net!("61.0.0.0/8")), Some(1));
    assert!(h.egress_requests().is_empty());
    assert!(h.plumbing.pull_updates(2, 10).unwrap().is_empty());

    // Export policy changes still reach the peers.
    let mut cfg = PolicyCfg::default().export;
    cfg.default_policy = DefaultPolicyType::RejectRoute;
    h.plumbing
        .configure_policy(PolicyDirection::Export, cfg)
        .unwrap();
    h.run();
    assert_eq!(
        h.plumbing.pull_updates(2, 10).unwrap(),
        [RouteUpdate::Withdraw {
            prefix: net!("61.0.0.0/8")
        }]
    );
}

#[test]
fn test_default_reject() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    h.add_peer(2, PeerType::Ebgp);

    let mut cfg = PolicyCfg::default().export;
    cfg.default_policy = DefaultPolicyType::RejectRoute;
    h.plumbing
        .configure_policy(PolicyDirection::Export, cfg)
        .unwrap();

    h.announce(1, net!("60.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(h.best(net!("60.0.0.0/8")), Some(1));
    assert!(h.plumbing.pull_updates(2, 10).unwrap().is_empty());
}

#[test]
fn test_invalid_policy() {
    let mut h = Harness::new(RibCfg::default());
    let mut policies = deny_policies();
    policies.match_sets.prefixes.clear();

    let result = h.plumbing.configure_policies(policies);
    let Err(Error::PolicyInvalid(name, error)) = result else {
        panic!("unexpected result: {:?}", result);
    };
    assert_eq!(name, "deny-60");
    assert!(matches!(
        error,
        PolicyError::UnknownMatchSet(_, set) if set == "deny"
    ));

    // The previous policies are kept.
    h.add_peer(1, PeerType::Ebgp);
    h.announce(1, net!("60.0.0.0/8"), attrs(ip!("2.0.0.1"), &[65001]));
    assert_eq!(h.best(net!("60.0.0.0/8")), Some(1));
}

#[test]
fn test_set_local_pref() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ibgp);
    h.add_peer(2, PeerType::Ibgp);
    h.announce(1, net!("62.0.0.0/8"), attrs(ip!("10.0.0.1"), &[65100]));
    h.announce(2, net!("62.0.0.0/8"), attrs(ip!("10.0.0.2"), &[65100]));
    assert_eq!(h.best(net!("62.0.0.0/8")), Some(1));

    let mut policies = PolicyCfg::default();
    policies.import.policies.push(Policy::new(
        "prefer-peer2".to_owned(),
        vec![PolicyStmt::new(
            "10".to_owned(),
            vec![PolicyCondition::MatchNeighbor(
                [ip!("192.0.2.2")].into(),
            )],
            vec![PolicyAction::SetLocalPref(300), PolicyAction::Accept(true)],
        )],
    ));
    h.plumbing.configure_policies(policies).unwrap();
    h.run();

    assert_eq!(h.best(net!("62.0.0.0/8")), Some(2));
    assert_eq!(h.winners(net4!("62.0.0.0/8")), [2]);
    let best = h.plumbing.lookup_route(net!("62.0.0.0/8")).unwrap();
    assert_eq!(best.route.base().local_pref, Some(300));
}

#[test]
fn test_damping() {
    let mut config = RibCfg::default();
    config.damping.enabled = true;
    config.damping.reuse = 5000;
    let mut h = Harness::new(config);
    h.add_peer(1, PeerType::Ebgp);
    let prefix = net!("63.0.0.0/8");

    // Each withdrawal is penalized once.
    h.announce(1, prefix, attrs(ip!("2.0.0.1"), &[65001]));
    h.withdraw(1, prefix);
    h.announce(1, prefix, attrs(ip!("2.0.0.1"), &[65001]));
    let merit = h.plumbing.damping(1).unwrap().merit(&net4!("63.0.0.0/8"));
    assert!(merit.is_some_and(|merit| (900..=1000).contains(&merit)));

    for _ in 0..3 {
        assert_eq!(h.best(prefix), Some(1));
        h.withdraw(1, prefix);
        assert_eq!(h.best(prefix), None);
        h.announce(1, prefix, attrs(ip!("2.0.0.1"), &[65001]));
    }

    // The fourth flap crosses the cutoff.
    let damping = h.plumbing.damping(1).unwrap();
    assert!(damping.is_suppressed(&net4!("63.0.0.0/8")));
    assert!(damping.merit(&net4!("63.0.0.0/8")).unwrap() > 3000);
    assert_eq!(h.best(prefix), None);

    let table = h.plumbing.peer_tables(1).unwrap().damping;
    h.plumbing
        .process_msg(PipelineMsg::DampingReuse(DampingReuseMsg {
            afi_safi: AfiSafi::Ipv4Unicast,
            table,
            prefix,
        }));
    let damping = h.plumbing.damping(1).unwrap();
    assert!(!damping.is_suppressed(&net4!("63.0.0.0/8")));
    assert_eq!(h.best(prefix), Some(1));
}

#[test]
fn test_damping_ibgp() {
    let mut config = RibCfg::default();
    config.damping.enabled = true;
    let mut h = Harness::new(config);
    h.add_peer(1, PeerType::Ibgp);
    let prefix = net!("63.0.0.0/8");

    // Internal routes are never damped.
    for _ in 0..5 {
        h.announce(1, prefix, attrs(ip!("10.0.0.1"), &[]));
        h.withdraw(1, prefix);
    }
    h.announce(1, prefix, attrs(ip!("10.0.0.1"), &[]));
    assert_eq!(h.best(prefix), Some(1));
    let damping = h.plumbing.damping(1).unwrap();
    assert_eq!(damping.merit(&net4!("63.0.0.0/8")), None);
}

#[test]
fn test_originate_route() {
    let mut h = Harness::new(RibCfg::default());
    h.add_peer(1, PeerType::Ebgp);
    let prefix = net!("64.0.0.0/8");

    h.plumbing
        .originate_route(
            prefix,
            attrs(ip!("192.0.2.254"), &[]),
            AggrMarker::Ignore,
        )
        .unwrap();
    assert_eq!(h.best(prefix), Some(LOCAL_PEER_ID));
    // Locally originated routes aren't installed in the forwarding table.
    assert!(h.egress_recv().is_empty());

    let updates = h.plumbing.pull_updates(1, 10).unwrap();
    let [RouteUpdate::Announce { attrs, .. }] = updates.as_slice() else {
        panic!("unexpected updates: {:?}", updates);
    };
    assert_eq!(attrs.value.base.as_path.iter().collect::<Vec<_>>(), [65000]);

    // Peers added later receive it with the initial dump.
    h.add_peer(2, PeerType::Ebgp);
    h.run();
    let updates = h.plumbing.pull_updates(2, 10).unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].prefix(), prefix);

    h.plumbing.withdraw_route(prefix).unwrap();
    assert_eq!(h.best(prefix), None);
    for peer_id in [1, 2] {
        assert_eq!(
            h.plumbing.pull_updates(peer_id, 10).unwrap(),
            [RouteUpdate::Withdraw { prefix }]
        );
    }
    assert!(h.egress_recv().is_empty());
}
