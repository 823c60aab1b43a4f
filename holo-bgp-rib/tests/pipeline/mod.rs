//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod decision;
mod dump;
mod egress;
mod output;
mod peering;
mod policy;

use std::net::{IpAddr, Ipv4Addr};

use const_addrs::net;
use holo_bgp_rib::af::Ipv4Unicast;
use holo_bgp_rib::attribute::{AsPath, Attrs};
use holo_bgp_rib::config::RibCfg;
use holo_bgp_rib::peer::{PeerId, PeerInfo, PeerType};
use holo_bgp_rib::plumbing::Plumbing;
use holo_bgp_rib::policy::PolicyCfg;
use holo_bgp_rib::table::PipelineChannelsTx;
use holo_bgp_rib::tasks::messages::input::{PipelineMsg, RibReplyMsg};
use holo_bgp_rib::tasks::messages::output::{
    RibRequest, RibRequestMsg, SessionMsg,
};
use holo_utils::bgp::AfiSafi;
use holo_utils::{Receiver, UnboundedReceiver};
use ipnetwork::{IpNetwork, Ipv4Network};
use tokio::sync::mpsc;

const EGRESS_CAPACITY: usize = 1024;

// IPv4 pipeline along with the receiving end of all of its channels.
pub struct Harness {
    pub plumbing: Plumbing<Ipv4Unicast>,
    pub sched_rx: UnboundedReceiver<PipelineMsg>,
    pub session_rx: UnboundedReceiver<SessionMsg>,
    pub egress_rx: Receiver<RibRequestMsg>,
}

//
// Helper functions.
//

impl Harness {
    // Pipeline with a default IGP route, so that all next hops resolve.
    pub fn new(config: RibCfg) -> Harness {
        let mut harness = Harness::without_igp(config);
        harness
            .plumbing
            .igp_route_update(net!("0.0.0.0/0"), 10)
            .unwrap();
        harness
    }

    pub fn without_igp(config: RibCfg) -> Harness {
        Harness::with_policies(config, PolicyCfg::default(), EGRESS_CAPACITY)
    }

    pub fn with_policies(
        config: RibCfg,
        policies: PolicyCfg,
        egress_capacity: usize,
    ) -> Harness {
        let (sched_tx, sched_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (egress_tx, egress_rx) = mpsc::channel(egress_capacity);
        let tx = PipelineChannelsTx {
            sched: sched_tx,
            session: session_tx,
            egress: egress_tx,
        };

        Harness {
            plumbing: Plumbing::new(config, policies, tx),
            sched_rx,
            session_rx,
            egress_rx,
        }
    }

    pub fn add_peer(&mut self, id: PeerId, peer_type: PeerType) {
        self.plumbing.add_peering(peer(id, peer_type)).unwrap();
    }

    // Announces a route and ends the batch.
    pub fn announce(
        &mut self,
        peer_id: PeerId,
        prefix: IpNetwork,
        attrs: Attrs,
    ) {
        self.plumbing.add_route(peer_id, prefix, attrs).unwrap();
        self.plumbing.push(peer_id).unwrap();
    }

    // Withdraws a route and ends the batch.
    pub fn withdraw(&mut self, peer_id: PeerId, prefix: IpNetwork) {
        self.plumbing.delete_route(peer_id, prefix).unwrap();
        self.plumbing.push(peer_id).unwrap();
    }

    // Processes all follow-up work scheduled by the pipeline.
    pub fn run(&mut self) {
        while let Ok(msg) = self.sched_rx.try_recv() {
            self.plumbing.process_msg(msg);
        }
    }

    // Takes the requests sent to the forwarding table, without answering
    // them.
    pub fn egress_recv(&mut self) -> Vec<RibRequestMsg> {
        let mut msgs = vec![];
        while let Ok(msg) = self.egress_rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    // Takes the requests sent to the forwarding table, acknowledging all of
    // them.
    pub fn egress_requests(&mut self) -> Vec<RibRequest> {
        let mut requests = vec![];
        loop {
            let msgs = self.egress_recv();
            if msgs.is_empty() {
                return requests;
            }
            for msg in msgs {
                self.ack(msg.seq);
                requests.push(msg.request);
            }
        }
    }

    pub fn ack(&mut self, seq: u64) {
        let reply = RibReplyMsg {
            afi_safi: AfiSafi::Ipv4Unicast,
            seq,
            result: Ok(()),
        };
        self.plumbing.rib_command_done(reply).unwrap();
    }

    // Peers whose route for the prefix is flagged as the winner.
    pub fn winners(&self, prefix: Ipv4Network) -> Vec<PeerId> {
        self.plumbing
            .peer_ids()
            .filter(|peer_id| {
                self.plumbing.ribin(*peer_id).is_some_and(|ribin| {
                    ribin
                        .routes()
                        .get(&prefix)
                        .is_some_and(|route| route.is_winner())
                })
            })
            .collect()
    }

    // Origin of the current best route for the prefix.
    pub fn best(&self, prefix: IpNetwork) -> Option<PeerId> {
        self.plumbing
            .lookup_route(prefix)
            .map(|msg| msg.origin.id)
    }
}

pub fn peer(id: PeerId, peer_type: PeerType) -> PeerInfo {
    let octet = id as u8;
    PeerInfo {
        id,
        name: format!("peer{}", id),
        peer_type,
        remote_addr: IpAddr::V4(Ipv4Addr::new(192, 0, 2, octet)),
        local_addr: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 254)),
        remote_as: match peer_type {
            PeerType::Ebgp => 65000 + id,
            _ => 65000,
        },
        router_id: Ipv4Addr::new(octet, octet, octet, octet),
    }
}

pub fn attrs(nexthop: IpAddr, as_path: &[u32]) -> Attrs {
    let mut attrs = Attrs::default();
    attrs.base.nexthop = Some(nexthop);
    attrs.base.as_path = AsPath::from_sequence(as_path.iter().copied());
    attrs
}

// Compact rendering of forwarding-table requests.
pub fn summary(requests: &[RibRequest]) -> Vec<String> {
    requests
        .iter()
        .map(|request| match request {
            RibRequest::StartTransaction { tid } => format!("start {}", tid),
            RibRequest::AddRoute { tid, route } => {
                format!("add {} {}", tid, route.prefix)
            }
            RibRequest::DeleteRoute { tid, route } => {
                format!("delete {} {}", tid, route.prefix)
            }
            RibRequest::CommitTransaction { tid } => {
                format!("commit {}", tid)
            }
        })
        .collect()
}
