//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use tracing::{debug, debug_span};

use crate::peer::PeerHandle;
use crate::policy::PolicyDirection;
use crate::route::Genid;
use crate::tasks::messages::output::RibRequest;

// Route pipeline debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    PeeringAdd(&'a PeerHandle),
    PeeringDelete(&'a PeerHandle),
    PeeringUp(&'a PeerHandle, Genid),
    PeeringDown(&'a PeerHandle, Genid),
    PeeringStop(&'a PeerHandle),
    DeletionStart(&'a PeerHandle, Genid, usize),
    DeletionFinish(&'a PeerHandle, Genid),
    DumpStart(&'a PeerHandle),
    DumpFinish(&'a PeerHandle),
    BestPathFound(IpNetwork, &'a PeerHandle),
    BestPathNotFound(IpNetwork),
    NhtUpdate(IpAddr, Option<u32>),
    NexthopPush(&'a PeerHandle, IpAddr, usize),
    FilterReconfigure(&'a PeerHandle, PolicyDirection, u32),
    FilterVersionRelease(&'a PeerHandle, PolicyDirection, u32),
    DampingSuppress(IpNetwork, u32),
    DampingReuse(IpNetwork),
    EgressDispatch(u64, &'a RibRequest),
    EgressBacklog(usize),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::PeeringAdd(peer)
            | Debug::PeeringDelete(peer)
            | Debug::PeeringStop(peer)
            | Debug::DumpStart(peer)
            | Debug::DumpFinish(peer) => {
                // Parent span(s): bgp-rib
                debug_span!("peer", name = %peer).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::PeeringUp(peer, genid) | Debug::PeeringDown(peer, genid) => {
                // Parent span(s): bgp-rib
                debug_span!("peer", name = %peer).in_scope(|| {
                    debug!(%genid, "{}", self);
                });
            }
            Debug::DeletionStart(peer, genid, routes) => {
                // Parent span(s): bgp-rib
                debug_span!("peer", name = %peer).in_scope(|| {
                    debug_span!("deletion").in_scope(|| {
                        debug!(%genid, %routes, "{}", self);
                    })
                });
            }
            Debug::DeletionFinish(peer, genid) => {
                // Parent span(s): bgp-rib
                debug_span!("peer", name = %peer).in_scope(|| {
                    debug_span!("deletion").in_scope(|| {
                        debug!(%genid, "{}", self);
                    })
                });
            }
            Debug::BestPathFound(prefix, peer) => {
                // Parent span(s): bgp-rib
                debug!(%prefix, origin = %peer, "{}", self);
            }
            Debug::BestPathNotFound(prefix) => {
                // Parent span(s): bgp-rib
                debug!(%prefix, "{}", self);
            }
            Debug::NhtUpdate(addr, metric) => {
                // Parent span(s): bgp-rib
                if let Some(metric) = metric {
                    debug!(%addr, %metric, "{}", self);
                } else {
                    debug!(%addr, metric = "unreachable", "{}", self);
                }
            }
            Debug::NexthopPush(peer, addr, routes) => {
                // Parent span(s): bgp-rib
                debug_span!("peer", name = %peer).in_scope(|| {
                    debug!(%addr, %routes, "{}", self);
                });
            }
            Debug::FilterReconfigure(peer, direction, version)
            | Debug::FilterVersionRelease(peer, direction, version) => {
                // Parent span(s): bgp-rib
                debug_span!("peer", name = %peer).in_scope(|| {
                    debug_span!("filter", %direction).in_scope(|| {
                        debug!(%version, "{}", self);
                    })
                });
            }
            Debug::DampingSuppress(prefix, merit) => {
                // Parent span(s): bgp-rib
                debug_span!("damping").in_scope(|| {
                    debug!(%prefix, %merit, "{}", self);
                });
            }
            Debug::DampingReuse(prefix) => {
                // Parent span(s): bgp-rib
                debug_span!("damping").in_scope(|| {
                    debug!(%prefix, "{}", self);
                });
            }
            Debug::EgressDispatch(seq, request) => {
                // Parent span(s): bgp-rib
                debug_span!("egress").in_scope(|| {
                    let data = serde_json::to_string(&request).unwrap();
                    debug!(%seq, %data, "{}", self);
                });
            }
            Debug::EgressBacklog(pending) => {
                // Parent span(s): bgp-rib
                debug_span!("egress").in_scope(|| {
                    debug!(%pending, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::PeeringAdd(..) => {
                write!(f, "peering added")
            }
            Debug::PeeringDelete(..) => {
                write!(f, "peering deleted")
            }
            Debug::PeeringUp(..) => {
                write!(f, "peering came up")
            }
            Debug::PeeringDown(..) => {
                write!(f, "peering went down")
            }
            Debug::PeeringStop(..) => {
                write!(f, "peering output stopped")
            }
            Debug::DeletionStart(..) => {
                write!(f, "background deletion started")
            }
            Debug::DeletionFinish(..) => {
                write!(f, "background deletion finished")
            }
            Debug::DumpStart(..) => {
                write!(f, "table dump started")
            }
            Debug::DumpFinish(..) => {
                write!(f, "table dump finished")
            }
            Debug::BestPathFound(..) => {
                write!(f, "best path found")
            }
            Debug::BestPathNotFound(..) => {
                write!(f, "best path not found")
            }
            Debug::NhtUpdate(..) => {
                write!(f, "nexthop tracking update")
            }
            Debug::NexthopPush(..) => {
                write!(f, "re-evaluating routes")
            }
            Debug::FilterReconfigure(..) => {
                write!(f, "new filter version installed")
            }
            Debug::FilterVersionRelease(..) => {
                write!(f, "filter version released")
            }
            Debug::DampingSuppress(..) => {
                write!(f, "route suppressed")
            }
            Debug::DampingReuse(..) => {
                write!(f, "route reused")
            }
            Debug::EgressDispatch(..) => {
                write!(f, "request")
            }
            Debug::EgressBacklog(..) => {
                write!(f, "transmit window full")
            }
        }
    }
}
