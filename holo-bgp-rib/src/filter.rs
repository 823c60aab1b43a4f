//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use holo_utils::bgp::{Comm, WellKnownCommunities};
use serde::Serialize;

use crate::af::AddressFamily;
use crate::attribute::{AttrFlags, Attrs, ClusterList};
use crate::peer::{PeerHandle, PeerType};
use crate::route::{AggrMarker, InternalMessage};

// Static filters applied by the filter stages.
//
// Each filter is a pure function of the route, the peer the route came from
// and its own parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Serialize)]
pub enum RouteFilter {
    // Aggregate and component handling by session type of the target peer.
    Aggregation { ibgp: bool },
    // Drop routes whose AS path contains the given AS.
    SimpleAs { asn: u32 },
    // Route reflector input checks (RFC 4456).
    RrInput {
        router_id: Ipv4Addr,
        cluster_id: Ipv4Addr,
    },
    // Prepend an AS to the AS path.
    AsPrepend { asn: u32, confed: bool },
    // Rewrite the next hop to the local address of the session.
    NexthopRewrite { addr: IpAddr },
    // Don't send routes learned over iBGP to other iBGP peers.
    IbgpLoop,
    // Route reflection towards an iBGP peer.
    RrIbgpLoop {
        client: bool,
        router_id: Ipv4Addr,
        cluster_id: Ipv4Addr,
    },
    LocalPrefInsertion { local_pref: u32 },
    LocalPrefRemoval,
    // Set the MED from the IGP metric of routes learned internally.
    MedInsertion,
    // Remove the MED of routes learned from other autonomous systems.
    MedRemoval,
    // Well-known communities handling for the given target peer type.
    KnownCommunity { peer_type: PeerType },
    // Unknown attributes handling.
    Unknown,
}

#[derive(Debug, Eq, PartialEq)]
pub enum FilterAction {
    Pass,
    Modify(Attrs),
    Drop,
}

// ===== impl RouteFilter =====

impl RouteFilter {
    // Applies the filter to the route carried by `msg`, whose current
    // attributes are `attrs` (possibly already modified by earlier filters).
    pub fn apply<F: AddressFamily>(
        &self,
        msg: &InternalMessage<F>,
        attrs: &Attrs,
    ) -> FilterAction {
        let origin = &msg.origin;
        match self {
            RouteFilter::Aggregation { ibgp } => {
                match (msg.route.aggr, ibgp) {
                    // The aggregate isn't announced inside the AS, while its
                    // components aren't announced outside of it.
                    (AggrMarker::Aggregate, true)
                    | (AggrMarker::Component, false) => FilterAction::Drop,
                    _ => FilterAction::Pass,
                }
            }
            RouteFilter::SimpleAs { asn } => {
                if attrs.base.as_path.contains(*asn) {
                    FilterAction::Drop
                } else {
                    FilterAction::Pass
                }
            }
            RouteFilter::RrInput {
                router_id,
                cluster_id,
            } => {
                if attrs.base.originator_id == Some(*router_id)
                    || attrs
                        .base
                        .cluster_list
                        .as_ref()
                        .is_some_and(|list| list.contains(*cluster_id))
                {
                    FilterAction::Drop
                } else {
                    FilterAction::Pass
                }
            }
            RouteFilter::AsPrepend { asn, confed } => {
                let mut attrs = attrs.clone();
                if *confed {
                    attrs.base.as_path.prepend_confed(*asn);
                } else {
                    attrs.base.as_path.strip_confed();
                    attrs.base.as_path.prepend(*asn);
                }
                FilterAction::Modify(attrs)
            }
            RouteFilter::NexthopRewrite { addr } => {
                if attrs.base.nexthop == Some(*addr) {
                    return FilterAction::Pass;
                }
                let mut attrs = attrs.clone();
                attrs.base.nexthop = Some(*addr);
                FilterAction::Modify(attrs)
            }
            RouteFilter::IbgpLoop => {
                if origin.peer_type.is_ibgp() {
                    FilterAction::Drop
                } else {
                    FilterAction::Pass
                }
            }
            RouteFilter::RrIbgpLoop {
                client,
                router_id,
                cluster_id,
            } => rr_ibgp_loop(origin, attrs, *client, *router_id, *cluster_id),
            RouteFilter::LocalPrefInsertion { local_pref } => {
                let mut attrs = attrs.clone();
                attrs.base.local_pref = Some(*local_pref);
                FilterAction::Modify(attrs)
            }
            RouteFilter::LocalPrefRemoval => {
                if attrs.base.local_pref.is_none() {
                    return FilterAction::Pass;
                }
                let mut attrs = attrs.clone();
                attrs.base.local_pref = None;
                FilterAction::Modify(attrs)
            }
            RouteFilter::MedInsertion => {
                if origin.peer_type.is_ebgp() || attrs.base.med.is_some() {
                    return FilterAction::Pass;
                }
                match msg.route.igp_metric() {
                    Some(metric) => {
                        let mut attrs = attrs.clone();
                        attrs.base.med = Some(metric);
                        FilterAction::Modify(attrs)
                    }
                    None => FilterAction::Pass,
                }
            }
            RouteFilter::MedRemoval => {
                if !origin.peer_type.is_ebgp() || attrs.base.med.is_none() {
                    return FilterAction::Pass;
                }
                let mut attrs = attrs.clone();
                attrs.base.med = None;
                FilterAction::Modify(attrs)
            }
            RouteFilter::KnownCommunity { peer_type } => {
                let no_advertise =
                    Comm(WellKnownCommunities::NoAdvertise as u32);
                let no_export = Comm(WellKnownCommunities::NoExport as u32);
                let no_export_subconfed =
                    Comm(WellKnownCommunities::NoExportSubconfed as u32);
                let drop = attrs.has_community(no_advertise)
                    || (peer_type.is_ebgp() && attrs.has_community(no_export))
                    || (matches!(
                        peer_type,
                        PeerType::Ebgp | PeerType::EbgpConfed
                    ) && attrs.has_community(no_export_subconfed));
                if drop {
                    FilterAction::Drop
                } else {
                    FilterAction::Pass
                }
            }
            RouteFilter::Unknown => {
                if attrs.unknown.is_empty() {
                    return FilterAction::Pass;
                }
                // Non-transitive attributes are discarded. Optional
                // transitive ones are passed on with the partial bit set.
                let mut attrs = attrs.clone();
                attrs.unknown.retain(|attr| attr.is_transitive());
                for attr in attrs.unknown.iter_mut() {
                    if attr.is_optional() {
                        attr.flags.insert(AttrFlags::PARTIAL);
                    }
                }
                FilterAction::Modify(attrs)
            }
        }
    }
}

// ===== global functions =====

// Applies a bank of filters in order.
//
// Returns `None` if the route was dropped, or the final attributes if any
// filter modified them.
pub fn apply_filters<'a, F: AddressFamily>(
    filters: impl IntoIterator<Item = &'a RouteFilter>,
    msg: &InternalMessage<F>,
) -> Option<Option<Attrs>> {
    let mut modified: Option<Attrs> = None;
    for filter in filters {
        let attrs = modified.as_ref().unwrap_or(msg.route.attrs());
        match filter.apply(msg, attrs) {
            FilterAction::Pass => (),
            FilterAction::Modify(attrs) => modified = Some(attrs),
            FilterAction::Drop => return None,
        }
    }
    // Filters may restore the original attributes.
    Some(modified.filter(|attrs| attrs != msg.route.attrs()))
}

// ===== helper functions =====

// RFC 4456 reflection rules for a route sent to an iBGP peer.
fn rr_ibgp_loop(
    origin: &PeerHandle,
    attrs: &Attrs,
    client: bool,
    router_id: Ipv4Addr,
    cluster_id: Ipv4Addr,
) -> FilterAction {
    match origin.peer_type {
        PeerType::Ibgp if !client => {
            // Routes from non-clients are reflected to clients only.
            FilterAction::Drop
        }
        PeerType::Ibgp | PeerType::IbgpClient => {
            let mut attrs = attrs.clone();
            if attrs.base.originator_id.is_none() {
                let originator_id = if origin.router_id.is_unspecified() {
                    router_id
                } else {
                    origin.router_id
                };
                attrs.base.originator_id = Some(originator_id);
            }
            attrs
                .base
                .cluster_list
                .get_or_insert_with(ClusterList::default)
                .prepend(cluster_id);
            FilterAction::Modify(attrs)
        }
        _ => FilterAction::Pass,
    }
}

// ===== unit tests =====
