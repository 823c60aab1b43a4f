//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use holo_utils::bgp::AfiSafi;
use holo_utils::ip::{IpAddrKind, IpNetworkKind};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};

use crate::attribute::BaseAttrs;

// Address-family specific code of the route pipeline.
pub trait AddressFamily: Sized + std::fmt::Debug + 'static {
    // Combined AFI and SAFI.
    const AFI_SAFI: AfiSafi;

    // The type of IP address used by this address family.
    type IpAddr: IpAddrKind;
    // The type of IP network used by this address family.
    type IpNetwork: IpNetworkKind<Self::IpAddr> + prefix_trie::Prefix;

    // Extract the next hop of this address family from the route attributes.
    //
    // Returns `None` for locally originated routes that carry no next hop.
    fn nexthop(attrs: &BaseAttrs) -> Option<Self::IpAddr> {
        attrs
            .nexthop
            .and_then(Self::IpAddr::get)
            .filter(|addr| *addr != Self::IpAddr::unspecified())
    }

    // Convert a generic network into this address family's network type.
    fn network(prefix: IpNetwork) -> Option<Self::IpNetwork> {
        Self::IpNetwork::get(prefix).map(|prefix| prefix.apply_mask())
    }
}

#[derive(Debug)]
pub struct Ipv4Unicast;

#[derive(Debug)]
pub struct Ipv6Unicast;

// ===== impl Ipv4Unicast =====

impl AddressFamily for Ipv4Unicast {
    const AFI_SAFI: AfiSafi = AfiSafi::Ipv4Unicast;

    type IpAddr = Ipv4Addr;
    type IpNetwork = Ipv4Network;
}

// ===== impl Ipv6Unicast =====

impl AddressFamily for Ipv6Unicast {
    const AFI_SAFI: AfiSafi = AfiSafi::Ipv6Unicast;

    type IpAddr = Ipv6Addr;
    type IpNetwork = Ipv6Network;
}
