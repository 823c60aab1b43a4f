//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use holo_utils::ip::{IpAddrKind, IpNetworkKind};
use prefix_trie::map::PrefixMap;

use crate::af::AddressFamily;

// IGP routes used to resolve BGP next hops.
#[derive(Debug)]
pub struct NexthopResolver<F: AddressFamily> {
    routes: PrefixMap<F::IpNetwork, u32>,
}

// ===== impl NexthopResolver =====

impl<F> NexthopResolver<F>
where
    F: AddressFamily,
{
    // Adds or updates an IGP route.
    //
    // Returns whether the resolver state changed.
    pub fn update(&mut self, prefix: F::IpNetwork, metric: u32) -> bool {
        let prefix = prefix.apply_mask();
        self.routes.insert(prefix, metric) != Some(metric)
    }

    // Removes an IGP route.
    pub fn delete(&mut self, prefix: F::IpNetwork) -> bool {
        let prefix = prefix.apply_mask();
        self.routes.remove(&prefix).is_some()
    }

    pub fn resolvable(&self, addr: F::IpAddr) -> bool {
        self.igp_distance(addr).is_some()
    }

    // IGP distance to the given next hop, if it's reachable at all.
    pub fn igp_distance(&self, addr: F::IpAddr) -> Option<u32> {
        let plen = addr.address_family().max_prefixlen();
        let host = F::IpNetwork::new(addr, plen).ok()?;
        self.routes.get_lpm(&host).map(|(_, metric)| *metric)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F> Default for NexthopResolver<F>
where
    F: AddressFamily,
{
    fn default() -> NexthopResolver<F> {
        NexthopResolver {
            routes: PrefixMap::new(),
        }
    }
}

// ===== unit tests =====
