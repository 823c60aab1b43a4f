//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::af::AddressFamily;
use crate::config::RibCfg;
use crate::debug::Debug;
use crate::peer::PeerHandle;
use crate::route::{AddRouteResult, InternalMessage};
use crate::table::{RouteSink, RouteSource, TableId, Tables};

// Best-path selection across all peers.
//
// The table stores nothing. Alternatives are looked up from the upstream
// branches whenever a route changes.
#[derive(Debug)]
pub struct DecisionTable<F: AddressFamily> {
    id: TableId,
    next: Option<TableId>,
    parents: BTreeMap<TableId, PeerHandle>,
    _marker: std::marker::PhantomData<F>,
}

#[derive(Debug)]
pub struct Candidate<F: AddressFamily> {
    pub msg: InternalMessage<F>,
    pub igp_distance: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteRejectReason {
    LocalPrefLower,
    AsPathLonger,
    OriginTypeHigher,
    MedHigher,
    PreferExternal,
    NexthopCostHigher,
    HigherRouterId,
    LongerClusterList,
    HigherPeerAddress,
    HigherPeerId,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteCompare {
    Preferred(RouteRejectReason),
    LessPreferred(RouteRejectReason),
}

// ===== impl DecisionTable =====

impl<F> DecisionTable<F>
where
    F: AddressFamily,
{
    pub fn new(id: TableId) -> DecisionTable<F> {
        DecisionTable {
            id,
            next: None,
            parents: Default::default(),
            _marker: Default::default(),
        }
    }

    pub fn add_parent(&mut self, parent: TableId, peer: PeerHandle) {
        self.parents.insert(parent, peer);
    }

    pub fn remove_parent(&mut self, parent: TableId) {
        self.parents.remove(&parent);
    }

    pub fn parent_count(&self) -> usize {
        self.parents.len()
    }

    // Routes for the given prefix from all branches but the caller's.
    fn alternatives(
        &self,
        net: &F::IpNetwork,
        caller: TableId,
        tables: &Tables<F>,
    ) -> Vec<InternalMessage<F>> {
        self.parents
            .keys()
            .filter(|parent| **parent != caller)
            .filter_map(|parent| tables.lookup_route(*parent, net))
            .collect()
    }

    // Runs the decision process over the given routes.
    fn best_path(
        &self,
        routes: impl IntoIterator<Item = InternalMessage<F>>,
        tables: &Tables<F>,
    ) -> Option<Candidate<F>> {
        let mut best: Option<Candidate<F>> = None;
        for msg in routes {
            // First, check if the route is eligible.
            let Some(candidate) = Candidate::new(msg, tables) else {
                continue;
            };

            match &best {
                None => best = Some(candidate),
                Some(best_route) => {
                    if let RouteCompare::Preferred(_) =
                        candidate.compare(best_route, &tables.config)
                    {
                        best = Some(candidate);
                    }
                }
            }
        }
        best
    }

    // Moves the winner flag and propagates the change downstream.
    //
    // With `force` set, a winner replaced by a new version of itself is
    // still sent downstream.
    fn transition(
        &self,
        net: F::IpNetwork,
        old: Option<InternalMessage<F>>,
        new: Option<Candidate<F>>,
        force: bool,
        tables: &mut Tables<F>,
    ) {
        let next = self.downstream();
        match (old, new) {
            (None, None) => {}
            (Some(old), None) => {
                Debug::BestPathNotFound(net.into()).log();
                old.route.set_is_not_winner();
                tables.delete_route(next, old, self.id);
            }
            (None, Some(new)) => {
                Debug::BestPathFound(net.into(), &new.msg.origin).log();
                new.msg.route.set_is_winner(new.igp_distance);
                tables.add_route(next, new.msg, self.id);
            }
            (Some(old), Some(new)) => {
                if Rc::ptr_eq(&old.route, &new.msg.route) && !force {
                    // Same winner, possibly with an updated IGP distance.
                    new.msg.route.set_is_winner(new.igp_distance);
                    return;
                }
                Debug::BestPathFound(net.into(), &new.msg.origin).log();
                old.route.set_is_not_winner();
                new.msg.route.set_is_winner(new.igp_distance);
                tables.replace_route(next, old, new.msg, self.id);
            }
        }
    }
}

impl<F> RouteSink<F> for DecisionTable<F>
where
    F: AddressFamily,
{
    fn id(&self) -> TableId {
        self.id
    }

    fn next_table(&self) -> Option<TableId> {
        self.next
    }

    fn set_next_table(&mut self, next: Option<TableId>) {
        self.next = next;
    }

    // Parents are managed with `add_parent` and `remove_parent`.
    fn set_parent_table(&mut self, _parent: Option<TableId>) {}

    fn add_route(
        &mut self,
        msg: InternalMessage<F>,
        caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        let net = msg.net();
        let alternatives = self.alternatives(&net, caller, tables);
        let old_winner = alternatives
            .iter()
            .find(|alt| alt.route.is_winner())
            .cloned();

        let route = msg.route.clone();
        let mut routes = alternatives;
        routes.push(msg);
        let new_winner = self.best_path(routes, tables);
        self.transition(net, old_winner, new_winner, false, tables);

        if route.is_winner() {
            AddRouteResult::Used
        } else {
            AddRouteResult::Unused
        }
    }

    fn replace_route(
        &mut self,
        old: InternalMessage<F>,
        new: InternalMessage<F>,
        caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        let net = new.net();
        let alternatives = self.alternatives(&net, caller, tables);
        let old_winner = if old.route.is_winner() {
            Some(old)
        } else {
            alternatives.iter().find(|alt| alt.route.is_winner()).cloned()
        };
        let force = old_winner
            .as_ref()
            .is_some_and(|winner| winner.origin == new.origin);

        let route = new.route.clone();
        let mut routes = alternatives;
        routes.push(new);
        let new_winner = self.best_path(routes, tables);
        self.transition(net, old_winner, new_winner, force, tables);

        if route.is_winner() {
            AddRouteResult::Used
        } else {
            AddRouteResult::Unused
        }
    }

    fn delete_route(
        &mut self,
        msg: InternalMessage<F>,
        caller: TableId,
        tables: &mut Tables<F>,
    ) {
        if !msg.route.is_winner() {
            return;
        }

        let net = msg.net();
        let alternatives = self.alternatives(&net, caller, tables);
        let new_winner = self.best_path(alternatives, tables);
        self.transition(net, Some(msg), new_winner, true, tables);
    }
}

impl<F> RouteSource<F> for DecisionTable<F>
where
    F: AddressFamily,
{
    fn lookup_route(
        &self,
        net: &F::IpNetwork,
        tables: &Tables<F>,
    ) -> Option<InternalMessage<F>> {
        self.parents
            .keys()
            .filter_map(|parent| tables.lookup_route(*parent, net))
            .find(|msg| msg.route.is_winner())
    }
}

// ===== impl Candidate =====

impl<F> Candidate<F>
where
    F: AddressFamily,
{
    // Returns `None` if the route can't be selected.
    //
    // Filtered routes never get here: the import stages drop them, and their
    // lookups don't return them.
    pub fn new(msg: InternalMessage<F>, tables: &Tables<F>) -> Option<Self> {
        // Routes without a next hop are local and always usable.
        let igp_distance = match F::nexthop(msg.route.base()) {
            Some(addr) => tables.resolver.igp_distance(addr)?,
            None => 0,
        };

        Some(Candidate { msg, igp_distance })
    }

    pub fn compare(&self, other: &Self, cfg: &RibCfg) -> RouteCompare {
        let a_attrs = self.msg.route.base();
        let b_attrs = other.msg.route.base();
        let a_peer = &self.msg.origin;
        let b_peer = &other.msg.origin;

        // Compare LOCAL_PREFERENCE attributes.
        let a = a_attrs.local_pref.unwrap_or(cfg.default_local_pref);
        let b = b_attrs.local_pref.unwrap_or(cfg.default_local_pref);
        let reason = RouteRejectReason::LocalPrefLower;
        match a.cmp(&b) {
            Ordering::Less => {
                return RouteCompare::LessPreferred(reason);
            }
            Ordering::Greater => {
                return RouteCompare::Preferred(reason);
            }
            Ordering::Equal => {
                // Move to next tie-breaker.
            }
        }

        // Compare AS_PATH lengths.
        if !cfg.route_selection.ignore_as_path_length {
            let a = a_attrs.as_path.path_length();
            let b = b_attrs.as_path.path_length();
            let reason = RouteRejectReason::AsPathLonger;
            match a.cmp(&b) {
                Ordering::Less => {
                    return RouteCompare::Preferred(reason);
                }
                Ordering::Greater => {
                    return RouteCompare::LessPreferred(reason);
                }
                Ordering::Equal => {
                    // Move to next tie-breaker.
                }
            }
        }

        // Compare ORIGIN attributes.
        let reason = RouteRejectReason::OriginTypeHigher;
        match a_attrs.origin.cmp(&b_attrs.origin) {
            Ordering::Less => {
                return RouteCompare::Preferred(reason);
            }
            Ordering::Greater => {
                return RouteCompare::LessPreferred(reason);
            }
            Ordering::Equal => {
                // Move to next tie-breaker.
            }
        }

        // Compare MULTI_EXIT_DISC attributes.
        let a_nbr_as = a_attrs.as_path.first();
        let b_nbr_as = b_attrs.as_path.first();
        if cfg.route_selection.always_compare_med || a_nbr_as == b_nbr_as {
            let a = a_attrs.med.unwrap_or(0);
            let b = b_attrs.med.unwrap_or(0);
            let reason = RouteRejectReason::MedHigher;
            match a.cmp(&b) {
                Ordering::Less => {
                    return RouteCompare::Preferred(reason);
                }
                Ordering::Greater => {
                    return RouteCompare::LessPreferred(reason);
                }
                Ordering::Equal => {
                    // Move to next tie-breaker.
                }
            }
        }

        // Prefer eBGP routes.
        let a = a_peer.peer_type.route_type();
        let b = b_peer.peer_type.route_type();
        let reason = RouteRejectReason::PreferExternal;
        match a.cmp(&b) {
            Ordering::Less => {
                return RouteCompare::LessPreferred(reason);
            }
            Ordering::Greater => {
                return RouteCompare::Preferred(reason);
            }
            Ordering::Equal => {
                // Move to next tie-breaker.
            }
        }

        // Compare IGP costs.
        let reason = RouteRejectReason::NexthopCostHigher;
        match self.igp_distance.cmp(&other.igp_distance) {
            Ordering::Less => {
                return RouteCompare::Preferred(reason);
            }
            Ordering::Greater => {
                return RouteCompare::LessPreferred(reason);
            }
            Ordering::Equal => {
                // Move to next tie-breaker.
            }
        }

        // Compare BGP identifiers (ORIGINATOR_ID of reflected routes).
        let a = a_attrs.originator_id.unwrap_or(a_peer.router_id);
        let b = b_attrs.originator_id.unwrap_or(b_peer.router_id);
        let reason = RouteRejectReason::HigherRouterId;
        match a.cmp(&b) {
            Ordering::Less => {
                return RouteCompare::Preferred(reason);
            }
            Ordering::Greater => {
                return RouteCompare::LessPreferred(reason);
            }
            Ordering::Equal => {
                // Move to next tie-breaker.
            }
        }

        // Compare CLUSTER_LIST lengths.
        let a = a_attrs.cluster_list.as_ref().map_or(0, |list| list.len());
        let b = b_attrs.cluster_list.as_ref().map_or(0, |list| list.len());
        let reason = RouteRejectReason::LongerClusterList;
        match a.cmp(&b) {
            Ordering::Less => {
                return RouteCompare::Preferred(reason);
            }
            Ordering::Greater => {
                return RouteCompare::LessPreferred(reason);
            }
            Ordering::Equal => {
                // Move to next tie-breaker.
            }
        }

        // Compare peer IP addresses.
        let reason = RouteRejectReason::HigherPeerAddress;
        match a_peer.remote_addr.cmp(&b_peer.remote_addr) {
            Ordering::Less => {
                return RouteCompare::Preferred(reason);
            }
            Ordering::Greater => {
                return RouteCompare::LessPreferred(reason);
            }
            Ordering::Equal => {
                // Move to next tie-breaker.
            }
        }

        // Last resort, to keep the order total.
        let reason = RouteRejectReason::HigherPeerId;
        match a_peer.id.cmp(&b_peer.id) {
            Ordering::Less => RouteCompare::Preferred(reason),
            _ => RouteCompare::LessPreferred(reason),
        }
    }
}

// ===== unit tests =====
