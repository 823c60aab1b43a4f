//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use crate::af::AddressFamily;
use crate::peer::PeerHandle;
use crate::policy::{
    PolicyDirection, PolicyResult, RoutePolicyInfo, process_policies,
};
use crate::route::{AddRouteResult, InternalMessage, SubnetRoute};
use crate::table::{RouteSink, RouteSource, TableId, Tables};

// Routing policy stage.
//
// Accepted routes are remembered, since the outcome of a policy can change
// between the announcement of a route and its withdrawal.
#[derive(Debug)]
pub struct PolicyTable<F: AddressFamily> {
    id: TableId,
    parent: Option<TableId>,
    next: Option<TableId>,
    direction: PolicyDirection,
    // Peer the routes are sent to (export only).
    target: Option<PeerHandle>,
    accepted: BTreeMap<F::IpNetwork, InternalMessage<F>>,
}

// ===== impl PolicyTable =====

impl<F> PolicyTable<F>
where
    F: AddressFamily,
{
    pub fn new(
        id: TableId,
        direction: PolicyDirection,
        target: Option<PeerHandle>,
    ) -> PolicyTable<F> {
        PolicyTable {
            id,
            parent: None,
            next: None,
            direction,
            target,
            accepted: Default::default(),
        }
    }

    pub fn direction(&self) -> PolicyDirection {
        self.direction
    }

    pub fn route_count(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    // Runs the route through the policies of this stage's direction.
    fn apply(
        &self,
        msg: &InternalMessage<F>,
        tables: &mut Tables<F>,
    ) -> Option<InternalMessage<F>> {
        let cfg = tables.policies.direction(self.direction);
        if cfg.policies.is_empty() && cfg.default_policy.is_accept() {
            return Some(msg.clone());
        }

        let route = &msg.route;
        let nbr_addr = match &self.target {
            Some(target) => target.remote_addr,
            None => msg.origin.remote_addr,
        };
        let rpinfo = RoutePolicyInfo::new(
            msg.net().into(),
            nbr_addr,
            msg.origin.peer_type.route_type(),
            route.attrs().clone(),
            route.policy_tags.clone(),
            route.igp_metric(),
        );
        match process_policies(rpinfo, cfg, &tables.policies.match_sets) {
            PolicyResult::Accept(rpinfo) => {
                if rpinfo.attrs == *route.attrs()
                    && rpinfo.tags == route.policy_tags
                {
                    return Some(msg.clone());
                }
                let attrs = tables.attr_sets.get(&rpinfo.attrs);
                let route = SubnetRoute::derive(route, attrs, rpinfo.tags);
                Some(msg.with_route(route))
            }
            PolicyResult::Reject => None,
        }
    }
}

impl<F> RouteSink<F> for PolicyTable<F>
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

    fn set_parent_table(&mut self, parent: Option<TableId>) {
        self.parent = parent;
    }

    fn add_route(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        let Some(msg) = self.apply(&msg, tables) else {
            return AddRouteResult::Filtered;
        };
        self.accepted.insert(msg.net(), msg.clone());
        tables.add_route(self.downstream(), msg, self.id)
    }

    fn replace_route(
        &mut self,
        old: InternalMessage<F>,
        new: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        let next = self.downstream();
        let old = self.accepted.remove(&old.net());
        let new = self.apply(&new, tables);
        if let Some(new) = &new {
            self.accepted.insert(new.net(), new.clone());
        }

        match (old, new) {
            (None, None) => AddRouteResult::Filtered,
            (Some(old), None) => {
                tables.delete_route(next, old, self.id);
                AddRouteResult::Filtered
            }
            (None, Some(new)) => tables.add_route(next, new, self.id),
            (Some(old), Some(new)) => {
                tables.replace_route(next, old, new, self.id)
            }
        }
    }

    fn delete_route(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        if let Some(msg) = self.accepted.remove(&msg.net()) {
            tables.delete_route(self.downstream(), msg, self.id);
        }
    }

    fn route_dump(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        let Some(msg) = self.apply(&msg, tables) else {
            return AddRouteResult::Filtered;
        };
        self.accepted.insert(msg.net(), msg.clone());
        tables.route_dump(self.downstream(), msg, self.id)
    }
}

impl<F> RouteSource<F> for PolicyTable<F>
where
    F: AddressFamily,
{
    fn lookup_route(
        &self,
        net: &F::IpNetwork,
        _tables: &Tables<F>,
    ) -> Option<InternalMessage<F>> {
        self.accepted.get(net).cloned()
    }
}
