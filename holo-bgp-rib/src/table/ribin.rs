//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::rc::Rc;

use holo_utils::ip::IpNetworkKind;

use crate::af::AddressFamily;
use crate::attribute::RouteAttrs;
use crate::debug::Debug;
use crate::error::Error;
use crate::peer::PeerHandle;
use crate::route::{
    AddRouteResult, AggrMarker, GENID_UNKNOWN, Genid, InternalMessage,
    RouteRef, SubnetRoute, next_genid,
};
use crate::table::deletion::DeletionTable;
use crate::table::{RouteSink, RouteSource, RouteTable, TableId, Tables};
use crate::tasks::messages::input::{PipelineMsg, TableSliceMsg};

// Routes received from a single peer.
#[derive(Debug)]
pub struct RibInTable<F: AddressFamily> {
    id: TableId,
    next: Option<TableId>,
    peer: PeerHandle,
    genid: Genid,
    up: bool,
    routes: BTreeMap<F::IpNetwork, RouteRef<F>>,
    // Secondary index used to find the routes affected by IGP changes.
    nexthops: BTreeMap<F::IpAddr, BTreeSet<F::IpNetwork>>,
    nexthop_push: NexthopPush<F>,
    // Cursor of an ongoing route push.
    route_push: Option<Option<F::IpNetwork>>,
}

#[derive(Debug)]
struct NexthopPush<F: AddressFamily> {
    changed: BTreeSet<F::IpAddr>,
    scheduled: bool,
}

// ===== impl RibInTable =====

impl<F> RibInTable<F>
where
    F: AddressFamily,
{
    pub fn new(id: TableId, peer: PeerHandle) -> RibInTable<F> {
        RibInTable {
            id,
            next: None,
            peer,
            genid: next_genid(GENID_UNKNOWN),
            up: false,
            routes: Default::default(),
            nexthops: Default::default(),
            nexthop_push: NexthopPush {
                changed: Default::default(),
                scheduled: false,
            },
            route_push: None,
        }
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    pub fn genid(&self) -> Genid {
        self.genid
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn routes(&self) -> &BTreeMap<F::IpNetwork, RouteRef<F>> {
        &self.routes
    }

    // Returns the first stored prefix after `last`.
    pub fn next_prefix(
        &self,
        last: Option<&F::IpNetwork>,
    ) -> Option<F::IpNetwork> {
        let lower = match last {
            Some(last) => Bound::Excluded(last),
            None => Bound::Unbounded,
        };
        self.routes
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(net, _)| *net)
    }

    // Returns the first stored prefix that may lie within `range`.
    pub fn first_prefix_within(
        &self,
        range: &F::IpNetwork,
    ) -> Option<F::IpNetwork> {
        let start = F::IpNetwork::new(range.apply_mask().ip(), 0).ok()?;
        self.routes.range(start..).next().map(|(net, _)| *net)
    }

    // Next hops of stored routes covered by the given IGP prefix.
    pub fn nexthops_within(&self, prefix: &F::IpNetwork) -> Vec<F::IpAddr> {
        self.nexthops
            .keys()
            .filter(|addr| prefix.contains(**addr))
            .copied()
            .collect()
    }

    pub fn add_route(
        &mut self,
        net: F::IpNetwork,
        attrs: RouteAttrs,
        aggr: AggrMarker,
        tables: &mut Tables<F>,
    ) -> Result<AddRouteResult, Error> {
        if !self.up {
            return Err(Error::PeerDown(self.peer.id));
        }

        let old_route = self.routes.get(&net).cloned();
        if let Some(old_route) = &old_route
            && Rc::ptr_eq(&old_route.attrs, &attrs)
            && old_route.aggr == aggr
        {
            // Nothing changed.
            return Ok(old_route.recorded_result());
        }

        let route = SubnetRoute::new(net, attrs, aggr);
        if let Some(old_route) = &old_route {
            self.nexthop_unindex(old_route);
        }
        self.nexthop_index(&route);
        self.routes.insert(net, route.clone());

        let next = self.downstream();
        let msg = self.message(route.clone());
        let result = match old_route {
            // The old route is kept alive by this reference until the
            // replace returns.
            Some(old_route) => {
                let old_msg = self.message(old_route);
                tables.replace_route(next, old_msg, msg, self.id)
            }
            None => tables.add_route(next, msg, self.id),
        };
        route.record_result(result);

        Ok(result)
    }

    pub fn delete_route(
        &mut self,
        net: F::IpNetwork,
        tables: &mut Tables<F>,
    ) -> Result<(), Error> {
        let Some(route) = self.routes.remove(&net) else {
            return Err(Error::PrefixUnknown(self.peer.id, net.into()));
        };
        self.nexthop_unindex(&route);

        let msg = self.message(route);
        tables.delete_route(self.downstream(), msg, self.id);

        Ok(())
    }

    pub fn push(&mut self, tables: &mut Tables<F>) {
        tables.push(self.downstream(), self.id);
    }

    pub fn peering_went_down(&mut self, tables: &mut Tables<F>) {
        let old_genid = self.genid;
        Debug::PeeringDown(&self.peer, old_genid).log();

        self.up = false;
        self.genid = next_genid(self.genid);
        self.nexthops.clear();
        self.nexthop_push.changed.clear();
        self.route_push = None;

        let next = self.downstream();
        if self.routes.is_empty() {
            tables.peering_went_down(next, &self.peer, old_genid, self.id);
            tables.peering_down_complete(next, &self.peer, old_genid, self.id);
            return;
        }

        // Hand the old routes over to a deletion stage spliced right after
        // this table. Routes of the new session will go through it.
        let routes = std::mem::take(&mut self.routes);
        let peer = self.peer.clone();
        let parent = self.id;
        let deletion = tables.insert(|id| {
            RouteTable::Deletion(DeletionTable::new(
                id, parent, next, peer, old_genid, routes,
            ))
        });
        tables
            .get_mut(next)
            .sink_mut()
            .set_parent_table(Some(deletion));
        self.next = Some(deletion);

        tables.peering_went_down(deletion, &self.peer, old_genid, self.id);
        tables.with_table_as(
            deletion,
            RouteTable::as_deletion_mut,
            |deletion, tables| deletion.start(tables),
        );
    }

    pub fn peering_came_up(&mut self, tables: &mut Tables<F>) {
        Debug::PeeringUp(&self.peer, self.genid).log();

        self.up = true;
        tables.peering_came_up(
            self.downstream(),
            &self.peer,
            self.genid,
            self.id,
        );
    }

    // Queues the re-evaluation of all routes using the given next hop.
    pub fn igp_nexthop_changed(
        &mut self,
        addr: F::IpAddr,
        tables: &mut Tables<F>,
    ) {
        if !self.up || !self.nexthops.contains_key(&addr) {
            return;
        }

        self.nexthop_push.changed.insert(addr);
        if !self.nexthop_push.scheduled {
            self.nexthop_push.scheduled = true;
            tables.schedule(PipelineMsg::NexthopPush(self.slice_msg()));
        }
    }

    // Re-presents the routes of one changed next hop downstream.
    pub fn nexthop_push_slice(&mut self, tables: &mut Tables<F>) {
        self.nexthop_push.scheduled = false;

        let Some(addr) = self.nexthop_push.changed.pop_first() else {
            return;
        };
        let nets = self.nexthops.get(&addr).cloned().unwrap_or_default();
        Debug::NexthopPush(&self.peer, addr.into(), nets.len()).log();

        let next = self.downstream();
        for net in nets {
            let Some(route) = self.routes.get(&net).cloned() else {
                continue;
            };
            let mut msg = self.message(route.clone());
            msg.reevaluate = true;
            tables.delete_route(next, msg.clone(), self.id);
            let result = tables.add_route(next, msg, self.id);
            route.record_result(result);
        }
        tables.push(next, self.id);

        if !self.nexthop_push.changed.is_empty() {
            self.nexthop_push.scheduled = true;
            tables.schedule(PipelineMsg::NexthopPush(self.slice_msg()));
        }
    }

    // Starts re-sending all stored routes downstream, so that new policies
    // are applied to them.
    pub fn start_route_push(&mut self, tables: &mut Tables<F>) {
        if !self.up || self.routes.is_empty() {
            return;
        }

        let running = self.route_push.is_some();
        self.route_push = Some(None);
        if !running {
            tables.schedule(PipelineMsg::RoutePush(self.slice_msg()));
        }
    }

    pub fn route_push_slice(&mut self, tables: &mut Tables<F>) {
        let Some(mut last) = self.route_push.take() else {
            return;
        };

        let next = self.downstream();
        let batch = tables.config.route_push_batch.max(1);
        for _ in 0..batch {
            let Some(net) = self.next_prefix(last.as_ref()) else {
                break;
            };
            last = Some(net);

            let route = self.routes[&net].clone();
            let mut msg = self.message(route.clone());
            msg.reevaluate = true;
            let result = tables.replace_route(next, msg.clone(), msg, self.id);
            route.record_result(result);
        }
        tables.push(next, self.id);

        if self.next_prefix(last.as_ref()).is_some() {
            self.route_push = Some(last);
            tables.schedule(PipelineMsg::RoutePush(self.slice_msg()));
        }
    }

    fn message(&self, route: RouteRef<F>) -> InternalMessage<F> {
        InternalMessage::new(route, self.peer.clone(), self.genid)
    }

    fn slice_msg(&self) -> TableSliceMsg {
        TableSliceMsg {
            afi_safi: F::AFI_SAFI,
            table: self.id,
        }
    }

    fn nexthop_index(&mut self, route: &RouteRef<F>) {
        if let Some(addr) = F::nexthop(route.base()) {
            self.nexthops.entry(addr).or_default().insert(route.net);
        }
    }

    fn nexthop_unindex(&mut self, route: &RouteRef<F>) {
        if let Some(addr) = F::nexthop(route.base())
            && let Some(nets) = self.nexthops.get_mut(&addr)
        {
            nets.remove(&route.net);
            if nets.is_empty() {
                self.nexthops.remove(&addr);
            }
        }
    }
}

impl<F> RouteSink<F> for RibInTable<F>
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

    fn set_parent_table(&mut self, _parent: Option<TableId>) {}

    // The RibIn table is the head of its branch.
    fn add_route(
        &mut self,
        _msg: InternalMessage<F>,
        _caller: TableId,
        _tables: &mut Tables<F>,
    ) -> AddRouteResult {
        unreachable!()
    }

    fn replace_route(
        &mut self,
        _old: InternalMessage<F>,
        _new: InternalMessage<F>,
        _caller: TableId,
        _tables: &mut Tables<F>,
    ) -> AddRouteResult {
        unreachable!()
    }

    fn delete_route(
        &mut self,
        _msg: InternalMessage<F>,
        _caller: TableId,
        _tables: &mut Tables<F>,
    ) {
        unreachable!()
    }
}

impl<F> RouteSource<F> for RibInTable<F>
where
    F: AddressFamily,
{
    fn lookup_route(
        &self,
        net: &F::IpNetwork,
        _tables: &Tables<F>,
    ) -> Option<InternalMessage<F>> {
        self.routes
            .get(net)
            .map(|route| self.message(route.clone()))
    }
}
