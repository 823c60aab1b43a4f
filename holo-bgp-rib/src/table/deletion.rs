//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use crate::af::AddressFamily;
use crate::debug::Debug;
use crate::peer::PeerHandle;
use crate::route::{AddRouteResult, Genid, InternalMessage, RouteRef};
use crate::table::{RouteSink, RouteSource, TableId, Tables};
use crate::tasks::messages::input::{PipelineMsg, TableSliceMsg};

// Background removal of the routes of a session that went down.
//
// The table sits between the peer's RibIn and the rest of the pipeline until
// all old routes are withdrawn, so that a route of the new session can never
// overtake the withdrawal of the same prefix from the old one.
#[derive(Debug)]
pub struct DeletionTable<F: AddressFamily> {
    id: TableId,
    parent: TableId,
    next: TableId,
    peer: PeerHandle,
    genid: Genid,
    routes: BTreeMap<F::IpNetwork, RouteRef<F>>,
}

// ===== impl DeletionTable =====

impl<F> DeletionTable<F>
where
    F: AddressFamily,
{
    pub fn new(
        id: TableId,
        parent: TableId,
        next: TableId,
        peer: PeerHandle,
        genid: Genid,
        routes: BTreeMap<F::IpNetwork, RouteRef<F>>,
    ) -> DeletionTable<F> {
        DeletionTable {
            id,
            parent,
            next,
            peer,
            genid,
            routes,
        }
    }

    pub fn genid(&self) -> Genid {
        self.genid
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn start(&mut self, tables: &mut Tables<F>) {
        Debug::DeletionStart(&self.peer, self.genid, self.routes.len()).log();
        self.schedule(tables);
    }

    // Withdraws the next batch of routes.
    //
    // Returns `true` once the table is done and has been removed from the
    // pipeline.
    pub fn deletion_slice(&mut self, tables: &mut Tables<F>) -> bool {
        let batch = tables.config.deletion_batch.max(1);
        for _ in 0..batch {
            let Some((_, route)) = self.routes.pop_first() else {
                break;
            };
            let msg = self.message(route);
            tables.delete_route(self.next, msg, self.id);
        }
        tables.push(self.next, self.id);

        if !self.routes.is_empty() {
            self.schedule(tables);
            return false;
        }

        self.finish(tables);
        true
    }

    // Withdraws all remaining routes at once.
    pub fn drain(&mut self, tables: &mut Tables<F>) {
        while !self.deletion_slice(tables) {}
    }

    fn finish(&mut self, tables: &mut Tables<F>) {
        Debug::DeletionFinish(&self.peer, self.genid).log();
        tables.peering_down_complete(
            self.next, &self.peer, self.genid, self.id,
        );

        // Unplumb.
        tables
            .get_mut(self.parent)
            .sink_mut()
            .set_next_table(Some(self.next));
        tables
            .get_mut(self.next)
            .sink_mut()
            .set_parent_table(Some(self.parent));
        tables.remove(self.id);
    }

    fn schedule(&self, tables: &Tables<F>) {
        tables.schedule(PipelineMsg::DeletionSlice(TableSliceMsg {
            afi_safi: F::AFI_SAFI,
            table: self.id,
        }));
    }

    fn message(&self, route: RouteRef<F>) -> InternalMessage<F> {
        let mut msg =
            InternalMessage::new(route, self.peer.clone(), self.genid);
        msg.from_previous_peering = true;
        msg
    }
}

impl<F> RouteSink<F> for DeletionTable<F>
where
    F: AddressFamily,
{
    fn id(&self) -> TableId {
        self.id
    }

    fn next_table(&self) -> Option<TableId> {
        Some(self.next)
    }

    fn set_next_table(&mut self, next: Option<TableId>) {
        if let Some(next) = next {
            self.next = next;
        }
    }

    fn set_parent_table(&mut self, parent: Option<TableId>) {
        if let Some(parent) = parent {
            self.parent = parent;
        }
    }

    fn add_route(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        // A route of the new session replaces the old one not yet deleted.
        match self.routes.remove(&msg.net()) {
            Some(old_route) => {
                let old_msg = self.message(old_route);
                tables.replace_route(self.next, old_msg, msg, self.id)
            }
            None => tables.add_route(self.next, msg, self.id),
        }
    }

    fn replace_route(
        &mut self,
        old: InternalMessage<F>,
        new: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        tables.replace_route(self.next, old, new, self.id)
    }

    fn delete_route(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        tables.delete_route(self.next, msg, self.id)
    }
}

impl<F> RouteSource<F> for DeletionTable<F>
where
    F: AddressFamily,
{
    fn lookup_route(
        &self,
        net: &F::IpNetwork,
        tables: &Tables<F>,
    ) -> Option<InternalMessage<F>> {
        match self.routes.get(net) {
            Some(route) => Some(self.message(route.clone())),
            None => tables.lookup_route(self.parent, net),
        }
    }
}
