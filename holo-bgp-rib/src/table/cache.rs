//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use crate::af::AddressFamily;
use crate::route::{AddRouteResult, InternalMessage};
use crate::table::{RouteSink, RouteSource, TableId, Tables};

// Keeps the routes modified by the preceding filter stage.
//
// Filters don't store anything, so a modified route would be rebuilt from
// scratch on withdrawal. The cache hands the exact route that was announced
// to the downstream stages instead.
#[derive(Debug)]
pub struct CacheTable<F: AddressFamily> {
    id: TableId,
    parent: Option<TableId>,
    next: Option<TableId>,
    routes: BTreeMap<F::IpNetwork, InternalMessage<F>>,
}

// ===== impl CacheTable =====

impl<F> CacheTable<F>
where
    F: AddressFamily,
{
    pub fn new(id: TableId) -> CacheTable<F> {
        CacheTable {
            id,
            parent: None,
            next: None,
            routes: Default::default(),
        }
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn get(&self, net: &F::IpNetwork) -> Option<&InternalMessage<F>> {
        self.routes.get(net)
    }

    fn store(&mut self, msg: &InternalMessage<F>) {
        if msg.changed {
            self.routes.insert(msg.net(), msg.clone());
        }
    }
}

impl<F> RouteSink<F> for CacheTable<F>
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
        self.store(&msg);
        tables.add_route(self.downstream(), msg, self.id)
    }

    fn replace_route(
        &mut self,
        old: InternalMessage<F>,
        new: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        let old = self.routes.remove(&old.net()).unwrap_or(old);
        self.store(&new);
        tables.replace_route(self.downstream(), old, new, self.id)
    }

    fn delete_route(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        let msg = self.routes.remove(&msg.net()).unwrap_or(msg);
        tables.delete_route(self.downstream(), msg, self.id)
    }

    fn route_dump(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        self.store(&msg);
        tables.route_dump(self.downstream(), msg, self.id)
    }
}

impl<F> RouteSource<F> for CacheTable<F>
where
    F: AddressFamily,
{
    fn lookup_route(
        &self,
        net: &F::IpNetwork,
        tables: &Tables<F>,
    ) -> Option<InternalMessage<F>> {
        match self.routes.get(net) {
            Some(msg) => Some(msg.clone()),
            None => tables.lookup_route(self.parent?, net),
        }
    }
}
