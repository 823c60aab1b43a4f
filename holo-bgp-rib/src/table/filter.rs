//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use crate::af::AddressFamily;
use crate::attribute::AttrSet;
use crate::debug::Debug;
use crate::filter::{RouteFilter, apply_filters};
use crate::peer::{PeerHandle, PeerId};
use crate::policy::PolicyDirection;
use crate::route::{AddRouteResult, Genid, InternalMessage, SubnetRoute};
use crate::table::{RouteSink, RouteSource, TableId, Tables};

// Static filters of one peer, in one direction.
//
// Filter banks are versioned. Routes of a given session keep being handled
// by the version that was current when the first of them went through,
// and a retired version is released only once all of its routes are gone.
#[derive(Debug)]
pub struct FilterTable<F: AddressFamily> {
    id: TableId,
    parent: Option<TableId>,
    next: Option<TableId>,
    peer: PeerHandle,
    direction: PolicyDirection,
    versions: BTreeMap<u32, FilterVersion>,
    genid_map: BTreeMap<(PeerId, Genid), u32>,
    current: u32,
    next_version: u32,
    // Filters of the next version, not installed yet.
    pending: Vec<RouteFilter>,
    _marker: std::marker::PhantomData<F>,
}

#[derive(Debug, Default)]
pub struct FilterVersion {
    pub filters: Vec<RouteFilter>,
    // Routes that went through this version and weren't deleted yet.
    pub ref_count: usize,
}

// ===== impl FilterTable =====

impl<F> FilterTable<F>
where
    F: AddressFamily,
{
    pub fn new(
        id: TableId,
        peer: PeerHandle,
        direction: PolicyDirection,
    ) -> FilterTable<F> {
        FilterTable {
            id,
            parent: None,
            next: None,
            peer,
            direction,
            versions: [(0, FilterVersion::default())].into(),
            genid_map: Default::default(),
            current: 0,
            next_version: 1,
            pending: Default::default(),
            _marker: Default::default(),
        }
    }

    pub fn add_filter(&mut self, filter: RouteFilter) {
        self.pending.push(filter);
    }

    // Installs the filters added since the last reconfiguration as the new
    // current version.
    pub fn reconfigure_filter(&mut self) {
        let version = self.next_version;
        self.next_version += 1;
        self.versions.insert(
            version,
            FilterVersion {
                filters: std::mem::take(&mut self.pending),
                ref_count: 0,
            },
        );
        let old = std::mem::replace(&mut self.current, version);
        Debug::FilterReconfigure(&self.peer, self.direction, version).log();

        if self.versions[&old].ref_count == 0 {
            self.release(old);
        }
    }

    pub fn current_version(&self) -> u32 {
        self.current
    }

    pub fn current_filters(&self) -> &[RouteFilter] {
        &self.versions[&self.current].filters
    }

    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    pub fn ref_count(&self, version: u32) -> Option<usize> {
        self.versions.get(&version).map(|version| version.ref_count)
    }

    // Binds the route's session to a filter version and takes a reference
    // on it.
    fn acquire(&mut self, msg: &InternalMessage<F>) -> u32 {
        let version = *self
            .genid_map
            .entry((msg.origin.id, msg.genid))
            .or_insert(self.current);
        self.version_mut(version).ref_count += 1;
        version
    }

    fn unref(&mut self, msg: &InternalMessage<F>) -> u32 {
        let key = (msg.origin.id, msg.genid);
        let Some(version) = self.genid_map.get(&key).copied() else {
            panic!(
                "{:?}: no filter version for peer {} genid {}",
                self.id, msg.origin, msg.genid
            );
        };
        let filter_version = self.version_mut(version);
        filter_version.ref_count = filter_version
            .ref_count
            .checked_sub(1)
            .unwrap_or_else(|| panic!("filter version {} underflow", version));
        version
    }

    // Frees a retired version once its last route is gone.
    fn release_unused(&mut self, version: u32) {
        if version != self.current && self.versions[&version].ref_count == 0 {
            self.release(version);
        }
    }

    fn release(&mut self, version: u32) {
        Debug::FilterVersionRelease(&self.peer, self.direction, version).log();
        self.versions.remove(&version);
        self.genid_map.retain(|_, mapped| *mapped != version);
    }

    fn version_mut(&mut self, version: u32) -> &mut FilterVersion {
        match self.versions.get_mut(&version) {
            Some(filter_version) => filter_version,
            None => {
                panic!("{:?}: filter version {} not found", self.id, version)
            }
        }
    }

    // Runs the route through the filters of the given version.
    fn apply(
        &self,
        version: u32,
        msg: &InternalMessage<F>,
        tables: &mut Tables<F>,
    ) -> Option<InternalMessage<F>> {
        let filters = &self.versions[&version].filters;
        match apply_filters(filters, msg)? {
            None => Some(msg.clone()),
            Some(attrs) => {
                let attrs = tables.attr_sets.get(&attrs);
                let route = SubnetRoute::derive(
                    &msg.route,
                    attrs,
                    msg.route.policy_tags.clone(),
                );
                Some(msg.with_route(route))
            }
        }
    }
}

impl<F> RouteSink<F> for FilterTable<F>
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
        let version = self.acquire(&msg);
        match self.apply(version, &msg, tables) {
            Some(msg) => tables.add_route(self.downstream(), msg, self.id),
            None => AddRouteResult::Filtered,
        }
    }

    fn replace_route(
        &mut self,
        old: InternalMessage<F>,
        new: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        let next = self.downstream();

        // Reference the new version first, in case both are the same.
        let new_version = self.acquire(&new);
        let old_version = self.unref(&old);
        let new = self.apply(new_version, &new, tables);
        let old = self.apply(old_version, &old, tables);
        self.release_unused(old_version);

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
        let version = self.unref(&msg);
        let filtered = self.apply(version, &msg, tables);
        self.release_unused(version);

        if let Some(msg) = filtered {
            tables.delete_route(self.downstream(), msg, self.id);
        }
    }

    fn route_dump(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        let version = self.acquire(&msg);
        match self.apply(version, &msg, tables) {
            Some(msg) => tables.route_dump(self.downstream(), msg, self.id),
            None => AddRouteResult::Filtered,
        }
    }
}

impl<F> RouteSource<F> for FilterTable<F>
where
    F: AddressFamily,
{
    fn lookup_route(
        &self,
        net: &F::IpNetwork,
        tables: &Tables<F>,
    ) -> Option<InternalMessage<F>> {
        let msg = tables.lookup_route(self.parent?, net)?;
        let version = self
            .genid_map
            .get(&(msg.origin.id, msg.genid))
            .copied()
            .unwrap_or(self.current);
        let filters = &self.versions[&version].filters;
        match apply_filters(filters, &msg)? {
            None => Some(msg),
            Some(attrs) => {
                // Lookups don't intern attributes.
                let attrs = AttrSet::detached(attrs);
                let route = SubnetRoute::derive(
                    &msg.route,
                    attrs,
                    msg.route.policy_tags.clone(),
                );
                Some(msg.with_route(route))
            }
        }
    }
}
