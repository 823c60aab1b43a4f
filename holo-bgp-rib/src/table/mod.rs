//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod cache;
pub mod damping;
pub mod decision;
pub mod deletion;
pub mod dump;
pub mod egress;
pub mod fanout;
pub mod filter;
pub mod policy;
pub mod ribin;
pub mod ribout;

use enum_as_inner::EnumAsInner;
use generational_arena::{Arena, Index};
use holo_utils::{Sender, UnboundedSender};

use crate::af::AddressFamily;
use crate::attribute::{AttrSets, Attrs};
use crate::config::RibCfg;
use crate::error::Error;
use crate::nexthop::NexthopResolver;
use crate::peer::PeerHandle;
use crate::policy::PolicyCfg;
use crate::route::{AddRouteResult, Genid, InternalMessage};
use crate::table::cache::CacheTable;
use crate::table::damping::DampingTable;
use crate::table::decision::DecisionTable;
use crate::table::deletion::DeletionTable;
use crate::table::dump::DumpTable;
use crate::table::egress::EgressTable;
use crate::table::fanout::FanoutTable;
use crate::table::filter::FilterTable;
use crate::table::policy::PolicyTable;
use crate::table::ribin::RibInTable;
use crate::table::ribout::RibOutTable;
use crate::tasks::messages::input::PipelineMsg;
use crate::tasks::messages::output::{RibRequestMsg, SessionMsg};

pub type TableId = Index;

// Pipeline stages of one address family, along with the state they share.
//
// Stages reference each other by ID. A stage is taken out of the arena while
// one of its methods executes, so that it can call into its neighbors through
// the same `Tables` handle.
#[derive(Debug)]
pub struct Tables<F: AddressFamily> {
    arena: Arena<Option<RouteTable<F>>>,
    pub attr_sets: AttrSets<Attrs>,
    pub resolver: NexthopResolver<F>,
    pub config: RibCfg,
    pub policies: PolicyCfg,
    pub tx: PipelineChannelsTx,
    // Unrecoverable error latched by a stage.
    pub fatal: Option<Error>,
}

#[derive(Clone, Debug)]
pub struct PipelineChannelsTx {
    // Follow-up work.
    pub sched: UnboundedSender<PipelineMsg>,
    // Session wakeups.
    pub session: UnboundedSender<SessionMsg>,
    // Forwarding-table requests.
    pub egress: Sender<RibRequestMsg>,
}

#[derive(Debug, EnumAsInner)]
pub enum RouteTable<F: AddressFamily> {
    RibIn(RibInTable<F>),
    Deletion(DeletionTable<F>),
    Damping(DampingTable<F>),
    Policy(PolicyTable<F>),
    Filter(FilterTable<F>),
    Cache(CacheTable<F>),
    Decision(DecisionTable<F>),
    Fanout(FanoutTable<F>),
    Dump(DumpTable<F>),
    RibOut(RibOutTable<F>),
    Egress(EgressTable<F>),
}

// Stage receiving route changes from its parent.
pub trait RouteSink<F: AddressFamily> {
    fn id(&self) -> TableId;

    fn next_table(&self) -> Option<TableId>;

    fn set_next_table(&mut self, next: Option<TableId>);

    fn set_parent_table(&mut self, parent: Option<TableId>);

    fn add_route(
        &mut self,
        msg: InternalMessage<F>,
        caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult;

    fn replace_route(
        &mut self,
        old: InternalMessage<F>,
        new: InternalMessage<F>,
        caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult;

    fn delete_route(
        &mut self,
        msg: InternalMessage<F>,
        caller: TableId,
        tables: &mut Tables<F>,
    );

    // Route sent as part of a table dump towards a new peer.
    fn route_dump(
        &mut self,
        msg: InternalMessage<F>,
        caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        self.add_route(msg, caller, tables)
    }

    // End of a batch of changes.
    fn push(&mut self, _caller: TableId, tables: &mut Tables<F>) {
        if let Some(next) = self.next_table() {
            tables.push(next, self.id());
        }
    }

    fn peering_went_down(
        &mut self,
        peer: &PeerHandle,
        genid: Genid,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        if let Some(next) = self.next_table() {
            tables.peering_went_down(next, peer, genid, self.id());
        }
    }

    fn peering_down_complete(
        &mut self,
        peer: &PeerHandle,
        genid: Genid,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        if let Some(next) = self.next_table() {
            tables.peering_down_complete(next, peer, genid, self.id());
        }
    }

    fn peering_came_up(
        &mut self,
        peer: &PeerHandle,
        genid: Genid,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        if let Some(next) = self.next_table() {
            tables.peering_came_up(next, peer, genid, self.id());
        }
    }

    // Downstream table on a call path that requires one.
    fn downstream(&self) -> TableId {
        self.next_table().unwrap_or_else(|| {
            panic!("{:?}: missing downstream table", self.id())
        })
    }
}

// Stage answering route lookups from its children.
pub trait RouteSource<F: AddressFamily> {
    // Returns the route for the given prefix as seen by this table's
    // children, if any.
    fn lookup_route(
        &self,
        net: &F::IpNetwork,
        tables: &Tables<F>,
    ) -> Option<InternalMessage<F>>;
}

// ===== impl Tables =====

impl<F> Tables<F>
where
    F: AddressFamily,
{
    pub fn new(
        config: RibCfg,
        policies: PolicyCfg,
        tx: PipelineChannelsTx,
    ) -> Tables<F> {
        Tables {
            arena: Default::default(),
            attr_sets: Default::default(),
            resolver: Default::default(),
            config,
            policies,
            tx,
            fatal: None,
        }
    }

    // Creates a new table. The closure receives the ID of the new table.
    pub fn insert(
        &mut self,
        create: impl FnOnce(TableId) -> RouteTable<F>,
    ) -> TableId {
        self.arena.insert_with(|id| Some(create(id)))
    }

    // Destroys a table. Removing a table while it executes is allowed, in
    // which case it's dropped once the call returns.
    pub fn remove(&mut self, id: TableId) -> Option<RouteTable<F>> {
        self.arena.remove(id).flatten()
    }

    pub fn contains(&self, id: TableId) -> bool {
        self.arena.contains(id)
    }

    pub fn get(&self, id: TableId) -> &RouteTable<F> {
        match self.arena.get(id) {
            Some(Some(table)) => table,
            Some(None) => panic!("{:?}: table is executing", id),
            None => panic!("{:?}: table not found", id),
        }
    }

    // Same as `get`, without panicking for missing or executing tables.
    pub fn try_get(&self, id: TableId) -> Option<&RouteTable<F>> {
        self.arena.get(id).and_then(|table| table.as_ref())
    }

    pub fn get_mut(&mut self, id: TableId) -> &mut RouteTable<F> {
        match self.arena.get_mut(id) {
            Some(Some(table)) => table,
            Some(None) => panic!("{:?}: table is executing", id),
            None => panic!("{:?}: table not found", id),
        }
    }

    // Runs the closure with the given table taken out of the arena.
    pub fn with_table<R>(
        &mut self,
        id: TableId,
        f: impl FnOnce(&mut RouteTable<F>, &mut Tables<F>) -> R,
    ) -> R {
        let mut table = match self.arena.get_mut(id) {
            Some(slot) => slot
                .take()
                .unwrap_or_else(|| panic!("{:?}: table re-entered", id)),
            None => panic!("{:?}: table not found", id),
        };
        let ret = f(&mut table, self);
        if let Some(slot) = self.arena.get_mut(id) {
            *slot = Some(table);
        }
        ret
    }

    // Same as `with_table`, for a table of a known kind.
    pub fn with_table_as<T, R>(
        &mut self,
        id: TableId,
        cast: impl FnOnce(&mut RouteTable<F>) -> Option<&mut T>,
        f: impl FnOnce(&mut T, &mut Tables<F>) -> R,
    ) -> R {
        self.with_table(id, |table, tables| {
            let kind = table.kind();
            let table = cast(table).unwrap_or_else(|| {
                panic!("{:?}: unexpected table kind ({})", id, kind)
            });
            f(table, tables)
        })
    }

    // Links two tables of a linear segment of the pipeline.
    pub fn link(&mut self, parent: TableId, child: TableId) {
        self.get_mut(parent).sink_mut().set_next_table(Some(child));
        self.get_mut(child).sink_mut().set_parent_table(Some(parent));
    }

    pub fn schedule(&self, msg: PipelineMsg) {
        let _ = self.tx.sched.send(msg);
    }

    pub fn add_route(
        &mut self,
        id: TableId,
        msg: InternalMessage<F>,
        caller: TableId,
    ) -> AddRouteResult {
        self.with_table(id, |table, tables| {
            table.sink_mut().add_route(msg, caller, tables)
        })
    }

    pub fn replace_route(
        &mut self,
        id: TableId,
        old: InternalMessage<F>,
        new: InternalMessage<F>,
        caller: TableId,
    ) -> AddRouteResult {
        self.with_table(id, |table, tables| {
            table.sink_mut().replace_route(old, new, caller, tables)
        })
    }

    pub fn delete_route(
        &mut self,
        id: TableId,
        msg: InternalMessage<F>,
        caller: TableId,
    ) {
        self.with_table(id, |table, tables| {
            table.sink_mut().delete_route(msg, caller, tables)
        })
    }

    pub fn route_dump(
        &mut self,
        id: TableId,
        msg: InternalMessage<F>,
        caller: TableId,
    ) -> AddRouteResult {
        self.with_table(id, |table, tables| {
            table.sink_mut().route_dump(msg, caller, tables)
        })
    }

    pub fn push(&mut self, id: TableId, caller: TableId) {
        self.with_table(id, |table, tables| {
            table.sink_mut().push(caller, tables)
        })
    }

    pub fn peering_went_down(
        &mut self,
        id: TableId,
        peer: &PeerHandle,
        genid: Genid,
        caller: TableId,
    ) {
        self.with_table(id, |table, tables| {
            table.sink_mut().peering_went_down(peer, genid, caller, tables)
        })
    }

    pub fn peering_down_complete(
        &mut self,
        id: TableId,
        peer: &PeerHandle,
        genid: Genid,
        caller: TableId,
    ) {
        self.with_table(id, |table, tables| {
            table
                .sink_mut()
                .peering_down_complete(peer, genid, caller, tables)
        })
    }

    pub fn peering_came_up(
        &mut self,
        id: TableId,
        peer: &PeerHandle,
        genid: Genid,
        caller: TableId,
    ) {
        self.with_table(id, |table, tables| {
            table.sink_mut().peering_came_up(peer, genid, caller, tables)
        })
    }

    pub fn lookup_route(
        &self,
        id: TableId,
        net: &F::IpNetwork,
    ) -> Option<InternalMessage<F>> {
        self.get(id).source().lookup_route(net, self)
    }
}

// ===== impl RouteTable =====

impl<F> RouteTable<F>
where
    F: AddressFamily,
{
    pub fn sink_mut(&mut self) -> &mut dyn RouteSink<F> {
        match self {
            RouteTable::RibIn(table) => table,
            RouteTable::Deletion(table) => table,
            RouteTable::Damping(table) => table,
            RouteTable::Policy(table) => table,
            RouteTable::Filter(table) => table,
            RouteTable::Cache(table) => table,
            RouteTable::Decision(table) => table,
            RouteTable::Fanout(table) => table,
            RouteTable::Dump(table) => table,
            RouteTable::RibOut(table) => table,
            RouteTable::Egress(table) => table,
        }
    }

    pub fn source(&self) -> &dyn RouteSource<F> {
        match self {
            RouteTable::RibIn(table) => table,
            RouteTable::Deletion(table) => table,
            RouteTable::Damping(table) => table,
            RouteTable::Policy(table) => table,
            RouteTable::Filter(table) => table,
            RouteTable::Cache(table) => table,
            RouteTable::Decision(table) => table,
            RouteTable::Fanout(table) => table,
            RouteTable::Dump(table) => table,
            RouteTable::RibOut(table) => table,
            RouteTable::Egress(table) => table,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RouteTable::RibIn(_) => "rib-in",
            RouteTable::Deletion(_) => "deletion",
            RouteTable::Damping(_) => "damping",
            RouteTable::Policy(_) => "policy",
            RouteTable::Filter(_) => "filter",
            RouteTable::Cache(_) => "cache",
            RouteTable::Decision(_) => "decision",
            RouteTable::Fanout(_) => "fanout",
            RouteTable::Dump(_) => "dump",
            RouteTable::RibOut(_) => "rib-out",
            RouteTable::Egress(_) => "egress",
        }
    }
}
