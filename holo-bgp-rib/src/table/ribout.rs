//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;

use ipnetwork::IpNetwork;
use serde::Serialize;

use crate::af::AddressFamily;
use crate::attribute::RouteAttrs;
use crate::config::RibCfg;
use crate::peer::PeerHandle;
use crate::route::{AddRouteResult, InternalMessage};
use crate::table::{RouteSink, RouteSource, TableId, Tables};
use crate::tasks::messages::output::SessionMsg;

// Updates ready to be sent to a peer.
//
// Changes accumulate in the pending list until a push, which moves them to
// the queue pulled by the session. The table is busy while the queue holds
// more updates than the configured limit, which stops the fanout from
// delivering more.
#[derive(Debug)]
pub struct RibOutTable<F: AddressFamily> {
    id: TableId,
    parent: Option<TableId>,
    peer: PeerHandle,
    pending: Vec<RouteUpdate>,
    queue: VecDeque<RouteUpdate>,
    wakeup_sent: bool,
    _marker: std::marker::PhantomData<F>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteUpdate {
    Announce { prefix: IpNetwork, attrs: RouteAttrs },
    Withdraw { prefix: IpNetwork },
}

// ===== impl RibOutTable =====

impl<F> RibOutTable<F>
where
    F: AddressFamily,
{
    pub fn new(id: TableId, peer: PeerHandle) -> RibOutTable<F> {
        RibOutTable {
            id,
            parent: None,
            peer,
            pending: Default::default(),
            queue: Default::default(),
            wakeup_sent: false,
            _marker: Default::default(),
        }
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_busy(&self, config: &RibCfg) -> bool {
        self.queue.len() >= config.ribout_limit.max(1)
    }

    // Takes up to `max` updates from the queue.
    pub fn pull(&mut self, max: usize) -> Vec<RouteUpdate> {
        let count = max.min(self.queue.len());
        let updates = self.queue.drain(..count).collect::<Vec<_>>();
        if self.queue.is_empty() {
            self.wakeup_sent = false;
        }
        updates
    }

    // Discards everything not yet sent.
    pub fn flush(&mut self) {
        self.pending.clear();
        self.queue.clear();
        self.wakeup_sent = false;
    }

    fn enqueue(&mut self, update: RouteUpdate) {
        // Only the latest change of a prefix matters.
        let prefix = update.prefix();
        self.pending.retain(|pending| pending.prefix() != prefix);
        self.pending.push(update);
    }
}

impl<F> RouteSink<F> for RibOutTable<F>
where
    F: AddressFamily,
{
    fn id(&self) -> TableId {
        self.id
    }

    // The RibOut table terminates its branch.
    fn next_table(&self) -> Option<TableId> {
        None
    }

    fn set_next_table(&mut self, _next: Option<TableId>) {}

    fn set_parent_table(&mut self, parent: Option<TableId>) {
        self.parent = parent;
    }

    fn add_route(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        _tables: &mut Tables<F>,
    ) -> AddRouteResult {
        self.enqueue(RouteUpdate::Announce {
            prefix: msg.net().into(),
            attrs: msg.route.attrs.clone(),
        });
        AddRouteResult::Used
    }

    // An announcement implicitly withdraws the previous route.
    fn replace_route(
        &mut self,
        old: InternalMessage<F>,
        new: InternalMessage<F>,
        caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        // The peer already has this version.
        if old.is_same_route(&new) {
            return AddRouteResult::Used;
        }

        self.add_route(new, caller, tables)
    }

    fn delete_route(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        _tables: &mut Tables<F>,
    ) {
        self.enqueue(RouteUpdate::Withdraw {
            prefix: msg.net().into(),
        });
    }

    fn push(&mut self, _caller: TableId, tables: &mut Tables<F>) {
        self.queue.extend(self.pending.drain(..));
        if !self.queue.is_empty() && !self.wakeup_sent {
            self.wakeup_sent = true;
            let _ = tables.tx.session.send(SessionMsg::Wakeup {
                afi_safi: F::AFI_SAFI,
                peer_id: self.peer.id,
            });
        }
    }
}

impl<F> RouteSource<F> for RibOutTable<F>
where
    F: AddressFamily,
{
    fn lookup_route(
        &self,
        net: &F::IpNetwork,
        tables: &Tables<F>,
    ) -> Option<InternalMessage<F>> {
        self.parent
            .and_then(|parent| tables.lookup_route(parent, net))
    }
}

// ===== impl RouteUpdate =====

impl RouteUpdate {
    pub fn prefix(&self) -> IpNetwork {
        match self {
            RouteUpdate::Announce { prefix, .. }
            | RouteUpdate::Withdraw { prefix } => *prefix,
        }
    }
}
