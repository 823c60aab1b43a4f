//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use holo_utils::ip::IpNetworkKind;

use crate::af::AddressFamily;
use crate::debug::Debug;
use crate::peer::{PeerHandle, PeerId};
use crate::route::{AddRouteResult, Genid, InternalMessage};
use crate::table::fanout::tail_is_busy;
use crate::table::{RouteSink, RouteSource, RouteTable, TableId, Tables};
use crate::tasks::messages::input::{PipelineMsg, TableSliceMsg};

// Walks the RibIn tables of all peers, one prefix at a time.
//
// The iterator keeps no reference into the tables it walks. The position in
// each RibIn is the last prefix returned, so routes can be added or removed
// between two steps without invalidating it.
#[derive(Debug)]
pub struct DumpIterator<F: AddressFamily> {
    peers: BTreeMap<PeerId, PeerDumpState<F::IpNetwork>>,
    // Restricts the walk to the prefixes within this range.
    range: Option<F::IpNetwork>,
}

#[derive(Debug)]
pub struct PeerDumpState<N> {
    pub ribin: TableId,
    pub genid: Genid,
    pub status: DumpStatus<N>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DumpStatus<N> {
    NotStarted,
    Dumping { last: N },
    Done,
    // The peering went down during the walk.
    Down { last: Option<N> },
}

// Sends the current winners to a peer whose output branch was just
// attached to the fanout.
//
// The table sits between the fanout and the peer's output branch until the
// walk completes. Meanwhile, changes for prefixes the walk hasn't reached
// yet are dropped, since the walk will send their latest version.
#[derive(Debug)]
pub struct DumpTable<F: AddressFamily> {
    id: TableId,
    parent: TableId,
    next: Option<TableId>,
    target: PeerHandle,
    tail: TableId,
    iter: DumpIterator<F>,
    scheduled: bool,
}

// ===== impl DumpIterator =====

impl<F> DumpIterator<F>
where
    F: AddressFamily,
{
    // Creates an iterator over the given (peer, RibIn, genid) tuples.
    pub fn new(
        peers: impl IntoIterator<Item = (PeerId, TableId, Genid)>,
    ) -> DumpIterator<F> {
        DumpIterator::with_range(peers, None)
    }

    pub fn with_range(
        peers: impl IntoIterator<Item = (PeerId, TableId, Genid)>,
        range: Option<F::IpNetwork>,
    ) -> DumpIterator<F> {
        let peers = peers
            .into_iter()
            .map(|(peer_id, ribin, genid)| {
                let state = PeerDumpState {
                    ribin,
                    genid,
                    status: DumpStatus::NotStarted,
                };
                (peer_id, state)
            })
            .collect();
        DumpIterator { peers, range }
    }

    pub fn state(
        &self,
        peer_id: PeerId,
    ) -> Option<&PeerDumpState<F::IpNetwork>> {
        self.peers.get(&peer_id)
    }

    pub fn is_done(&self) -> bool {
        self.peers.values().all(|state| {
            matches!(state.status, DumpStatus::Done | DumpStatus::Down { .. })
        })
    }

    // Returns the next (peer, prefix) pair of the walk.
    pub fn next(
        &mut self,
        tables: &Tables<F>,
    ) -> Option<(PeerId, F::IpNetwork)> {
        loop {
            let (peer_id, state) =
                self.peers.iter_mut().find(|(_, state)| {
                    matches!(
                        state.status,
                        DumpStatus::NotStarted | DumpStatus::Dumping { .. }
                    )
                })?;
            let last = match state.status {
                DumpStatus::Dumping { last } => Some(last),
                _ => None,
            };

            // Stop walking a RibIn that moved on to another session.
            let ribin = match tables.try_get(state.ribin) {
                Some(RouteTable::RibIn(ribin))
                    if ribin.genid() == state.genid =>
                {
                    ribin
                }
                _ => {
                    state.status = DumpStatus::Down { last };
                    continue;
                }
            };

            let net = match (last, &self.range) {
                (None, Some(range)) => ribin.first_prefix_within(range),
                _ => ribin.next_prefix(last.as_ref()),
            };
            // Prefixes past the end of the range are never walked.
            let net = net.filter(|net| {
                self.range.is_none_or(|range| range.contains(net.ip()))
            });
            match net {
                Some(net) => {
                    state.status = DumpStatus::Dumping { last: net };
                    return Some((*peer_id, net));
                }
                None => {
                    state.status = DumpStatus::Done;
                }
            }
        }
    }

    pub fn peering_went_down(&mut self, peer_id: PeerId, genid: Genid) {
        if let Some(state) = self.peers.get_mut(&peer_id)
            && state.genid == genid
        {
            state.status = match state.status {
                DumpStatus::NotStarted => DumpStatus::Down { last: None },
                DumpStatus::Dumping { last } => {
                    DumpStatus::Down { last: Some(last) }
                }
                status => status,
            };
        }
    }

    // Returns whether a route change must be propagated, given how far the
    // walk went.
    pub fn route_change_is_valid(&self, msg: &InternalMessage<F>) -> bool {
        let Some(state) = self.peers.get(&msg.origin.id) else {
            // Peering added after the walk started.
            return true;
        };

        if state.genid != msg.genid {
            // Routes of an older session were never walked. Routes of a
            // newer one won't be.
            return !msg.from_previous_peering;
        }

        let net = msg.net();
        match &state.status {
            DumpStatus::NotStarted => false,
            DumpStatus::Dumping { last } => net <= *last,
            DumpStatus::Done => true,
            DumpStatus::Down { last } => {
                last.as_ref().is_some_and(|last| net <= *last)
            }
        }
    }
}

// ===== impl DumpTable =====

impl<F> DumpTable<F>
where
    F: AddressFamily,
{
    pub fn new(
        id: TableId,
        parent: TableId,
        target: PeerHandle,
        tail: TableId,
        iter: DumpIterator<F>,
    ) -> DumpTable<F> {
        DumpTable {
            id,
            parent,
            next: None,
            target,
            tail,
            iter,
            scheduled: false,
        }
    }

    pub fn target(&self) -> &PeerHandle {
        &self.target
    }

    pub fn iter(&self) -> &DumpIterator<F> {
        &self.iter
    }

    pub fn start(&mut self, tables: &mut Tables<F>) {
        Debug::DumpStart(&self.target).log();
        self.schedule(tables);
    }

    pub fn schedule(&mut self, tables: &mut Tables<F>) {
        if self.scheduled {
            return;
        }

        self.scheduled = true;
        tables.schedule(PipelineMsg::DumpSlice(TableSliceMsg {
            afi_safi: F::AFI_SAFI,
            table: self.id,
        }));
    }

    // Sends the next batch of routes downstream.
    pub fn dump_slice(&mut self, tables: &mut Tables<F>) {
        self.scheduled = false;

        let next = self.downstream();
        let batch = tables.config.dump_batch.max(1);
        let mut sent = false;
        // Every prefix walked counts, winner or not.
        for _ in 0..batch {
            // Resumed by the fanout once the RibOut drains.
            if tail_is_busy(self.tail, tables) {
                if sent {
                    tables.push(next, self.id);
                }
                return;
            }

            let Some((peer_id, net)) = self.iter.next(tables) else {
                self.finish(tables);
                return;
            };

            // Only the winner is sent, when it's the route being walked.
            let Some(msg) = tables.lookup_route(self.parent, &net) else {
                continue;
            };
            let genid = self.iter.state(peer_id).map(|state| state.genid);
            if msg.origin.id != peer_id
                || Some(msg.genid) != genid
                || msg.origin == self.target
            {
                continue;
            }

            tables.route_dump(next, msg, self.id);
            sent = true;
        }

        tables.push(next, self.id);
        self.schedule(tables);
    }

    // Hands the output branch back to the fanout and removes this table.
    fn finish(&mut self, tables: &mut Tables<F>) {
        let next = self.downstream();
        tables.push(next, self.id);
        Debug::DumpFinish(&self.target).log();

        let peer_id = self.target.id;
        tables.with_table_as(
            self.parent,
            RouteTable::as_fanout_mut,
            |fanout, _| fanout.set_head(peer_id, next),
        );
        tables
            .get_mut(next)
            .sink_mut()
            .set_parent_table(Some(self.parent));
        tables.remove(self.id);
    }
}

impl<F> RouteSink<F> for DumpTable<F>
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
        if !self.iter.route_change_is_valid(&msg) {
            return AddRouteResult::Unused;
        }

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
        let old_ok = self.iter.route_change_is_valid(&old);
        let new_ok = self.iter.route_change_is_valid(&new);
        match (old_ok, new_ok) {
            (true, true) => tables.replace_route(next, old, new, self.id),
            (true, false) => {
                tables.delete_route(next, old, self.id);
                AddRouteResult::Unused
            }
            (false, true) => tables.add_route(next, new, self.id),
            (false, false) => AddRouteResult::Unused,
        }
    }

    fn delete_route(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        if !self.iter.route_change_is_valid(&msg) {
            return;
        }

        tables.delete_route(self.downstream(), msg, self.id);
    }

    fn peering_went_down(
        &mut self,
        peer: &PeerHandle,
        genid: Genid,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        self.iter.peering_went_down(peer.id, genid);
        tables.peering_went_down(self.downstream(), peer, genid, self.id);
    }
}

impl<F> RouteSource<F> for DumpTable<F>
where
    F: AddressFamily,
{
    fn lookup_route(
        &self,
        net: &F::IpNetwork,
        tables: &Tables<F>,
    ) -> Option<InternalMessage<F>> {
        tables.lookup_route(self.parent, net)
    }
}
