//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, VecDeque};

use crate::af::AddressFamily;
use crate::peer::{PeerHandle, PeerId};
use crate::route::{AddRouteResult, Genid, InternalMessage};
use crate::table::{RouteSink, RouteSource, RouteTable, TableId, Tables};

// Replicates the decision output to the output branch of every peer.
//
// Changes are appended to a single log shared by all peers. Each peer has a
// cursor into the log, which only advances while the peer's RibOut accepts
// more routes.
#[derive(Debug)]
pub struct FanoutTable<F: AddressFamily> {
    id: TableId,
    parent: Option<TableId>,
    queue: VecDeque<QueueEntry<F>>,
    // Sequence number of the first entry of the queue.
    first_seq: u64,
    next_seq: u64,
    peers: BTreeMap<PeerId, PeerTableInfo>,
}

#[derive(Debug)]
pub struct PeerTableInfo {
    pub peer: PeerHandle,
    // First table of the peer's output branch.
    pub head: TableId,
    // Last table of the peer's output branch (RibOut or egress).
    pub tail: TableId,
    // Sequence number of the next entry to deliver.
    pub position: u64,
    // Routes were delivered since the last push.
    pub has_queued_data: bool,
}

#[derive(Debug)]
enum QueueEntry<F: AddressFamily> {
    Add(InternalMessage<F>),
    Replace(InternalMessage<F>, InternalMessage<F>),
    Delete(InternalMessage<F>),
    Push,
}

// ===== impl FanoutTable =====

impl<F> FanoutTable<F>
where
    F: AddressFamily,
{
    pub fn new(id: TableId) -> FanoutTable<F> {
        FanoutTable {
            id,
            parent: None,
            queue: Default::default(),
            first_seq: 0,
            next_seq: 0,
            peers: Default::default(),
        }
    }

    // Registers the output branch of a peer. Only changes queued from now
    // on are delivered to it.
    pub fn add_next_table(
        &mut self,
        peer: PeerHandle,
        head: TableId,
        tail: TableId,
    ) {
        let info = PeerTableInfo {
            peer,
            head,
            tail,
            position: self.next_seq,
            has_queued_data: false,
        };
        self.peers.insert(info.peer.id, info);
    }

    pub fn remove_next_table(
        &mut self,
        peer_id: PeerId,
    ) -> Option<PeerTableInfo> {
        let info = self.peers.remove(&peer_id);
        self.trim();
        info
    }

    pub fn set_head(&mut self, peer_id: PeerId, head: TableId) {
        if let Some(info) = self.peers.get_mut(&peer_id) {
            info.head = head;
        }
    }

    pub fn peer_info(&self, peer_id: PeerId) -> Option<&PeerTableInfo> {
        self.peers.get(&peer_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    // Number of changes not yet delivered to every peer.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    // Number of changes not yet delivered to the given peer.
    pub fn lag(&self, peer_id: PeerId) -> Option<u64> {
        self.peers
            .get(&peer_id)
            .map(|info| self.next_seq - info.position)
    }

    // Resumes delivery towards a peer whose output is no longer busy.
    pub fn get_next_message(
        &mut self,
        peer_id: PeerId,
        tables: &mut Tables<F>,
    ) {
        let Some(info) = self.peers.get(&peer_id) else {
            return;
        };
        let head = info.head;

        self.deliver(peer_id, tables);
        self.trim();

        // An ongoing dump waits for the same signal.
        if let Some(RouteTable::Dump(_)) = tables.try_get(head) {
            tables.with_table_as(
                head,
                RouteTable::as_dump_mut,
                |dump, tables| dump.schedule(tables),
            );
        }
    }

    pub fn is_busy(&self, peer_id: PeerId, tables: &Tables<F>) -> bool {
        self.peers
            .get(&peer_id)
            .is_some_and(|info| tail_is_busy(info.tail, tables))
    }

    fn enqueue(&mut self, entry: QueueEntry<F>, tables: &mut Tables<F>) {
        self.queue.push_back(entry);
        self.next_seq += 1;

        let peer_ids = self.peers.keys().copied().collect::<Vec<_>>();
        for peer_id in peer_ids {
            self.deliver(peer_id, tables);
        }
        self.trim();
    }

    // Delivers queued changes to a peer until it's caught up or busy.
    fn deliver(&mut self, peer_id: PeerId, tables: &mut Tables<F>) {
        loop {
            let Some(info) = self.peers.get_mut(&peer_id) else {
                return;
            };
            if info.position >= self.next_seq
                || tail_is_busy(info.tail, tables)
            {
                return;
            }

            let index = (info.position - self.first_seq) as usize;
            let entry = &self.queue[index];
            info.position += 1;
            let target = info.peer.clone();
            let head = info.head;

            // Routes are never sent back to the peer they came from.
            match entry {
                QueueEntry::Add(msg) => {
                    if msg.origin != target {
                        info.has_queued_data = true;
                        tables.add_route(head, msg.clone(), self.id);
                    }
                }
                QueueEntry::Replace(old, new) => {
                    let old_ok = old.origin != target;
                    let new_ok = new.origin != target;
                    if old_ok || new_ok {
                        info.has_queued_data = true;
                    }
                    match (old_ok, new_ok) {
                        (true, true) => {
                            tables.replace_route(
                                head,
                                old.clone(),
                                new.clone(),
                                self.id,
                            );
                        }
                        (true, false) => {
                            tables.delete_route(head, old.clone(), self.id);
                        }
                        (false, true) => {
                            tables.add_route(head, new.clone(), self.id);
                        }
                        (false, false) => {}
                    }
                }
                QueueEntry::Delete(msg) => {
                    if msg.origin != target {
                        info.has_queued_data = true;
                        tables.delete_route(head, msg.clone(), self.id);
                    }
                }
                QueueEntry::Push => {
                    if info.has_queued_data {
                        info.has_queued_data = false;
                        tables.push(head, self.id);
                    }
                }
            }
        }
    }

    // Drops the entries already delivered to every peer.
    fn trim(&mut self) {
        let min = self
            .peers
            .values()
            .map(|info| info.position)
            .min()
            .unwrap_or(self.next_seq);
        while self.first_seq < min {
            self.queue.pop_front();
            self.first_seq += 1;
        }
    }

    fn heads(&self) -> Vec<TableId> {
        self.peers.values().map(|info| info.head).collect()
    }
}

impl<F> RouteSink<F> for FanoutTable<F>
where
    F: AddressFamily,
{
    fn id(&self) -> TableId {
        self.id
    }

    // Output branches are managed with `add_next_table`.
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
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        self.enqueue(QueueEntry::Add(msg), tables);
        AddRouteResult::Used
    }

    fn replace_route(
        &mut self,
        old: InternalMessage<F>,
        new: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        self.enqueue(QueueEntry::Replace(old, new), tables);
        AddRouteResult::Used
    }

    fn delete_route(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        self.enqueue(QueueEntry::Delete(msg), tables);
    }

    fn push(&mut self, _caller: TableId, tables: &mut Tables<F>) {
        self.enqueue(QueueEntry::Push, tables);
    }

    fn peering_went_down(
        &mut self,
        peer: &PeerHandle,
        genid: Genid,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        for head in self.heads() {
            tables.peering_went_down(head, peer, genid, self.id);
        }
    }

    fn peering_down_complete(
        &mut self,
        peer: &PeerHandle,
        genid: Genid,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        for head in self.heads() {
            tables.peering_down_complete(head, peer, genid, self.id);
        }
    }

    fn peering_came_up(
        &mut self,
        peer: &PeerHandle,
        genid: Genid,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        for head in self.heads() {
            tables.peering_came_up(head, peer, genid, self.id);
        }
    }
}

impl<F> RouteSource<F> for FanoutTable<F>
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

// ===== helper functions =====

pub(crate) fn tail_is_busy<F: AddressFamily>(
    tail: TableId,
    tables: &Tables<F>,
) -> bool {
    match tables.try_get(tail) {
        Some(RouteTable::RibOut(ribout)) => ribout.is_busy(&tables.config),
        _ => false,
    }
}
