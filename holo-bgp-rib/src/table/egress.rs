//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, VecDeque};

use holo_utils::bgp::RouteType;
use tokio::sync::mpsc::error::TrySendError;

use crate::af::AddressFamily;
use crate::debug::Debug;
use crate::error::{Error, RibCommandError};
use crate::route::{AddRouteResult, InternalMessage};
use crate::table::{RouteSink, RouteSource, TableId, Tables};
use crate::tasks::messages::output::{RibRequest, RibRequestMsg, RibRoute};

// Delivers the decided routes to the forwarding table.
//
// Requests are queued in FIFO order and dispatched while the number of
// unanswered requests is below the configured window. Requests between two
// pushes form a transaction.
#[derive(Debug)]
pub struct EgressTable<F: AddressFamily> {
    id: TableId,
    parent: Option<TableId>,
    requests: VecDeque<RibRequest>,
    in_flight: BTreeMap<u64, RibRequest>,
    next_seq: u64,
    tid: u32,
    transaction_open: bool,
    _marker: std::marker::PhantomData<F>,
}

// ===== impl EgressTable =====

impl<F> EgressTable<F>
where
    F: AddressFamily,
{
    pub fn new(id: TableId) -> EgressTable<F> {
        EgressTable {
            id,
            parent: None,
            requests: Default::default(),
            in_flight: Default::default(),
            next_seq: 1,
            tid: 1,
            transaction_open: false,
            _marker: Default::default(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.requests.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    // Dispatches queued requests while the window allows.
    pub fn start(&mut self, tables: &mut Tables<F>) {
        let window = tables.config.egress_window.max(1);
        while self.in_flight.len() < window {
            let Some(request) = self.requests.pop_front() else {
                return;
            };

            let seq = self.next_seq;
            let msg = RibRequestMsg {
                afi_safi: F::AFI_SAFI,
                seq,
                request: request.clone(),
            };
            match tables.tx.egress.try_send(msg) {
                Ok(()) => {
                    Debug::EgressDispatch(seq, &request).log();
                    self.next_seq += 1;
                    self.in_flight.insert(seq, request);
                }
                Err(TrySendError::Full(_)) => {
                    // Resumed on the next completion.
                    self.requests.push_front(request);
                    Debug::EgressBacklog(self.requests.len()).log();
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    self.requests.push_front(request);
                    let error = Error::RibEndpointGone;
                    error.log();
                    tables.fatal.get_or_insert(error);
                    return;
                }
            }
        }
    }

    // Processes the completion of a dispatched request.
    //
    // Rejected and timed out requests aren't retried.
    pub fn rib_command_done(
        &mut self,
        seq: u64,
        result: Result<(), RibCommandError>,
        tables: &mut Tables<F>,
    ) -> Result<(), Error> {
        if self.in_flight.remove(&seq).is_none() {
            return Err(Error::RibCommandUnknown(seq));
        }

        if let Err(error) = result {
            let error = Error::RibCommand(seq, error);
            error.log();
            if error.is_fatal() {
                tables.fatal.get_or_insert(error);
                return Ok(());
            }
        }

        self.start(tables);
        Ok(())
    }

    fn open_transaction(&mut self) {
        if !self.transaction_open {
            self.transaction_open = true;
            self.requests
                .push_back(RibRequest::StartTransaction { tid: self.tid });
        }
    }

    fn rib_route(msg: &InternalMessage<F>, tables: &Tables<F>) -> RibRoute {
        let config = &tables.config;
        let (ribname, distance) = match msg.origin.peer_type.route_type() {
            RouteType::External => ("ebgp", config.distance_ebgp),
            RouteType::Internal => ("ibgp", config.distance_ibgp),
        };
        let attrs = msg.route.base();
        RibRoute {
            ribname: ribname.to_owned(),
            prefix: msg.net().into(),
            nexthop: attrs.nexthop,
            ifname: None,
            metric: attrs.med.unwrap_or(0),
            distance,
            cookie: ribname.to_owned(),
            protocol_origin: "bgp".to_owned(),
        }
    }
}

impl<F> RouteSink<F> for EgressTable<F>
where
    F: AddressFamily,
{
    fn id(&self) -> TableId {
        self.id
    }

    // The egress table terminates its branch.
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
        self.open_transaction();
        let route = Self::rib_route(&msg, tables);
        self.requests
            .push_back(RibRequest::AddRoute { tid: self.tid, route });
        AddRouteResult::Used
    }

    fn replace_route(
        &mut self,
        old: InternalMessage<F>,
        new: InternalMessage<F>,
        caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        // Nothing to change in the forwarding table.
        if old.is_same_route(&new) {
            return AddRouteResult::Used;
        }

        self.delete_route(old, caller, tables);
        self.add_route(new, caller, tables)
    }

    fn delete_route(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        self.open_transaction();
        let route = Self::rib_route(&msg, tables);
        self.requests
            .push_back(RibRequest::DeleteRoute { tid: self.tid, route });
    }

    fn push(&mut self, _caller: TableId, tables: &mut Tables<F>) {
        if self.transaction_open {
            self.transaction_open = false;
            self.requests
                .push_back(RibRequest::CommitTransaction { tid: self.tid });
            self.tid = self.tid.wrapping_add(1);
        }
        self.start(tables);
    }
}

impl<F> RouteSource<F> for EgressTable<F>
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
