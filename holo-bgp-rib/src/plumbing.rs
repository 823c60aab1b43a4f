//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use holo_utils::ip::IpNetworkKind;
use ipnetwork::IpNetwork;

use crate::af::AddressFamily;
use crate::attribute::{Attrs, RouteAttrs};
use crate::config::RibCfg;
use crate::debug::Debug;
use crate::error::Error;
use crate::filter::RouteFilter;
use crate::peer::{LOCAL_PEER_ID, PeerHandle, PeerId, PeerInfo, PeerType};
use crate::policy::{self, DirectionPolicyCfg, PolicyCfg, PolicyDirection};
use crate::route::{AddRouteResult, AggrMarker, Genid, InternalMessage};
use crate::table::cache::CacheTable;
use crate::table::damping::DampingTable;
use crate::table::decision::DecisionTable;
use crate::table::dump::{DumpIterator, DumpTable};
use crate::table::egress::EgressTable;
use crate::table::fanout::FanoutTable;
use crate::table::filter::FilterTable;
use crate::table::policy::PolicyTable;
use crate::table::ribin::RibInTable;
use crate::table::ribout::{RibOutTable, RouteUpdate};
use crate::table::{PipelineChannelsTx, RouteTable, TableId, Tables};
use crate::tasks::messages::input::{PipelineMsg, RibReplyMsg};

// Route pipeline of one address family.
//
// Every peer has an input branch feeding the decision table, and an output
// branch fed by the fanout table:
//
//   RibIn -> Damping -> Policy -> Filter -> Cache -+
//   RibIn -> Damping -> Policy -> Filter -> Cache -+-> Decision -+
//                                                                |
//   +------------- Policy (source-match) <-----------------------+
//   |
//   +-> Fanout -+-> [Dump] -> Policy -> Filter -> Cache -> RibOut
//               +-> [Dump] -> Policy -> Filter -> Cache -> Egress
//
// The local pseudo-peer owns locally originated routes, and its output
// branch ends in the forwarding table.
#[derive(Debug)]
pub struct Plumbing<F: AddressFamily> {
    pub tables: Tables<F>,
    decision: TableId,
    source_match: TableId,
    fanout: TableId,
    peers: BTreeMap<PeerId, PeerTables>,
    readers: BTreeMap<u32, RouteTableReader<F>>,
    next_reader: u32,
}

#[derive(Debug)]
pub struct PeerTables {
    pub peer: PeerHandle,
    pub ribin: TableId,
    pub damping: TableId,
    pub import_policy: TableId,
    pub import_filter: TableId,
    pub import_cache: TableId,
    // Detached while the peering is down.
    pub output: Option<OutputBranch>,
}

#[derive(Debug)]
pub struct OutputBranch {
    pub policy: TableId,
    pub filter: TableId,
    pub cache: TableId,
    // RibOut table, or egress table for the local pseudo-peer.
    pub tail: TableId,
}

#[derive(Debug)]
struct RouteTableReader<F: AddressFamily> {
    iter: DumpIterator<F>,
    prefix: Option<F::IpNetwork>,
}

// Route returned by a route table reader.
#[derive(Debug)]
pub struct ReaderRoute<F: AddressFamily> {
    pub prefix: F::IpNetwork,
    pub attrs: RouteAttrs,
    pub origin: PeerHandle,
    pub winner: bool,
}

// ===== impl Plumbing =====

impl<F> Plumbing<F>
where
    F: AddressFamily,
{
    pub fn new(
        config: RibCfg,
        policies: PolicyCfg,
        tx: PipelineChannelsTx,
    ) -> Plumbing<F> {
        let local = PeerInfo::local(config.router_id, config.local_as);
        let mut tables = Tables::new(config, policies, tx);

        let decision =
            tables.insert(|id| RouteTable::Decision(DecisionTable::new(id)));
        let source_match = tables.insert(|id| {
            RouteTable::Policy(PolicyTable::new(
                id,
                PolicyDirection::SourceMatch,
                None,
            ))
        });
        let fanout =
            tables.insert(|id| RouteTable::Fanout(FanoutTable::new(id)));
        tables.link(decision, source_match);
        tables.link(source_match, fanout);

        let mut plumbing = Plumbing {
            tables,
            decision,
            source_match,
            fanout,
            peers: Default::default(),
            readers: Default::default(),
            next_reader: 1,
        };
        plumbing.plumb_peering(PeerHandle::new(local));
        plumbing
    }

    // ----- peering management -----

    pub fn add_peering(&mut self, peer: PeerInfo) -> Result<(), Error> {
        if peer.id == LOCAL_PEER_ID {
            return Err(Error::PeerReserved(peer.id));
        }
        if self.peers.contains_key(&peer.id) {
            return Err(Error::PeerDuplicate(peer.id));
        }

        self.plumb_peering(PeerHandle::new(peer));
        Ok(())
    }

    // Detaches the peer's output branch, discarding everything queued
    // towards the peer.
    pub fn stop_peering(&mut self, peer_id: PeerId) -> Result<(), Error> {
        if peer_id == LOCAL_PEER_ID {
            return Err(Error::PeerReserved(peer_id));
        }
        let peer_tables = self
            .peers
            .get_mut(&peer_id)
            .ok_or(Error::PeerUnknown(peer_id))?;
        Debug::PeeringStop(&peer_tables.peer).log();
        detach_output(&mut self.tables, self.fanout, peer_tables);
        Ok(())
    }

    pub fn peering_went_down(
        &mut self,
        peer_id: PeerId,
    ) -> Result<(), Error> {
        if peer_id == LOCAL_PEER_ID {
            return Err(Error::PeerReserved(peer_id));
        }
        let peer_tables = self
            .peers
            .get_mut(&peer_id)
            .ok_or(Error::PeerUnknown(peer_id))?;
        let ribin = self.tables.get(peer_tables.ribin);
        let Some(ribin) = ribin.as_rib_in() else {
            unreachable!();
        };
        if !ribin.is_up() {
            return Err(Error::PeerDown(peer_id));
        }
        let genid = ribin.genid();

        detach_output(&mut self.tables, self.fanout, peer_tables);
        for reader in self.readers.values_mut() {
            reader.iter.peering_went_down(peer_id, genid);
        }
        self.tables.with_table_as(
            peer_tables.ribin,
            RouteTable::as_rib_in_mut,
            |ribin, tables| ribin.peering_went_down(tables),
        );

        Ok(())
    }

    pub fn peering_came_up(&mut self, peer_id: PeerId) -> Result<(), Error> {
        if !self.peers.contains_key(&peer_id) {
            return Err(Error::PeerUnknown(peer_id));
        }

        if self.ribin(peer_id).is_some_and(|ribin| ribin.is_up()) {
            return Ok(());
        }

        self.attach_output(peer_id);
        let ribin = self.peers[&peer_id].ribin;
        self.tables.with_table_as(
            ribin,
            RouteTable::as_rib_in_mut,
            |ribin, tables| ribin.peering_came_up(tables),
        );

        Ok(())
    }

    // Withdraws all routes of the peer at once and destroys its tables.
    pub fn delete_peering(&mut self, peer_id: PeerId) -> Result<(), Error> {
        if peer_id == LOCAL_PEER_ID {
            return Err(Error::PeerReserved(peer_id));
        }
        if !self.peers.contains_key(&peer_id) {
            return Err(Error::PeerUnknown(peer_id));
        }

        let ribin = self.peers[&peer_id].ribin;
        if self.ribin(peer_id).is_some_and(|ribin| ribin.is_up()) {
            self.peering_went_down(peer_id)?;
        }

        // Finish the pending deletion stages.
        loop {
            let next = self.tables.get_mut(ribin).sink_mut().next_table();
            let Some(next) = next else {
                break;
            };
            if self.tables.get(next).as_deletion().is_none() {
                break;
            }
            self.tables.with_table_as(
                next,
                RouteTable::as_deletion_mut,
                |deletion, tables| deletion.drain(tables),
            );
        }

        let Some(mut peer_tables) = self.peers.remove(&peer_id) else {
            unreachable!();
        };
        Debug::PeeringDelete(&peer_tables.peer).log();
        detach_output(&mut self.tables, self.fanout, &mut peer_tables);
        let import_cache = peer_tables.import_cache;
        self.tables.with_table_as(
            self.decision,
            RouteTable::as_decision_mut,
            |decision, _| decision.remove_parent(import_cache),
        );
        for table in [
            peer_tables.ribin,
            peer_tables.damping,
            peer_tables.import_policy,
            peer_tables.import_filter,
            peer_tables.import_cache,
        ] {
            self.tables.remove(table);
        }

        Ok(())
    }

    // ----- routes received from sessions -----

    pub fn add_route(
        &mut self,
        peer_id: PeerId,
        prefix: IpNetwork,
        attrs: Attrs,
    ) -> Result<AddRouteResult, Error> {
        self.ribin_add(peer_id, prefix, attrs, AggrMarker::Ignore)
    }

    pub fn delete_route(
        &mut self,
        peer_id: PeerId,
        prefix: IpNetwork,
    ) -> Result<(), Error> {
        let net = F::network(prefix).ok_or(Error::PrefixInvalid(prefix))?;
        let ribin = self.ribin_id(peer_id)?;
        self.tables.with_table_as(
            ribin,
            RouteTable::as_rib_in_mut,
            |ribin, tables| ribin.delete_route(net, tables),
        )
    }

    pub fn push(&mut self, peer_id: PeerId) -> Result<(), Error> {
        let ribin = self.ribin_id(peer_id)?;
        self.tables.with_table_as(
            ribin,
            RouteTable::as_rib_in_mut,
            |ribin, tables| ribin.push(tables),
        );
        self.tables.attr_sets.prune();
        Ok(())
    }

    // ----- locally originated routes -----

    pub fn originate_route(
        &mut self,
        prefix: IpNetwork,
        attrs: Attrs,
        aggr: AggrMarker,
    ) -> Result<AddRouteResult, Error> {
        let result = self.ribin_add(LOCAL_PEER_ID, prefix, attrs, aggr)?;
        self.push(LOCAL_PEER_ID)?;
        Ok(result)
    }

    pub fn withdraw_route(&mut self, prefix: IpNetwork) -> Result<(), Error> {
        self.delete_route(LOCAL_PEER_ID, prefix)?;
        self.push(LOCAL_PEER_ID)
    }

    // ----- output flow control -----

    // Takes up to `max` updates queued towards the peer.
    pub fn pull_updates(
        &mut self,
        peer_id: PeerId,
        max: usize,
    ) -> Result<Vec<RouteUpdate>, Error> {
        if peer_id == LOCAL_PEER_ID {
            return Err(Error::PeerReserved(peer_id));
        }
        let tail = self.output_tail(peer_id)?;
        let updates = self.tables.with_table_as(
            tail,
            RouteTable::as_rib_out_mut,
            |ribout, _| ribout.pull(max),
        );
        self.output_no_longer_busy(peer_id)?;
        Ok(updates)
    }

    // Discards everything queued towards the peer.
    pub fn flush(&mut self, peer_id: PeerId) -> Result<(), Error> {
        let tail = self.output_tail(peer_id)?;
        if let Some(ribout) = self.tables.get_mut(tail).as_rib_out_mut() {
            ribout.flush();
        }
        self.output_no_longer_busy(peer_id)
    }

    // Resumes delivery of queued changes towards the peer.
    pub fn output_no_longer_busy(
        &mut self,
        peer_id: PeerId,
    ) -> Result<(), Error> {
        self.output_tail(peer_id)?;
        self.tables.with_table_as(
            self.fanout,
            RouteTable::as_fanout_mut,
            |fanout, tables| fanout.get_next_message(peer_id, tables),
        );
        Ok(())
    }

    // ----- inspection -----

    // Current best route for the given prefix.
    pub fn lookup_route(
        &self,
        prefix: IpNetwork,
    ) -> Option<InternalMessage<F>> {
        let net = F::network(prefix)?;
        self.tables.lookup_route(self.decision, &net)
    }

    pub fn get_prefix_count(&self, peer_id: PeerId) -> Result<usize, Error> {
        self.ribin(peer_id)
            .map(|ribin| ribin.route_count())
            .ok_or(Error::PeerUnknown(peer_id))
    }

    // All peers, the local pseudo-peer included.
    pub fn peer_ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    pub fn peer_tables(&self, peer_id: PeerId) -> Option<&PeerTables> {
        self.peers.get(&peer_id)
    }

    pub fn ribin(&self, peer_id: PeerId) -> Option<&RibInTable<F>> {
        let peer_tables = self.peers.get(&peer_id)?;
        self.tables.get(peer_tables.ribin).as_rib_in()
    }

    pub fn ribout(&self, peer_id: PeerId) -> Option<&RibOutTable<F>> {
        let output = self.peers.get(&peer_id)?.output.as_ref()?;
        self.tables.get(output.tail).as_rib_out()
    }

    pub fn egress(&self) -> &EgressTable<F> {
        let output = self.peers[&LOCAL_PEER_ID].output.as_ref();
        let Some(egress) = output
            .and_then(|output| self.tables.get(output.tail).as_egress())
        else {
            unreachable!();
        };
        egress
    }

    pub fn fanout(&self) -> &FanoutTable<F> {
        let Some(fanout) = self.tables.get(self.fanout).as_fanout() else {
            unreachable!();
        };
        fanout
    }

    pub fn filter(
        &self,
        peer_id: PeerId,
        direction: PolicyDirection,
    ) -> Option<&FilterTable<F>> {
        let peer_tables = self.peers.get(&peer_id)?;
        let table = match direction {
            PolicyDirection::Import => peer_tables.import_filter,
            PolicyDirection::Export => peer_tables.output.as_ref()?.filter,
            PolicyDirection::SourceMatch => return None,
        };
        self.tables.get(table).as_filter()
    }

    pub fn damping(&self, peer_id: PeerId) -> Option<&DampingTable<F>> {
        let peer_tables = self.peers.get(&peer_id)?;
        self.tables.get(peer_tables.damping).as_damping()
    }

    // Returns the latched fatal error, if any.
    pub fn status(&self) -> Result<(), &Error> {
        match &self.tables.fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    // ----- route table readers -----

    // Creates a reader over the routes of all peers, optionally restricted
    // to the prefixes within the given range.
    pub fn create_route_table_reader(
        &mut self,
        prefix: Option<IpNetwork>,
    ) -> Result<u32, Error> {
        let prefix = prefix
            .map(|prefix| {
                F::network(prefix).ok_or(Error::PrefixInvalid(prefix))
            })
            .transpose()?;
        let reader = RouteTableReader {
            iter: DumpIterator::with_range(self.dump_peers(), prefix),
            prefix,
        };

        let token = self.next_reader;
        self.next_reader = self.next_reader.wrapping_add(1).max(1);
        self.readers.insert(token, reader);
        Ok(token)
    }

    // Returns the next route of the reader. The reader is discarded once
    // exhausted.
    pub fn read_next_route(
        &mut self,
        token: u32,
    ) -> Result<Option<ReaderRoute<F>>, Error> {
        let reader = self
            .readers
            .get_mut(&token)
            .ok_or(Error::ReaderTokenUnknown(token))?;

        while let Some((peer_id, net)) = reader.iter.next(&self.tables) {
            if let Some(range) = reader.prefix
                && !range.is_supernet_of(net)
            {
                continue;
            }
            let Some(state) = reader.iter.state(peer_id) else {
                continue;
            };
            let Some(msg) = self.tables.lookup_route(state.ribin, &net)
            else {
                continue;
            };

            return Ok(Some(ReaderRoute {
                prefix: net,
                attrs: msg.route.attrs.clone(),
                origin: msg.origin,
                winner: msg.route.is_winner(),
            }));
        }

        self.readers.remove(&token);
        Ok(None)
    }

    // ----- configuration -----

    // Re-sends all stored routes through the pipeline, applying the current
    // policies.
    pub fn push_routes(&mut self) {
        let ribins = self
            .peers
            .values()
            .map(|peer_tables| peer_tables.ribin)
            .collect::<Vec<_>>();
        for ribin in ribins {
            self.tables.with_table_as(
                ribin,
                RouteTable::as_rib_in_mut,
                |ribin, tables| ribin.start_route_push(tables),
            );
        }
    }

    // Validates and installs a new set of policies.
    pub fn configure_policies(
        &mut self,
        policies: PolicyCfg,
    ) -> Result<(), Error> {
        for direction in [
            PolicyDirection::Import,
            PolicyDirection::SourceMatch,
            PolicyDirection::Export,
        ] {
            validate(policies.direction(direction), &policies)?;
        }

        self.tables.policies = policies;
        self.push_routes();
        Ok(())
    }

    // Validates and installs the policies of a single direction.
    pub fn configure_policy(
        &mut self,
        direction: PolicyDirection,
        cfg: DirectionPolicyCfg,
    ) -> Result<(), Error> {
        validate(&cfg, &self.tables.policies)?;

        *self.tables.policies.direction_mut(direction) = cfg;
        self.push_routes();
        Ok(())
    }

    // Installs new filter versions built from the current configuration.
    pub fn reconfigure_filters(
        &mut self,
        peer_id: PeerId,
    ) -> Result<(), Error> {
        let peer_tables = self
            .peers
            .get(&peer_id)
            .ok_or(Error::PeerUnknown(peer_id))?;
        let peer = peer_tables.peer.clone();

        configure_filter(
            &mut self.tables,
            peer_tables.import_filter,
            import_filters,
            &peer,
        );
        if let Some(output) = &peer_tables.output {
            configure_filter(
                &mut self.tables,
                output.filter,
                export_filters,
                &peer,
            );
        }

        Ok(())
    }

    pub fn update_config(&mut self, config: RibCfg) {
        self.tables.config = config;

        let peer_ids = self.peers.keys().copied().collect::<Vec<_>>();
        for peer_id in peer_ids {
            let _ = self.reconfigure_filters(peer_id);
        }
    }

    // ----- IGP routes -----

    pub fn igp_route_update(
        &mut self,
        prefix: IpNetwork,
        metric: u32,
    ) -> Result<(), Error> {
        let net = F::network(prefix).ok_or(Error::PrefixInvalid(prefix))?;
        Debug::NhtUpdate(net.ip().into(), Some(metric)).log();

        if self.tables.resolver.update(net, metric) {
            self.igp_nexthops_changed(net);
        }
        Ok(())
    }

    pub fn igp_route_delete(&mut self, prefix: IpNetwork) -> Result<(), Error> {
        let net = F::network(prefix).ok_or(Error::PrefixInvalid(prefix))?;
        Debug::NhtUpdate(net.ip().into(), None).log();

        if self.tables.resolver.delete(net) {
            self.igp_nexthops_changed(net);
        }
        Ok(())
    }

    // ----- pipeline events -----

    // Processes follow-up work scheduled by the pipeline. Work for tables
    // that no longer exist is ignored.
    pub fn process_msg(&mut self, msg: PipelineMsg) {
        match msg {
            PipelineMsg::DeletionSlice(msg) => {
                if self.tables.contains(msg.table) {
                    self.tables.with_table_as(
                        msg.table,
                        RouteTable::as_deletion_mut,
                        |deletion, tables| {
                            deletion.deletion_slice(tables);
                        },
                    );
                }
            }
            PipelineMsg::DumpSlice(msg) => {
                if self.tables.contains(msg.table) {
                    self.tables.with_table_as(
                        msg.table,
                        RouteTable::as_dump_mut,
                        |dump, tables| dump.dump_slice(tables),
                    );
                }
            }
            PipelineMsg::NexthopPush(msg) => {
                if self.tables.contains(msg.table) {
                    self.tables.with_table_as(
                        msg.table,
                        RouteTable::as_rib_in_mut,
                        |ribin, tables| ribin.nexthop_push_slice(tables),
                    );
                }
            }
            PipelineMsg::RoutePush(msg) => {
                if self.tables.contains(msg.table) {
                    self.tables.with_table_as(
                        msg.table,
                        RouteTable::as_rib_in_mut,
                        |ribin, tables| ribin.route_push_slice(tables),
                    );
                }
            }
            PipelineMsg::DampingReuse(msg) => {
                if let Some(net) = F::network(msg.prefix)
                    && self.tables.contains(msg.table)
                {
                    self.tables.with_table_as(
                        msg.table,
                        RouteTable::as_damping_mut,
                        |damping, tables| damping.reuse(net, tables),
                    );
                }
            }
        }
    }

    // Processes the completion of a forwarding-table command.
    pub fn rib_command_done(&mut self, msg: RibReplyMsg) -> Result<(), Error> {
        let Some(output) = &self.peers[&LOCAL_PEER_ID].output else {
            unreachable!();
        };
        self.tables.with_table_as(
            output.tail,
            RouteTable::as_egress_mut,
            |egress, tables| {
                egress.rib_command_done(msg.seq, msg.result, tables)
            },
        )
    }

    // ----- helper methods -----

    fn plumb_peering(&mut self, peer: PeerHandle) {
        Debug::PeeringAdd(&peer).log();

        let tables = &mut self.tables;
        let ribin = tables.insert(|id| {
            RouteTable::RibIn(RibInTable::new(id, peer.clone()))
        });
        let damping = tables.insert(|id| {
            RouteTable::Damping(DampingTable::new(id, peer.clone()))
        });
        let import_policy = tables.insert(|id| {
            RouteTable::Policy(PolicyTable::new(
                id,
                PolicyDirection::Import,
                None,
            ))
        });
        let import_filter = tables.insert(|id| {
            RouteTable::Filter(FilterTable::new(
                id,
                peer.clone(),
                PolicyDirection::Import,
            ))
        });
        let import_cache =
            tables.insert(|id| RouteTable::Cache(CacheTable::new(id)));
        tables.link(ribin, damping);
        tables.link(damping, import_policy);
        tables.link(import_policy, import_filter);
        tables.link(import_filter, import_cache);
        configure_filter(tables, import_filter, import_filters, &peer);

        tables
            .get_mut(import_cache)
            .sink_mut()
            .set_next_table(Some(self.decision));
        tables.with_table_as(
            self.decision,
            RouteTable::as_decision_mut,
            |decision, _| decision.add_parent(import_cache, peer.clone()),
        );

        let peer_id = peer.id;
        self.peers.insert(
            peer_id,
            PeerTables {
                peer,
                ribin,
                damping,
                import_policy,
                import_filter,
                import_cache,
                output: None,
            },
        );

        self.attach_output(peer_id);
        self.tables.with_table_as(
            ribin,
            RouteTable::as_rib_in_mut,
            |ribin, tables| ribin.peering_came_up(tables),
        );
    }

    // Builds the output branch of a peer and attaches it to the fanout,
    // preceded by a dump table if there are routes to send.
    fn attach_output(&mut self, peer_id: PeerId) {
        let dump_peers = self.dump_peers();
        let Some(peer_tables) = self.peers.get_mut(&peer_id) else {
            return;
        };
        if peer_tables.output.is_some() {
            return;
        }
        let peer = peer_tables.peer.clone();

        let tables = &mut self.tables;
        let policy = tables.insert(|id| {
            RouteTable::Policy(PolicyTable::new(
                id,
                PolicyDirection::Export,
                Some(peer.clone()),
            ))
        });
        let filter = tables.insert(|id| {
            RouteTable::Filter(FilterTable::new(
                id,
                peer.clone(),
                PolicyDirection::Export,
            ))
        });
        let cache = tables.insert(|id| RouteTable::Cache(CacheTable::new(id)));
        let tail = if peer.is_local() {
            tables.insert(|id| RouteTable::Egress(EgressTable::new(id)))
        } else {
            tables.insert(|id| {
                RouteTable::RibOut(RibOutTable::new(id, peer.clone()))
            })
        };
        tables.link(policy, filter);
        tables.link(filter, cache);
        tables.link(cache, tail);
        configure_filter(tables, filter, export_filters, &peer);

        let has_routes = tables
            .get(self.source_match)
            .as_policy()
            .is_some_and(|source_match| !source_match.is_empty());
        let head = if has_routes {
            let fanout = self.fanout;
            let dump = tables.insert(|id| {
                RouteTable::Dump(DumpTable::new(
                    id,
                    fanout,
                    peer.clone(),
                    tail,
                    DumpIterator::new(dump_peers),
                ))
            });
            tables.link(dump, policy);
            dump
        } else {
            policy
        };
        tables
            .get_mut(head)
            .sink_mut()
            .set_parent_table(Some(self.fanout));
        tables.with_table_as(
            self.fanout,
            RouteTable::as_fanout_mut,
            |fanout, _| fanout.add_next_table(peer, head, tail),
        );
        if head != policy {
            tables.with_table_as(
                head,
                RouteTable::as_dump_mut,
                |dump, tables| dump.start(tables),
            );
        }

        peer_tables.output = Some(OutputBranch {
            policy,
            filter,
            cache,
            tail,
        });
    }

    // Peers walked by dump iterators, along with their current sessions.
    fn dump_peers(&self) -> Vec<(PeerId, TableId, Genid)> {
        self.peers
            .iter()
            .filter_map(|(peer_id, peer_tables)| {
                let ribin = self.tables.get(peer_tables.ribin).as_rib_in()?;
                Some((*peer_id, peer_tables.ribin, ribin.genid()))
            })
            .collect()
    }

    fn ribin_add(
        &mut self,
        peer_id: PeerId,
        prefix: IpNetwork,
        attrs: Attrs,
        aggr: AggrMarker,
    ) -> Result<AddRouteResult, Error> {
        let net = F::network(prefix).ok_or(Error::PrefixInvalid(prefix))?;
        let ribin = self.ribin_id(peer_id)?;
        let attrs = self.tables.attr_sets.get(&attrs);
        self.tables.with_table_as(
            ribin,
            RouteTable::as_rib_in_mut,
            |ribin, tables| ribin.add_route(net, attrs, aggr, tables),
        )
    }

    fn ribin_id(&self, peer_id: PeerId) -> Result<TableId, Error> {
        self.peers
            .get(&peer_id)
            .map(|peer_tables| peer_tables.ribin)
            .ok_or(Error::PeerUnknown(peer_id))
    }

    fn output_tail(&self, peer_id: PeerId) -> Result<TableId, Error> {
        let peer_tables = self
            .peers
            .get(&peer_id)
            .ok_or(Error::PeerUnknown(peer_id))?;
        peer_tables
            .output
            .as_ref()
            .map(|output| output.tail)
            .ok_or(Error::PeerDown(peer_id))
    }

    // Notifies the RibIn tables of the next hops affected by a change of
    // the given IGP route.
    fn igp_nexthops_changed(&mut self, prefix: F::IpNetwork) {
        let ribins = self
            .peers
            .values()
            .map(|peer_tables| peer_tables.ribin)
            .collect::<Vec<_>>();
        for ribin in ribins {
            self.tables.with_table_as(
                ribin,
                RouteTable::as_rib_in_mut,
                |ribin, tables| {
                    for addr in ribin.nexthops_within(&prefix) {
                        ribin.igp_nexthop_changed(addr, tables);
                    }
                },
            );
        }
    }
}

// ===== helper functions =====

// Removes the output branch of a peer from the pipeline.
fn detach_output<F: AddressFamily>(
    tables: &mut Tables<F>,
    fanout: TableId,
    peer_tables: &mut PeerTables,
) {
    let Some(output) = peer_tables.output.take() else {
        return;
    };

    let peer_id = peer_tables.peer.id;
    let info = tables.with_table_as(
        fanout,
        RouteTable::as_fanout_mut,
        |fanout, _| fanout.remove_next_table(peer_id),
    );
    if let Some(info) = info
        && info.head != output.policy
    {
        // Dump still in progress.
        tables.remove(info.head);
    }
    for table in [output.policy, output.filter, output.cache, output.tail] {
        tables.remove(table);
    }
}

fn configure_filter<F: AddressFamily>(
    tables: &mut Tables<F>,
    filter: TableId,
    filters: fn(&PeerInfo, &RibCfg) -> Vec<RouteFilter>,
    peer: &PeerHandle,
) {
    tables.with_table_as(
        filter,
        RouteTable::as_filter_mut,
        |filter, tables| {
            for route_filter in filters(peer, &tables.config) {
                filter.add_filter(route_filter);
            }
            filter.reconfigure_filter();
        },
    );
}

// Filters applied to routes received from the given peer.
fn import_filters(peer: &PeerInfo, config: &RibCfg) -> Vec<RouteFilter> {
    let mut filters = vec![];
    match peer.peer_type {
        PeerType::Ebgp => {
            filters.push(RouteFilter::SimpleAs {
                asn: config.local_as,
            });
            filters.push(RouteFilter::LocalPrefInsertion {
                local_pref: config.default_local_pref,
            });
        }
        PeerType::EbgpConfed => {
            filters.push(RouteFilter::SimpleAs {
                asn: config.local_as,
            });
        }
        PeerType::Ibgp | PeerType::IbgpClient => {
            if let Some(cluster_id) = config.cluster_id {
                filters.push(RouteFilter::RrInput {
                    router_id: config.router_id,
                    cluster_id,
                });
            }
        }
        PeerType::Local => {}
    }
    filters
}

// Filters applied to routes sent to the given peer.
fn export_filters(peer: &PeerInfo, config: &RibCfg) -> Vec<RouteFilter> {
    if peer.peer_type == PeerType::Local {
        return vec![];
    }

    let mut filters = vec![
        RouteFilter::Aggregation {
            ibgp: peer.peer_type.is_ibgp(),
        },
        RouteFilter::KnownCommunity {
            peer_type: peer.peer_type,
        },
        RouteFilter::Unknown,
    ];
    match peer.peer_type {
        PeerType::Ebgp => {
            filters.push(RouteFilter::LocalPrefRemoval);
            filters.push(RouteFilter::MedRemoval);
            filters.push(RouteFilter::AsPrepend {
                asn: config.confed_id.unwrap_or(config.local_as),
                confed: false,
            });
            filters.push(RouteFilter::NexthopRewrite {
                addr: peer.local_addr,
            });
            filters.push(RouteFilter::MedInsertion);
        }
        PeerType::EbgpConfed => {
            filters.push(RouteFilter::AsPrepend {
                asn: config.local_as,
                confed: true,
            });
        }
        PeerType::Ibgp | PeerType::IbgpClient => {
            match config.cluster_id {
                Some(cluster_id) => filters.push(RouteFilter::RrIbgpLoop {
                    client: peer.peer_type == PeerType::IbgpClient,
                    router_id: config.router_id,
                    cluster_id,
                }),
                None => filters.push(RouteFilter::IbgpLoop),
            }
        }
        PeerType::Local => unreachable!(),
    }
    filters
}

// Validates all policies of a direction against the configured match sets.
fn validate(
    cfg: &DirectionPolicyCfg,
    policies: &PolicyCfg,
) -> Result<(), Error> {
    for policy in &cfg.policies {
        policy::validate(policy, &policies.match_sets).map_err(|error| {
            Error::PolicyInvalid(policy.name.clone(), error)
        })?;
    }
    Ok(())
}
