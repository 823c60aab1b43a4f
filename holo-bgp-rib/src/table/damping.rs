//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use holo_utils::task::TimeoutTask;

use crate::af::AddressFamily;
use crate::config::DampingCfg;
use crate::debug::Debug;
use crate::peer::{PeerHandle, PeerType};
use crate::route::{AddRouteResult, InternalMessage};
use crate::table::{RouteSink, RouteSource, TableId, Tables};
use crate::tasks;

// Route flap damping (RFC 2439) for routes learned from external peers.
#[derive(Debug)]
pub struct DampingTable<F: AddressFamily> {
    id: TableId,
    parent: Option<TableId>,
    next: Option<TableId>,
    peer: PeerHandle,
    damp: BTreeMap<F::IpNetwork, Damp<F>>,
}

// Flap history of a prefix.
#[derive(Debug)]
struct Damp<F: AddressFamily> {
    merit: u32,
    updated: Instant,
    suppressed: Option<Suppressed<F>>,
}

#[derive(Debug)]
struct Suppressed<F: AddressFamily> {
    // Latest version of the route, withheld from the rest of the pipeline.
    held: Option<InternalMessage<F>>,
    _reuse_timer: TimeoutTask,
}

// ===== impl DampingTable =====

impl<F> DampingTable<F>
where
    F: AddressFamily,
{
    pub fn new(id: TableId, peer: PeerHandle) -> DampingTable<F> {
        DampingTable {
            id,
            parent: None,
            next: None,
            peer,
            damp: Default::default(),
        }
    }

    pub fn is_suppressed(&self, net: &F::IpNetwork) -> bool {
        self.damp
            .get(net)
            .is_some_and(|damp| damp.suppressed.is_some())
    }

    pub fn merit(&self, net: &F::IpNetwork) -> Option<u32> {
        self.damp.get(net).map(|damp| damp.merit)
    }

    // Processes the expiry of a reuse timer.
    pub fn reuse(&mut self, net: F::IpNetwork, tables: &mut Tables<F>) {
        let now = Instant::now();
        let Some(damp) = self.damp.get_mut(&net) else {
            return;
        };
        if damp.suppressed.is_none() {
            return;
        }

        let cfg = &tables.config.damping;
        let merit = damp.current_merit(cfg, now);
        if merit > cfg.reuse {
            // Not there yet.
            let delay = reuse_delay(merit, cfg);
            let reuse_timer = self.reuse_timer(net, delay, tables);
            if let Some(suppressed) = self
                .damp
                .get_mut(&net)
                .and_then(|damp| damp.suppressed.as_mut())
            {
                suppressed._reuse_timer = reuse_timer;
            }
            return;
        }

        Debug::DampingReuse(net.into()).log();
        damp.merit = merit;
        damp.updated = now;
        let held = damp.suppressed.take().and_then(|s| s.held);
        if let Some(msg) = held {
            let next = self.downstream();
            tables.add_route(next, msg, self.id);
            tables.push(next, self.id);
        }
    }

    fn is_active(&self, tables: &Tables<F>) -> bool {
        tables.config.damping.enabled && self.peer.peer_type == PeerType::Ebgp
    }

    // Records a flap of the given prefix.
    fn flap(&mut self, net: F::IpNetwork, tables: &Tables<F>) {
        let cfg = &tables.config.damping;
        let now = Instant::now();
        let damp = self.damp.entry(net).or_insert_with(|| Damp {
            merit: 0,
            updated: now,
            suppressed: None,
        });
        damp.merit = damp
            .current_merit(cfg, now)
            .saturating_add(cfg.penalty)
            .min(cfg.max_merit());
        damp.updated = now;
    }

    // Returns whether an announcement of the given prefix must be withheld
    // from now on.
    fn above_cutoff(&self, net: &F::IpNetwork, tables: &Tables<F>) -> bool {
        let cfg = &tables.config.damping;
        self.damp.get(net).is_some_and(|damp| {
            damp.suppressed.is_none()
                && damp.current_merit(cfg, Instant::now()) > cfg.cutoff
        })
    }

    fn suppress(
        &mut self,
        net: F::IpNetwork,
        held: Option<InternalMessage<F>>,
        tables: &Tables<F>,
    ) {
        let cfg = &tables.config.damping;
        let merit = self.damp[&net].merit;
        Debug::DampingSuppress(net.into(), merit).log();

        let delay = reuse_delay(merit, cfg);
        let reuse_timer = self.reuse_timer(net, delay, tables);
        if let Some(damp) = self.damp.get_mut(&net) {
            damp.suppressed = Some(Suppressed {
                held,
                _reuse_timer: reuse_timer,
            });
        }
    }

    fn reuse_timer(
        &self,
        net: F::IpNetwork,
        delay: Duration,
        tables: &Tables<F>,
    ) -> TimeoutTask {
        tasks::damping_reuse_timer(
            F::AFI_SAFI,
            self.id,
            net.into(),
            delay,
            &tables.tx.sched,
        )
    }

    // Held route of a suppressed prefix, if suppressed at all.
    fn held_mut(
        &mut self,
        net: &F::IpNetwork,
    ) -> Option<&mut Option<InternalMessage<F>>> {
        self.damp
            .get_mut(net)
            .and_then(|damp| damp.suppressed.as_mut())
            .map(|suppressed| &mut suppressed.held)
    }
}

impl<F> RouteSink<F> for DampingTable<F>
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
        let next = self.downstream();
        if !self.is_active(tables) {
            return tables.add_route(next, msg, self.id);
        }

        let net = msg.net();
        if let Some(held) = self.held_mut(&net) {
            *held = Some(msg);
            return AddRouteResult::Unused;
        }

        // The withdrawal preceding a re-announcement was already penalized.
        if !msg.reevaluate && self.above_cutoff(&net, tables) {
            self.suppress(net, Some(msg), tables);
            return AddRouteResult::Unused;
        }

        tables.add_route(next, msg, self.id)
    }

    fn replace_route(
        &mut self,
        old: InternalMessage<F>,
        new: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) -> AddRouteResult {
        let next = self.downstream();
        if !self.is_active(tables) {
            return tables.replace_route(next, old, new, self.id);
        }

        let net = new.net();
        if !new.reevaluate {
            self.flap(net, tables);
        }
        if let Some(held) = self.held_mut(&net) {
            *held = Some(new);
            return AddRouteResult::Unused;
        }

        if !new.reevaluate && self.above_cutoff(&net, tables) {
            // The rest of the pipeline forgets about the route until it's
            // reused.
            tables.delete_route(next, old, self.id);
            self.suppress(net, Some(new), tables);
            return AddRouteResult::Unused;
        }

        tables.replace_route(next, old, new, self.id)
    }

    fn delete_route(
        &mut self,
        msg: InternalMessage<F>,
        _caller: TableId,
        tables: &mut Tables<F>,
    ) {
        let next = self.downstream();
        if !self.is_active(tables) {
            return tables.delete_route(next, msg, self.id);
        }

        let net = msg.net();
        if !msg.reevaluate && !msg.from_previous_peering {
            self.flap(net, tables);
        }
        if let Some(held) = self.held_mut(&net) {
            // Never announced downstream.
            *held = None;
            return;
        }

        tables.delete_route(next, msg, self.id)
    }
}

impl<F> RouteSource<F> for DampingTable<F>
where
    F: AddressFamily,
{
    fn lookup_route(
        &self,
        net: &F::IpNetwork,
        tables: &Tables<F>,
    ) -> Option<InternalMessage<F>> {
        if self.is_suppressed(net) {
            return None;
        }
        tables.lookup_route(self.parent?, net)
    }
}

// ===== impl Damp =====

impl<F> Damp<F>
where
    F: AddressFamily,
{
    fn current_merit(&self, cfg: &DampingCfg, now: Instant) -> u32 {
        decay(self.merit, now.duration_since(self.updated), cfg.half_life())
    }
}

// ===== helper functions =====

// Exponential decay of a figure of merit.
fn decay(merit: u32, elapsed: Duration, half_life: Duration) -> u32 {
    if half_life.is_zero() {
        return 0;
    }
    let periods = elapsed.as_secs_f64() / half_life.as_secs_f64();
    (f64::from(merit) * (-periods).exp2()) as u32
}

// Time until the figure of merit decays down to the reuse threshold.
fn reuse_delay(merit: u32, cfg: &DampingCfg) -> Duration {
    if merit <= cfg.reuse || cfg.reuse == 0 {
        return Duration::ZERO;
    }
    let periods = (f64::from(merit) / f64::from(cfg.reuse)).log2();
    cfg.half_life().mul_f64(periods)
}

// ===== unit tests =====
