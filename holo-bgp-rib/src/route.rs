//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::af::AddressFamily;
use crate::attribute::{Attrs, BaseAttrs, RouteAttrs};
use crate::peer::PeerHandle;

// Generation of a peering session. Zero is never assigned.
pub type Genid = u32;

pub const GENID_UNKNOWN: Genid = 0;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteFlags: u8 {
        const WINNER = 0x01;
        const IN_USE = 0x02;
        const FILTERED = 0x04;
    }
}

// Marker set on locally originated routes that take part in aggregation.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggrMarker {
    #[default]
    Ignore,
    // The aggregate itself.
    Aggregate,
    // A more specific route covered by an aggregate.
    Component,
}

// Outcome of handing a route to the next stage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AddRouteResult {
    Used,
    Unused,
    Failure,
    Filtered,
}

// A route for a single destination.
//
// Routes are immutable apart from their flags. Stages that modify a route
// create a derived copy pointing back at the route it was derived from. The
// decision flags and the IGP metric always live on the original route stored
// by the RibIn.
#[derive(Debug)]
pub struct SubnetRoute<F: AddressFamily> {
    pub net: F::IpNetwork,
    pub attrs: RouteAttrs,
    pub parent: Option<RouteRef<F>>,
    pub aggr: AggrMarker,
    pub policy_tags: BTreeSet<u32>,
    flags: Cell<RouteFlags>,
    igp_metric: Cell<Option<u32>>,
}

pub type RouteRef<F> = Rc<SubnetRoute<F>>;

// Envelope carried between pipeline stages.
#[derive(Debug)]
pub struct InternalMessage<F: AddressFamily> {
    pub route: RouteRef<F>,
    pub origin: PeerHandle,
    pub genid: Genid,
    // The carried route differs from what the previous stage handled.
    pub changed: bool,
    // Last message of a batch.
    pub push: bool,
    // Route from an earlier session of the same peer, being drained.
    pub from_previous_peering: bool,
    // Unchanged route presented again so that downstream stages re-apply
    // filters, policies and best-path selection.
    pub reevaluate: bool,
}

// ===== impl SubnetRoute =====

impl<F> SubnetRoute<F>
where
    F: AddressFamily,
{
    pub fn new(
        net: F::IpNetwork,
        attrs: RouteAttrs,
        aggr: AggrMarker,
    ) -> RouteRef<F> {
        Rc::new(SubnetRoute {
            net,
            attrs,
            parent: None,
            aggr,
            policy_tags: Default::default(),
            flags: Cell::new(RouteFlags::empty()),
            igp_metric: Cell::new(None),
        })
    }

    // Creates a modified copy of `route`.
    pub fn derive(
        route: &RouteRef<F>,
        attrs: RouteAttrs,
        policy_tags: BTreeSet<u32>,
    ) -> RouteRef<F> {
        Rc::new(SubnetRoute {
            net: route.net,
            attrs,
            parent: Some(route.clone()),
            aggr: route.aggr,
            policy_tags,
            flags: Cell::new(RouteFlags::empty()),
            igp_metric: Cell::new(None),
        })
    }

    pub fn base(&self) -> &BaseAttrs {
        &self.attrs.value.base
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs.value
    }

    // Route this one was ultimately derived from.
    pub fn original(&self) -> &SubnetRoute<F> {
        let mut route = self;
        while let Some(parent) = &route.parent {
            route = parent.as_ref();
        }
        route
    }

    pub fn flags(&self) -> RouteFlags {
        self.original().flags.get()
    }

    pub fn is_winner(&self) -> bool {
        self.flags().contains(RouteFlags::WINNER)
    }

    pub fn set_is_winner(&self, igp_metric: u32) {
        let original = self.original();
        original.update_flags(RouteFlags::WINNER | RouteFlags::IN_USE, true);
        original.igp_metric.set(Some(igp_metric));
    }

    pub fn set_is_not_winner(&self) {
        let original = self.original();
        original.update_flags(RouteFlags::WINNER | RouteFlags::IN_USE, false);
    }

    pub fn in_use(&self) -> bool {
        self.flags().contains(RouteFlags::IN_USE)
    }

    pub fn set_in_use(&self, in_use: bool) {
        self.original().update_flags(RouteFlags::IN_USE, in_use);
    }

    pub fn is_filtered(&self) -> bool {
        self.flags().contains(RouteFlags::FILTERED)
    }

    pub fn set_filtered(&self, filtered: bool) {
        self.original().update_flags(RouteFlags::FILTERED, filtered);
    }

    pub fn igp_metric(&self) -> Option<u32> {
        self.original().igp_metric.get()
    }

    // Record the result returned by the downstream stages.
    pub fn record_result(&self, result: AddRouteResult) {
        match result {
            AddRouteResult::Used => {
                self.set_filtered(false);
                self.set_in_use(true);
            }
            AddRouteResult::Unused | AddRouteResult::Failure => {
                self.set_filtered(false);
                self.set_in_use(false);
            }
            AddRouteResult::Filtered => {
                self.set_filtered(true);
                self.set_in_use(false);
            }
        }
    }

    // Result recorded the last time this route was sent downstream.
    pub fn recorded_result(&self) -> AddRouteResult {
        if self.is_filtered() {
            AddRouteResult::Filtered
        } else if self.in_use() {
            AddRouteResult::Used
        } else {
            AddRouteResult::Unused
        }
    }

    fn update_flags(&self, flags: RouteFlags, value: bool) {
        let mut current = self.flags.get();
        current.set(flags, value);
        self.flags.set(current);
    }
}

// ===== impl InternalMessage =====

impl<F> InternalMessage<F>
where
    F: AddressFamily,
{
    pub fn new(route: RouteRef<F>, origin: PeerHandle, genid: Genid) -> Self {
        InternalMessage {
            route,
            origin,
            genid,
            changed: false,
            push: false,
            from_previous_peering: false,
            reevaluate: false,
        }
    }

    pub fn net(&self) -> F::IpNetwork {
        self.route.net
    }

    // Returns whether both messages carry the same content from the same
    // session, even if the routes were derived separately.
    pub fn is_same_route(&self, other: &Self) -> bool {
        self.origin.id == other.origin.id
            && self.genid == other.genid
            && Rc::ptr_eq(&self.route.attrs, &other.route.attrs)
            && self.route.aggr == other.route.aggr
    }

    // Same envelope carrying a modified route.
    pub fn with_route(&self, route: RouteRef<F>) -> Self {
        InternalMessage {
            route,
            origin: self.origin.clone(),
            genid: self.genid,
            changed: true,
            push: self.push,
            from_previous_peering: self.from_previous_peering,
            reevaluate: self.reevaluate,
        }
    }
}

impl<F> Clone for InternalMessage<F>
where
    F: AddressFamily,
{
    fn clone(&self) -> Self {
        InternalMessage {
            route: self.route.clone(),
            origin: self.origin.clone(),
            genid: self.genid,
            changed: self.changed,
            push: self.push,
            from_previous_peering: self.from_previous_peering,
            reevaluate: self.reevaluate,
        }
    }
}

// ===== global functions =====

// Next generation ID, skipping zero on wrap-around.
pub fn next_genid(genid: Genid) -> Genid {
    match genid.wrapping_add(1) {
        GENID_UNKNOWN => 1,
        genid => genid,
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use ipnetwork::Ipv4Network;

    use super::*;
    use crate::af::Ipv4Unicast;
    use crate::attribute::AttrSet;

    fn route() -> RouteRef<Ipv4Unicast> {
        let net = Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
        SubnetRoute::new(
            net,
            AttrSet::detached(Attrs::default()),
            AggrMarker::Ignore,
        )
    }

    #[test]
    fn test_genid_skips_zero() {
        assert_eq!(next_genid(1), 2);
        assert_eq!(next_genid(u32::MAX), 1);
    }

    #[test]
    fn test_flags_follow_original() {
        let original = route();
        let derived = SubnetRoute::derive(
            &original,
            AttrSet::detached(Attrs::default()),
            Default::default(),
        );
        let derived2 =
            SubnetRoute::derive(&derived, derived.attrs.clone(), [7].into());

        derived2.set_is_winner(10);
        assert!(original.is_winner());
        assert!(derived.is_winner());
        assert_eq!(original.igp_metric(), Some(10));

        derived.set_is_not_winner();
        assert!(!derived2.is_winner());
        assert!(!original.in_use());
    }

    #[test]
    fn test_record_result() {
        let route = route();
        route.record_result(AddRouteResult::Filtered);
        assert!(route.is_filtered());
        assert_eq!(route.recorded_result(), AddRouteResult::Filtered);
        route.record_result(AddRouteResult::Used);
        assert!(!route.is_filtered());
        assert_eq!(route.recorded_result(), AddRouteResult::Used);
    }
}
