//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use holo_utils::bgp::AfiSafi;
use ipnetwork::IpNetwork;

use crate::af::{Ipv4Unicast, Ipv6Unicast};
use crate::attribute::Attrs;
use crate::config::RibCfg;
use crate::error::Error;
use crate::peer::{PeerId, PeerInfo};
use crate::plumbing::Plumbing;
use crate::policy::PolicyCfg;
use crate::route::{AddRouteResult, AggrMarker};
use crate::table::PipelineChannelsTx;
use crate::table::ribout::RouteUpdate;
use crate::tasks::messages::input::{PipelineMsg, RibReplyMsg};

// Route pipelines of all supported address families.
#[derive(Debug)]
pub struct BgpRib {
    pub ipv4: Plumbing<Ipv4Unicast>,
    pub ipv6: Plumbing<Ipv6Unicast>,
}

// ===== impl BgpRib =====

impl BgpRib {
    pub fn new(
        config: RibCfg,
        policies: PolicyCfg,
        tx: PipelineChannelsTx,
    ) -> BgpRib {
        BgpRib {
            ipv4: Plumbing::new(config.clone(), policies.clone(), tx.clone()),
            ipv6: Plumbing::new(config, policies, tx),
        }
    }

    pub fn add_peering(&mut self, peer: PeerInfo) -> Result<(), Error> {
        self.ipv4.add_peering(peer.clone())?;
        self.ipv6.add_peering(peer)
    }

    pub fn stop_peering(&mut self, peer_id: PeerId) -> Result<(), Error> {
        self.ipv4.stop_peering(peer_id)?;
        self.ipv6.stop_peering(peer_id)
    }

    pub fn peering_went_down(&mut self, peer_id: PeerId) -> Result<(), Error> {
        self.ipv4.peering_went_down(peer_id)?;
        self.ipv6.peering_went_down(peer_id)
    }

    pub fn peering_came_up(&mut self, peer_id: PeerId) -> Result<(), Error> {
        self.ipv4.peering_came_up(peer_id)?;
        self.ipv6.peering_came_up(peer_id)
    }

    pub fn delete_peering(&mut self, peer_id: PeerId) -> Result<(), Error> {
        self.ipv4.delete_peering(peer_id)?;
        self.ipv6.delete_peering(peer_id)
    }

    pub fn add_route(
        &mut self,
        peer_id: PeerId,
        prefix: IpNetwork,
        attrs: Attrs,
    ) -> Result<AddRouteResult, Error> {
        match prefix {
            IpNetwork::V4(_) => self.ipv4.add_route(peer_id, prefix, attrs),
            IpNetwork::V6(_) => self.ipv6.add_route(peer_id, prefix, attrs),
        }
    }

    pub fn delete_route(
        &mut self,
        peer_id: PeerId,
        prefix: IpNetwork,
    ) -> Result<(), Error> {
        match prefix {
            IpNetwork::V4(_) => self.ipv4.delete_route(peer_id, prefix),
            IpNetwork::V6(_) => self.ipv6.delete_route(peer_id, prefix),
        }
    }

    pub fn push(&mut self, peer_id: PeerId) -> Result<(), Error> {
        self.ipv4.push(peer_id)?;
        self.ipv6.push(peer_id)
    }

    pub fn originate_route(
        &mut self,
        prefix: IpNetwork,
        attrs: Attrs,
        aggr: AggrMarker,
    ) -> Result<AddRouteResult, Error> {
        match prefix {
            IpNetwork::V4(_) => self.ipv4.originate_route(prefix, attrs, aggr),
            IpNetwork::V6(_) => self.ipv6.originate_route(prefix, attrs, aggr),
        }
    }

    pub fn withdraw_route(&mut self, prefix: IpNetwork) -> Result<(), Error> {
        match prefix {
            IpNetwork::V4(_) => self.ipv4.withdraw_route(prefix),
            IpNetwork::V6(_) => self.ipv6.withdraw_route(prefix),
        }
    }

    pub fn igp_route_update(
        &mut self,
        prefix: IpNetwork,
        metric: u32,
    ) -> Result<(), Error> {
        match prefix {
            IpNetwork::V4(_) => self.ipv4.igp_route_update(prefix, metric),
            IpNetwork::V6(_) => self.ipv6.igp_route_update(prefix, metric),
        }
    }

    pub fn igp_route_delete(&mut self, prefix: IpNetwork) -> Result<(), Error> {
        match prefix {
            IpNetwork::V4(_) => self.ipv4.igp_route_delete(prefix),
            IpNetwork::V6(_) => self.ipv6.igp_route_delete(prefix),
        }
    }

    pub fn pull_updates(
        &mut self,
        afi_safi: AfiSafi,
        peer_id: PeerId,
        max: usize,
    ) -> Result<Vec<RouteUpdate>, Error> {
        match afi_safi {
            AfiSafi::Ipv4Unicast => self.ipv4.pull_updates(peer_id, max),
            AfiSafi::Ipv6Unicast => self.ipv6.pull_updates(peer_id, max),
        }
    }

    pub fn configure_policies(
        &mut self,
        policies: PolicyCfg,
    ) -> Result<(), Error> {
        self.ipv4.configure_policies(policies.clone())?;
        self.ipv6.configure_policies(policies)
    }

    pub fn update_config(&mut self, config: RibCfg) {
        self.ipv4.update_config(config.clone());
        self.ipv6.update_config(config);
    }

    pub fn process_msg(&mut self, msg: PipelineMsg) {
        match msg.afi_safi() {
            AfiSafi::Ipv4Unicast => self.ipv4.process_msg(msg),
            AfiSafi::Ipv6Unicast => self.ipv6.process_msg(msg),
        }
    }

    pub fn rib_command_done(&mut self, msg: RibReplyMsg) -> Result<(), Error> {
        match msg.afi_safi {
            AfiSafi::Ipv4Unicast => self.ipv4.rib_command_done(msg),
            AfiSafi::Ipv6Unicast => self.ipv6.rib_command_done(msg),
        }
    }

    // Returns the first latched fatal error.
    pub fn status(&self) -> Result<(), &Error> {
        self.ipv4.status().and(self.ipv6.status())
    }
}

// ===== unit tests =====
