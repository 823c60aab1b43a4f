//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;

use holo_utils::bgp::RouteType;
use serde::{Deserialize, Serialize};

pub type PeerId = u32;

// Reserved for the pseudo-peer that owns locally originated routes and feeds
// the forwarding table.
pub const LOCAL_PEER_ID: PeerId = 0;

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeerType {
    Ibgp,
    IbgpClient,
    Ebgp,
    EbgpConfed,
    Local,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub name: String,
    pub peer_type: PeerType,
    pub remote_addr: IpAddr,
    pub local_addr: IpAddr,
    pub remote_as: u32,
    pub router_id: Ipv4Addr,
}

// Cheap, shared reference to a peering, compared by peer ID.
#[derive(Clone, Debug)]
pub struct PeerHandle(Rc<PeerInfo>);

// ===== impl PeerType =====

impl PeerType {
    pub fn is_ibgp(&self) -> bool {
        matches!(self, PeerType::Ibgp | PeerType::IbgpClient)
    }

    // External to the local AS (confederation members excluded).
    pub fn is_ebgp(&self) -> bool {
        matches!(self, PeerType::Ebgp)
    }

    // Route type used by best-path selection.
    //
    // RFC 5065 treats confederation peers as internal. Locally originated
    // routes are preferred like external ones.
    pub fn route_type(&self) -> RouteType {
        match self {
            PeerType::Ebgp | PeerType::Local => RouteType::External,
            PeerType::Ibgp | PeerType::IbgpClient | PeerType::EbgpConfed => {
                RouteType::Internal
            }
        }
    }
}

// ===== impl PeerInfo =====

impl PeerInfo {
    pub fn local(router_id: Ipv4Addr, local_as: u32) -> PeerInfo {
        PeerInfo {
            id: LOCAL_PEER_ID,
            name: "local".to_owned(),
            peer_type: PeerType::Local,
            remote_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            remote_as: local_as,
            router_id,
        }
    }
}

// ===== impl PeerHandle =====

impl PeerHandle {
    pub fn new(info: PeerInfo) -> PeerHandle {
        PeerHandle(Rc::new(info))
    }

    pub fn is_local(&self) -> bool {
        self.0.id == LOCAL_PEER_ID
    }
}

impl std::ops::Deref for PeerHandle {
    type Target = PeerInfo;

    fn deref(&self) -> &PeerInfo {
        &self.0
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &PeerHandle) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for PeerHandle {}

impl PartialOrd for PeerHandle {
    fn partial_cmp(&self, other: &PeerHandle) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerHandle {
    fn cmp(&self, other: &PeerHandle) -> std::cmp::Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl std::fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.name)
    }
}
