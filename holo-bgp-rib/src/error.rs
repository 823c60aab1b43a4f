//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tracing::{error, warn, warn_span};

use crate::peer::PeerId;
use crate::policy::PolicyError;

// Route pipeline errors.
#[derive(Debug)]
pub enum Error {
    // Peering management
    PeerUnknown(PeerId),
    PeerDuplicate(PeerId),
    PeerDown(PeerId),
    PeerReserved(PeerId),
    // Route processing
    PrefixUnknown(PeerId, IpNetwork),
    PrefixInvalid(IpNetwork),
    // Inspection
    ReaderTokenUnknown(u32),
    // Configuration
    PolicyInvalid(String, PolicyError),
    // Forwarding table
    RibCommandUnknown(u64),
    RibCommand(u64, RibCommandError),
    RibEndpointGone,
}

// Failures reported by the forwarding-table client.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RibCommandError {
    // Command refused by the remote end.
    Rejected(String),
    Timeout,
    // The forwarding-table process is gone.
    EndpointGone,
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::PeerUnknown(peer_id)
            | Error::PeerDuplicate(peer_id)
            | Error::PeerDown(peer_id)
            | Error::PeerReserved(peer_id) => {
                warn_span!("peer", id = %peer_id).in_scope(|| {
                    warn!("{}", self);
                });
            }
            Error::PrefixUnknown(peer_id, prefix) => {
                warn_span!("peer", id = %peer_id).in_scope(|| {
                    warn!(%prefix, "{}", self);
                });
            }
            Error::PrefixInvalid(prefix) => {
                warn!(%prefix, "{}", self);
            }
            Error::ReaderTokenUnknown(token) => {
                warn!(%token, "{}", self);
            }
            Error::PolicyInvalid(name, error) => {
                warn!(%name, error = %with_source(error), "{}", self);
            }
            Error::RibCommandUnknown(seq) => {
                warn!(%seq, "{}", self);
            }
            Error::RibCommand(seq, error) => {
                warn!(%seq, %error, "{}", self);
            }
            Error::RibEndpointGone => {
                error!("{}", self);
            }
        }
    }

    // Whether the pipeline can't continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::RibEndpointGone
                | Error::RibCommand(_, RibCommandError::EndpointGone)
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::PeerUnknown(..) => write!(f, "unknown peer"),
            Error::PeerDuplicate(..) => write!(f, "peer already exists"),
            Error::PeerDown(..) => write!(f, "peering is down"),
            Error::PeerReserved(..) => write!(f, "reserved peer ID"),
            Error::PrefixUnknown(..) => {
                write!(f, "attempt to delete a route that doesn't exist")
            }
            Error::PrefixInvalid(..) => {
                write!(f, "prefix doesn't match the address family")
            }
            Error::ReaderTokenUnknown(..) => {
                write!(f, "unknown route table reader")
            }
            Error::PolicyInvalid(..) => write!(f, "invalid routing policy"),
            Error::RibCommandUnknown(..) => {
                write!(f, "completion for unknown forwarding-table command")
            }
            Error::RibCommand(..) => {
                write!(f, "forwarding-table command failed")
            }
            Error::RibEndpointGone => {
                write!(f, "forwarding-table endpoint is gone")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::PolicyInvalid(_, error) => Some(error),
            Error::RibCommand(_, error) => Some(error),
            _ => None,
        }
    }
}

// ===== impl RibCommandError =====

impl std::fmt::Display for RibCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RibCommandError::Rejected(reason) => {
                write!(f, "command rejected: {}", reason)
            }
            RibCommandError::Timeout => write!(f, "command timed out"),
            RibCommandError::EndpointGone => {
                write!(f, "remote endpoint is gone")
            }
        }
    }
}

impl std::error::Error for RibCommandError {}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
