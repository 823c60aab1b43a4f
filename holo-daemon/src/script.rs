//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use holo_bgp_rib::attribute::Attrs;
use holo_bgp_rib::error::Error;
use holo_bgp_rib::instance::BgpRib;
use holo_bgp_rib::peer::PeerId;
use holo_bgp_rib::route::AggrMarker;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use tracing::info;

// Session event read from the script file, one JSON object per line.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", deny_unknown_fields)]
pub enum Event {
    PeeringUp {
        peer_id: PeerId,
    },
    PeeringDown {
        peer_id: PeerId,
    },
    PeeringStop {
        peer_id: PeerId,
    },
    PeeringDelete {
        peer_id: PeerId,
    },
    AddRoute {
        peer_id: PeerId,
        prefix: IpNetwork,
        #[serde(default)]
        attrs: Attrs,
    },
    DeleteRoute {
        peer_id: PeerId,
        prefix: IpNetwork,
    },
    Push {
        peer_id: PeerId,
    },
    OriginateRoute {
        prefix: IpNetwork,
        #[serde(default)]
        attrs: Attrs,
        #[serde(default)]
        aggr: AggrMarker,
    },
    WithdrawRoute {
        prefix: IpNetwork,
    },
    IgpRouteUpdate {
        prefix: IpNetwork,
        metric: u32,
    },
    IgpRouteDelete {
        prefix: IpNetwork,
    },
    // Log all routes within the given range.
    ShowRoutes {
        #[serde(default)]
        prefix: Option<IpNetwork>,
    },
}

#[derive(Debug)]
pub enum ScriptError {
    Io(std::io::Error),
    Parse(usize, serde_json::Error),
}

// ===== impl Event =====

impl Event {
    pub(crate) fn process(self, rib: &mut BgpRib) -> Result<(), Error> {
        match self {
            Event::PeeringUp { peer_id } => rib.peering_came_up(peer_id),
            Event::PeeringDown { peer_id } => rib.peering_went_down(peer_id),
            Event::PeeringStop { peer_id } => rib.stop_peering(peer_id),
            Event::PeeringDelete { peer_id } => rib.delete_peering(peer_id),
            Event::AddRoute {
                peer_id,
                prefix,
                attrs,
            } => rib.add_route(peer_id, prefix, attrs).map(|_| ()),
            Event::DeleteRoute { peer_id, prefix } => {
                rib.delete_route(peer_id, prefix)
            }
            Event::Push { peer_id } => rib.push(peer_id),
            Event::OriginateRoute {
                prefix,
                attrs,
                aggr,
            } => rib.originate_route(prefix, attrs, aggr).map(|_| ()),
            Event::WithdrawRoute { prefix } => rib.withdraw_route(prefix),
            Event::IgpRouteUpdate { prefix, metric } => {
                rib.igp_route_update(prefix, metric)
            }
            Event::IgpRouteDelete { prefix } => rib.igp_route_delete(prefix),
            Event::ShowRoutes { prefix } => show_routes(rib, prefix),
        }
    }
}

// ===== impl ScriptError =====

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::Io(..) => write!(f, "failed to read script file"),
            ScriptError::Parse(line, ..) => {
                write!(f, "invalid event at line {}", line)
            }
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScriptError::Io(error) => Some(error),
            ScriptError::Parse(_, error) => Some(error),
        }
    }
}

// ===== global functions =====

// Reads the events of a script file.
pub(crate) fn load(path: &str) -> Result<Vec<Event>, ScriptError> {
    let script = std::fs::read_to_string(path).map_err(ScriptError::Io)?;
    parse(&script)
}

// Parses one event per line. Empty lines and lines starting with '#' are
// skipped.
fn parse(script: &str) -> Result<Vec<Event>, ScriptError> {
    script
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(lineno, line)| {
            serde_json::from_str(line)
                .map_err(|error| ScriptError::Parse(lineno, error))
        })
        .collect()
}

fn show_routes(
    rib: &mut BgpRib,
    prefix: Option<IpNetwork>,
) -> Result<(), Error> {
    let ipv4 = !matches!(prefix, Some(IpNetwork::V6(_)));
    let ipv6 = !matches!(prefix, Some(IpNetwork::V4(_)));

    if ipv4 {
        let token = rib.ipv4.create_route_table_reader(prefix)?;
        while let Some(route) = rib.ipv4.read_next_route(token)? {
            info!(
                prefix = %route.prefix,
                origin = %route.origin,
                winner = %route.winner,
                attrs = ?route.attrs.value,
                "route"
            );
        }
    }
    if ipv6 {
        let token = rib.ipv6.create_route_table_reader(prefix)?;
        while let Some(route) = rib.ipv6.read_next_route(token)? {
            info!(
                prefix = %route.prefix,
                origin = %route.origin,
                winner = %route.winner,
                attrs = ?route.attrs.value,
                "route"
            );
        }
    }

    Ok(())
}

// ===== unit tests =====
