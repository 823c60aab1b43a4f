//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DFLT_LOCAL_PREF: u32 = 100;
pub const DFLT_BATCH_SIZE: usize = 100;
pub const DFLT_RIBOUT_LIMIT: usize = 1000;
pub const DFLT_EGRESS_WINDOW: usize = 100;
pub const DFLT_DISTANCE_EBGP: u8 = 20;
pub const DFLT_DISTANCE_IBGP: u8 = 200;

// Route pipeline configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RibCfg {
    pub local_as: u32,
    pub router_id: Ipv4Addr,
    // Route reflection is enabled when a cluster ID is set.
    pub cluster_id: Option<Ipv4Addr>,
    pub confed_id: Option<u32>,
    pub default_local_pref: u32,
    pub route_selection: RouteSelectionCfg,
    pub damping: DampingCfg,
    pub deletion_batch: usize,
    pub dump_batch: usize,
    pub route_push_batch: usize,
    pub ribout_limit: usize,
    pub egress_window: usize,
    pub distance_ebgp: u8,
    pub distance_ibgp: u8,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteSelectionCfg {
    pub always_compare_med: bool,
    pub ignore_as_path_length: bool,
}

// Route flap damping parameters (RFC 2439).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DampingCfg {
    pub enabled: bool,
    // Minutes.
    pub half_life: u32,
    // Minutes.
    pub max_suppress: u32,
    pub reuse: u32,
    pub cutoff: u32,
    pub penalty: u32,
}

// ===== impl RibCfg =====

impl Default for RibCfg {
    fn default() -> RibCfg {
        RibCfg {
            local_as: 65000,
            router_id: Ipv4Addr::new(1, 1, 1, 1),
            cluster_id: None,
            confed_id: None,
            default_local_pref: DFLT_LOCAL_PREF,
            route_selection: Default::default(),
            damping: Default::default(),
            deletion_batch: DFLT_BATCH_SIZE,
            dump_batch: DFLT_BATCH_SIZE,
            route_push_batch: DFLT_BATCH_SIZE,
            ribout_limit: DFLT_RIBOUT_LIMIT,
            egress_window: DFLT_EGRESS_WINDOW,
            distance_ebgp: DFLT_DISTANCE_EBGP,
            distance_ibgp: DFLT_DISTANCE_IBGP,
        }
    }
}

// ===== impl DampingCfg =====

impl DampingCfg {
    pub fn half_life(&self) -> Duration {
        Duration::from_secs(u64::from(self.half_life) * 60)
    }

    // Merit ceiling, so that a suppressed route is reused after at most
    // `max_suppress` minutes.
    pub fn max_merit(&self) -> u32 {
        let ratio = f64::from(self.max_suppress) / f64::from(self.half_life);
        (f64::from(self.reuse) * ratio.exp2()) as u32
    }
}

impl Default for DampingCfg {
    fn default() -> DampingCfg {
        DampingCfg {
            enabled: false,
            half_life: 15,
            max_suppress: 60,
            reuse: 750,
            cutoff: 3000,
            penalty: 1000,
        }
    }
}
