//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use holo_utils::bgp::AfiSafi;
use holo_utils::task::TimeoutTask;
use holo_utils::UnboundedSender;
use ipnetwork::IpNetwork;

use crate::table::TableId;

//
// Route pipeline tasks diagram:
//                                    +--------------+
//                                    |   sessions   |
//                                    +--------------+
//                                          | ^
//                                          | |
//                   session events (Nx)    V | (Nx) session_tx
//                                    +--------------+
//                                    |              |
//           deletion_slice (0/Nx) -> |              |
//               dump_slice (0/Nx) -> |              |
//             nexthop_push (0/Nx) -> |   pipeline   |
//               route_push (0/Nx) -> |              |
//            damping_reuse (0/Nx) -> |              |
//                                    |              |
//                                    +--------------+
//                            egress_tx (1x) | ^ (1x) rib_reply
//                                           | |
//                                           V |
//                                    +--------------+
//                                    |  fib client  |
//                                    +--------------+
//

// Route pipeline inter-task message types.
pub mod messages {
    use std::net::IpAddr;

    use holo_utils::bgp::AfiSafi;
    use ipnetwork::IpNetwork;
    use serde::{Deserialize, Serialize};

    use crate::error::RibCommandError;
    use crate::peer::PeerId;
    use crate::table::TableId;

    // Input messages (child task -> main task).
    pub mod input {
        use super::*;

        // Follow-up work scheduled by the pipeline for itself.
        #[derive(Debug)]
        pub enum PipelineMsg {
            DeletionSlice(TableSliceMsg),
            DumpSlice(TableSliceMsg),
            NexthopPush(TableSliceMsg),
            RoutePush(TableSliceMsg),
            DampingReuse(DampingReuseMsg),
        }

        #[derive(Debug)]
        pub struct TableSliceMsg {
            pub afi_safi: AfiSafi,
            pub table: TableId,
        }

        #[derive(Debug)]
        pub struct DampingReuseMsg {
            pub afi_safi: AfiSafi,
            pub table: TableId,
            pub prefix: IpNetwork,
        }

        // Completion of a forwarding-table command.
        #[derive(Debug, Deserialize, Serialize)]
        pub struct RibReplyMsg {
            pub afi_safi: AfiSafi,
            pub seq: u64,
            pub result: Result<(), RibCommandError>,
        }
    }

    // Output messages (main task -> child task).
    pub mod output {
        use super::*;

        // Signal sent to a session when its output queue has data.
        #[derive(Debug, Deserialize, Serialize)]
        pub enum SessionMsg {
            Wakeup { afi_safi: AfiSafi, peer_id: PeerId },
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct RibRequestMsg {
            pub afi_safi: AfiSafi,
            pub seq: u64,
            pub request: RibRequest,
        }

        #[derive(Clone, Debug, Eq, PartialEq)]
        #[derive(Deserialize, Serialize)]
        #[serde(rename_all = "kebab-case")]
        pub enum RibRequest {
            StartTransaction { tid: u32 },
            AddRoute { tid: u32, route: RibRoute },
            DeleteRoute { tid: u32, route: RibRoute },
            CommitTransaction { tid: u32 },
        }

        #[derive(Clone, Debug, Eq, PartialEq)]
        #[derive(Deserialize, Serialize)]
        pub struct RibRoute {
            pub ribname: String,
            pub prefix: IpNetwork,
            pub nexthop: Option<IpAddr>,
            pub ifname: Option<String>,
            pub metric: u32,
            pub distance: u8,
            pub cookie: String,
            pub protocol_origin: String,
        }
    }
}

// ===== impl PipelineMsg =====

impl messages::input::PipelineMsg {
    // Address family of the pipeline the message is for.
    pub fn afi_safi(&self) -> AfiSafi {
        use messages::input::PipelineMsg;

        match self {
            PipelineMsg::DeletionSlice(msg)
            | PipelineMsg::DumpSlice(msg)
            | PipelineMsg::NexthopPush(msg)
            | PipelineMsg::RoutePush(msg) => msg.afi_safi,
            PipelineMsg::DampingReuse(msg) => msg.afi_safi,
        }
    }
}

// ===== pipeline tasks =====

// Damping reuse timer.
pub(crate) fn damping_reuse_timer(
    afi_safi: AfiSafi,
    table: TableId,
    prefix: IpNetwork,
    timeout: Duration,
    pipelinep: &UnboundedSender<messages::input::PipelineMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let pipelinep = pipelinep.clone();

        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::DampingReuseMsg {
                afi_safi,
                table,
                prefix,
            };
            let _ = pipelinep
                .send(messages::input::PipelineMsg::DampingReuse(msg));
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}
