//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use holo_bgp_rib::tasks::messages::input::RibReplyMsg;
use holo_bgp_rib::tasks::messages::output::RibRequestMsg;
use holo_utils::task::Task;
use holo_utils::{Receiver, UnboundedSender};
use tracing::{Instrument, debug, debug_span};

// Stub forwarding-table client.
//
// Every request is logged and acknowledged. The task exits when the
// pipeline goes away.
pub(crate) fn start(
    mut request_rx: Receiver<RibRequestMsg>,
    reply_tx: UnboundedSender<RibReplyMsg>,
) -> Task<()> {
    let span = debug_span!("fib");
    Task::spawn(
        async move {
            while let Some(msg) = request_rx.recv().await {
                let request =
                    serde_json::to_string(&msg.request).unwrap_or_default();
                debug!(
                    afi_safi = %msg.afi_safi,
                    seq = %msg.seq,
                    %request,
                    "request"
                );

                let reply = RibReplyMsg {
                    afi_safi: msg.afi_safi,
                    seq: msg.seq,
                    result: Ok(()),
                };
                if reply_tx.send(reply).is_err() {
                    break;
                }
            }
        }
        .instrument(span),
    )
}
