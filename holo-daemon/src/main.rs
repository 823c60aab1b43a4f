//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod config;
mod fib;
mod script;

use clap::{App, Arg};
use config::{Config, LoggingFileRotation, LoggingFmtStyle};
use holo_bgp_rib::instance::BgpRib;
use holo_bgp_rib::peer::PeerId;
use holo_bgp_rib::table::PipelineChannelsTx;
use holo_bgp_rib::tasks::messages::output::SessionMsg;
use holo_utils::bgp::AfiSafi;
use holo_utils::task::Task;
use script::Event;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{Instrument, debug_span, error, info, info_span};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging) {
    // Enable logging to journald.
    let journald = config.journald.enabled.then(|| {
        tracing_journald::layer().expect("couldn't connect to journald")
    });

    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = match config.file.rotation {
            LoggingFileRotation::Never => {
                rolling::never(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Hourly => {
                rolling::hourly(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Daily => {
                rolling::daily(&config.file.dir, &config.file.name)
            }
        };

        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_thread_ids(config.file.fmt.show_thread_id)
            .with_file(config.file.fmt.show_source)
            .with_line_number(config.file.fmt.show_source)
            .with_ansi(config.file.fmt.colors);
        let layer = match config.file.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.stdout.fmt.show_thread_id)
            .with_file(config.stdout.fmt.show_source)
            .with_line_number(config.stdout.fmt.show_source)
            .with_ansi(config.stdout.fmt.colors);
        let layer = match config.stdout.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("holo=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(journald)
        .with(file)
        .with(stdout)
        .init();
}

fn signal_listener() -> mpsc::Receiver<()> {
    let (signal_tx, signal_rx) = mpsc::channel(1);

    tokio::task::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).unwrap();
        let mut sigterm = signal(SignalKind::terminate()).unwrap();

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT");
                let _ = signal_tx.send(()).await;
            },
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                let _ = signal_tx.send(()).await;
            }
        }
    });

    signal_rx
}

// Feeds the script events to the main loop one at a time.
fn script_feeder(events: Vec<Event>) -> (Task<()>, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(1);

    let task = Task::spawn(
        async move {
            for event in events {
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
            info!("script finished");
        }
        .instrument(debug_span!("script")),
    );

    (task, event_rx)
}

fn build_version() -> String {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    match rustc_tools_util::get_version_info!().commit_hash {
        Some(hash) => format!("{VERSION} ({hash})"),
        None => VERSION.to_owned(),
    }
}

// Drains the updates queued towards a peer, standing in for the session
// that would send them.
fn pull_updates(
    rib: &mut BgpRib,
    afi_safi: AfiSafi,
    peer_id: PeerId,
    batch: usize,
) {
    let batch = batch.max(1);
    loop {
        let updates = match rib.pull_updates(afi_safi, peer_id, batch) {
            Ok(updates) => updates,
            Err(error) => {
                error.log();
                return;
            }
        };
        let count = updates.len();
        for update in updates {
            let data = serde_json::to_string(&update).unwrap_or_default();
            info!(%afi_safi, %peer_id, %data, "update");
        }
        if count < batch {
            return;
        }
    }
}

async fn run(config: Config, events: Vec<Event>) {
    let mut signal_rx = signal_listener();

    // Create pipeline channels.
    let (sched_tx, mut sched_rx) = mpsc::unbounded_channel();
    let (session_tx, mut session_rx) = mpsc::unbounded_channel();
    let (egress_tx, egress_rx) = mpsc::channel(config.rib.egress_window.max(1));
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let tx = PipelineChannelsTx {
        sched: sched_tx,
        session: session_tx,
        egress: egress_tx,
    };

    // Start the forwarding-table client.
    let _fib_task = fib::start(egress_rx, reply_tx);

    // Build the route pipelines.
    let mut rib = BgpRib::new(config.rib, config.policies, tx);
    for peer in config.peers {
        let name = peer.name.clone();
        if let Err(error) = rib.add_peering(peer) {
            error!(%name, %error, "failed to add peering");
        }
    }

    let (_script_task, mut event_rx) = script_feeder(events);

    loop {
        tokio::select! {
            biased;
            _ = signal_rx.recv() => break,
            Some(msg) = reply_rx.recv() => {
                if let Err(error) = rib.rib_command_done(msg) {
                    error.log();
                }
            }
            Some(msg) = sched_rx.recv() => {
                rib.process_msg(msg);
            }
            Some(msg) = session_rx.recv() => {
                let SessionMsg::Wakeup { afi_safi, peer_id } = msg;
                pull_updates(&mut rib, afi_safi, peer_id, config.pull_batch);
            }
            Some(event) = event_rx.recv() => {
                if let Err(error) = event.process(&mut rib) {
                    error.log();
                }
            }
        }

        if let Err(error) = rib.status() {
            error!(%error, "route pipeline failed");
            break;
        }
    }
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("Holo BGP route pipeline")
        .version(build_version().as_str())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let config = Config::load(config_file);

    // Initialize tracing.
    init_tracing(&config.logging);

    // Load the session events to replay.
    let events = match &config.script {
        Some(path) => match script::load(path) {
            Ok(events) => events,
            Err(error) => {
                error!(%path, %error, "failed to load script");
                std::process::exit(1);
            }
        },
        None => Vec::new(),
    };

    // We're ready to go!
    info!("starting up");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(run(config, events).instrument(info_span!("bgp-rib")));

    info!("exiting");
}
