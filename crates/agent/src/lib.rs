// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! logship: tails rotating log files and forwards each line as a
//! `(tag, timestamp, record)` tuple to a Forward-protocol endpoint,
//! publishing runtime statistics over HTTP.

pub mod client;
pub mod config;
pub mod forward;
pub mod monitor;
pub mod reader;
pub mod record;
pub mod tail;
pub mod test_support;
pub mod watch;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::ForwardClient;
use crate::config::Config;
use crate::forward::Forwarder;
use crate::monitor::Stats;
use crate::watch::Watcher;

/// Message queue capacity. Deliberately 1: tailer progress is tightly
/// coupled to forwarder progress, so a slow upstream pauses filesystem
/// reads instead of buffering unbounded in memory.
pub const MESSAGE_CHANNEL_CAPACITY: usize = 1;

/// Monitor queue capacity.
pub const MONITOR_CHANNEL_CAPACITY: usize = 256;

/// Handles to a running agent.
///
/// Input tasks are the watch controller and, through it, every tailer;
/// output tasks are the forwarder, the stats aggregator, and the monitor
/// HTTP server. The message queue closes by itself once all input tasks
/// have dropped their senders.
pub struct Hub {
    shutdown: CancellationToken,
    stats: Arc<Stats>,
    monitor_addr: Option<SocketAddr>,
    input: Vec<JoinHandle<()>>,
    output: Vec<JoinHandle<()>>,
}

impl Hub {
    /// Shared statistics state.
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Bound address of the monitor HTTP server, when one is running.
    pub fn monitor_addr(&self) -> Option<SocketAddr> {
        self.monitor_addr
    }

    /// Complete when every input task has exited.
    pub async fn inputs_done(&mut self) {
        for handle in &mut self.input {
            let _ = handle.await;
        }
    }

    /// Graceful shutdown: cancel the root token, join the input tasks
    /// (closing the message queue as their senders drop), then join the
    /// output tasks.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        self.inputs_done().await;
        for handle in &mut self.output {
            let _ = handle.await;
        }
    }
}

/// Start all agent tasks and wait for the watch controller's initial walk.
pub async fn run(config: Config) -> anyhow::Result<Hub> {
    let shutdown = CancellationToken::new();
    let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
    let (monitor_tx, monitor_rx) = mpsc::channel(MONITOR_CHANNEL_CAPACITY);
    let stats = Arc::new(Stats::default());

    let mut input = Vec::new();
    let mut output = Vec::new();

    output.push(tokio::spawn(monitor::run_aggregator(Arc::clone(&stats), monitor_rx)));

    let mut monitor_addr = None;
    if let Some(mon) = &config.monitor {
        let addr = format!("{}:{}", mon.host, mon.port);
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                monitor_addr = listener.local_addr().ok();
                info!("monitor server listening on http://{addr}/");
                let router = monitor::build_router(Arc::clone(&stats));
                let sd = shutdown.clone();
                output.push(tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, router)
                        .with_graceful_shutdown(sd.cancelled_owned())
                        .await
                    {
                        error!("monitor server error: {e}");
                    }
                }));
            }
            // Stats keep aggregating; only HTTP is lost.
            Err(e) => error!("failed to bind monitor server on {addr}: {e}"),
        }
    }

    let client = ForwardClient::new(&config.server, config.sub_second_time);
    info!(
        network = %config.server.network,
        address = %config.server.address,
        "forwarding to upstream"
    );
    let forwarder = Forwarder::new(client, monitor_tx.clone());
    output.push(tokio::spawn(forwarder.run(message_rx, shutdown.clone())));

    if !config.logs.is_empty() {
        let watcher = Watcher::new(&config, message_tx.clone(), monitor_tx.clone())?;
        let (ready_tx, ready_rx) = oneshot::channel();
        input.push(tokio::spawn(watcher.run(ready_tx, shutdown.child_token())));
        let _ = ready_rx.await;
    }

    Ok(Hub { shutdown, stats, monitor_addr, input, output })
}
