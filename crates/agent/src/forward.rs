// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drains the message queue and posts each record upstream, retrying
//! indefinitely on failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rmpv::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::ForwardClient;
use crate::monitor::{SentStat, ServerStat, Stat};
use crate::record::Record;

pub const SERVER_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(3);
const POST_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const UPSTREAM_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(1);

/// Last-post status shared between the forwarder and its health reporter.
#[derive(Debug, Default)]
struct PostStatus {
    alive: AtomicBool,
    last_error: Mutex<Option<(DateTime<Utc>, String)>>,
}

impl PostStatus {
    fn record_success(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    fn record_failure(&self, err: &anyhow::Error) {
        self.alive.store(false, Ordering::Relaxed);
        *self.last_error.lock() = Some((Utc::now(), format!("{err:#}")));
    }

    fn server_stat(&self) -> ServerStat {
        let error = match self.last_error.lock().as_ref() {
            Some((at, message)) => format!("[{at}] {message}"),
            None => String::new(),
        };
        ServerStat { alive: self.alive.load(Ordering::Relaxed), error }
    }
}

/// Single consumer of the message queue.
pub struct Forwarder {
    client: ForwardClient,
    monitor_tx: mpsc::Sender<Stat>,
    status: Arc<PostStatus>,
}

impl Forwarder {
    pub fn new(client: ForwardClient, monitor_tx: mpsc::Sender<Stat>) -> Self {
        Self { client, monitor_tx, status: Arc::new(PostStatus::default()) }
    }

    /// Consume the message queue until it closes, then shut the upstream
    /// connection down within a bounded deadline.
    pub async fn run(mut self, mut message_rx: mpsc::Receiver<Record>, shutdown: CancellationToken) {
        info!("forwarder starting");
        spawn_health_reporter(Arc::clone(&self.status), self.monitor_tx.clone(), shutdown);

        while let Some(record) = message_rx.recv().await {
            self.deliver(record).await;
        }

        info!("message queue closed, shutting down forwarder");
        if let Err(e) = self.client.shutdown(UPSTREAM_SHUTDOWN_DEADLINE).await {
            warn!(err = format!("{e:#}"), "graceful upstream shutdown failed, force-closing");
            self.client.close();
        }
        info!("forwarder exiting");
    }

    /// Post one record, retrying the same record until the upstream
    /// accepts it.
    async fn deliver(&mut self, record: Record) {
        let wire = Value::Map(vec![
            (
                Value::from(record.field_name.as_str()),
                Value::Binary(record.message.clone()),
            ),
            (
                Value::from(record.path_field_name.as_str()),
                Value::from(record.path.as_str()),
            ),
            (
                Value::from(record.host_field_name.as_str()),
                Value::from(record.host.as_str()),
            ),
        ]);
        loop {
            match self.client.post(&record.tag, wire.clone(), record.timestamp).await {
                Ok(()) => {
                    self.status.record_success();
                    let stat = Stat::Sent(SentStat { tag: record.tag.clone(), sents: 1 });
                    let _ = self.monitor_tx.send(stat).await;
                    return;
                }
                Err(e) => {
                    warn!(tag = %record.tag, err = format!("{e:#}"), "post failed, retrying");
                    self.status.record_failure(&e);
                    self.client.close();
                    tokio::time::sleep(POST_RETRY_INTERVAL).await;
                }
            }
        }
    }
}

/// Report upstream liveness to the monitor queue on a fixed cadence until
/// cancellation.
fn spawn_health_reporter(
    status: Arc<PostStatus>,
    monitor_tx: mpsc::Sender<Stat>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(SERVER_HEALTH_CHECK_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            if monitor_tx.send(Stat::Server(status.server_stat())).await.is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
#[path = "forward_tests.rs"]
mod tests;
