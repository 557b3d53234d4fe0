// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime statistics: event types, the aggregator task, and the HTTP
//! monitor routes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Upstream liveness as reported by the forwarder's health task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStat {
    pub alive: bool,
    pub error: String,
}

/// Cumulative delivery count for one tag.
#[derive(Debug, Clone, Serialize)]
pub struct SentStat {
    #[serde(skip)]
    pub tag: String,
    pub sents: i64,
}

/// Latest known state of one tailed file. `position` is `-1` while the
/// file cannot be opened; `close` deletes the entry instead of updating it.
#[derive(Debug, Clone, Serialize)]
pub struct FileStat {
    pub tag: String,
    #[serde(skip)]
    pub file: String,
    pub position: i64,
    pub error: String,
    #[serde(skip)]
    pub close: bool,
}

/// A statistics event drained from the monitor queue.
#[derive(Debug, Clone)]
pub enum Stat {
    File(FileStat),
    Sent(SentStat),
    Server(ServerStat),
}

#[derive(Debug, Default, Serialize)]
struct StatsInner {
    sent: HashMap<String, SentStat>,
    files: HashMap<String, FileStat>,
    server: ServerStat,
}

/// Aggregated runtime statistics. Mutated only by the aggregator task; the
/// mutex exists because HTTP handlers read concurrently.
#[derive(Debug, Default)]
pub struct Stats {
    inner: Mutex<StatsInner>,
}

impl Stats {
    /// Apply one event to the aggregate state.
    pub fn apply(&self, stat: Stat) {
        let mut inner = self.inner.lock();
        match stat {
            Stat::File(stat) => {
                if stat.close {
                    inner.files.remove(&stat.file);
                } else {
                    inner.files.insert(stat.file.clone(), stat);
                }
            }
            Stat::Sent(stat) => {
                if let Some(existing) = inner.sent.get_mut(&stat.tag) {
                    existing.sents += stat.sents;
                } else {
                    inner.sent.insert(stat.tag.clone(), stat);
                }
            }
            Stat::Server(stat) => inner.server = stat,
        }
    }

    pub fn full(&self) -> serde_json::Value {
        serde_json::to_value(&*self.inner.lock()).unwrap_or_default()
    }

    pub fn sent(&self) -> serde_json::Value {
        serde_json::to_value(&self.inner.lock().sent).unwrap_or_default()
    }

    pub fn files(&self) -> serde_json::Value {
        serde_json::to_value(&self.inner.lock().files).unwrap_or_default()
    }

    pub fn server(&self) -> serde_json::Value {
        serde_json::to_value(&self.inner.lock().server).unwrap_or_default()
    }
}

/// Drain the monitor queue until it closes, applying each event.
pub async fn run_aggregator(stats: Arc<Stats>, mut monitor_rx: mpsc::Receiver<Stat>) {
    while let Some(stat) = monitor_rx.recv().await {
        stats.apply(stat);
    }
    debug!("monitor queue closed, stats aggregator exiting");
}

/// Build the monitor HTTP router.
pub fn build_router(stats: Arc<Stats>) -> Router {
    Router::new()
        .route("/", get(all_stats))
        .route("/sent", get(sent_stats))
        .route("/files", get(file_stats))
        .route("/server", get(server_stats))
        .route("/system", get(system_stats))
        .with_state(stats)
}

async fn all_stats(State(stats): State<Arc<Stats>>) -> Json<serde_json::Value> {
    Json(stats.full())
}

async fn sent_stats(State(stats): State<Arc<Stats>>) -> Json<serde_json::Value> {
    Json(stats.sent())
}

async fn file_stats(State(stats): State<Arc<Stats>>) -> Json<serde_json::Value> {
    Json(stats.files())
}

async fn server_stats(State(stats): State<Arc<Stats>>) -> Json<serde_json::Value> {
    Json(stats.server())
}

async fn system_stats() -> Json<serde_json::Value> {
    Json(collect_system_stats())
}

/// Process-level statistics for `/system`.
fn collect_system_stats() -> serde_json::Value {
    use sysinfo::{ProcessesToUpdate, System};

    let Ok(pid) = sysinfo::get_current_pid() else {
        return serde_json::json!({});
    };
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let load = System::load_average();

    let mut doc = serde_json::json!({
        "pid": pid.as_u32(),
        "load_average": { "one": load.one, "five": load.five, "fifteen": load.fifteen },
    });
    if let Some(process) = sys.process(pid) {
        doc["memory_bytes"] = process.memory().into();
        doc["virtual_memory_bytes"] = process.virtual_memory().into();
        doc["start_time_secs"] = process.start_time().into();
        doc["run_time_secs"] = process.run_time().into();
    }
    doc
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
