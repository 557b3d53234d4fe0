// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drives one [`TailFile`] on a timer, reacting to wake events pushed by
//! the watch controller.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LogConfig;
use crate::monitor::{FileStat, Stat};
use crate::reader::{SeekPos, TailFile};
use crate::record::Record;

pub const OPEN_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const ACTIVE_TAIL_INTERVAL: Duration = Duration::from_millis(200);
pub const INACTIVE_TAIL_INTERVAL: Duration = Duration::from_millis(1000);

/// Follows one log file, emitting a [`Record`] per complete line.
///
/// The wake inbox switches polling to the active interval right after a
/// filesystem write event; quiet periods fall back to the inactive one.
pub struct Tailer {
    path: PathBuf,
    config: Arc<LogConfig>,
    read_buffer_size: usize,
    message_tx: mpsc::Sender<Record>,
    monitor_tx: mpsc::Sender<Stat>,
    wake_rx: mpsc::Receiver<()>,
    wake_closed: bool,
    interval: Duration,
    last_read_at: Instant,
}

impl Tailer {
    pub fn new(
        path: PathBuf,
        config: Arc<LogConfig>,
        read_buffer_size: usize,
        message_tx: mpsc::Sender<Record>,
        monitor_tx: mpsc::Sender<Stat>,
        wake_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            path,
            config,
            read_buffer_size,
            message_tx,
            monitor_tx,
            wake_rx,
            wake_closed: false,
            interval: INACTIVE_TAIL_INTERVAL,
            last_read_at: Instant::now(),
        }
    }

    /// Tail the file until cancellation or a non-recoverable error.
    pub async fn run(mut self, start: SeekPos, shutdown: CancellationToken) {
        let Some(mut file) = self.open_with_retry(start, &shutdown).await else {
            return;
        };
        info!(path = %self.path.display(), tag = %self.config.tag, "tailing file");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    // Final drain so lines written before shutdown still ship.
                    let _ = self.read_to_eof(&mut file).await;
                    self.send_close_stat().await;
                    debug!(path = %self.path.display(), "tailer shut down");
                    return;
                }
                wake = self.wake_rx.recv(), if !self.wake_closed => {
                    match wake {
                        Some(()) => self.interval = ACTIVE_TAIL_INTERVAL,
                        None => self.wake_closed = true,
                    }
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            if let Err(e) = self.cycle(&mut file).await {
                warn!(path = %self.path.display(), err = %e, "tailer stopped");
                return;
            }
        }
    }

    /// Open the file, retrying every [`OPEN_RETRY_INTERVAL`] while it is
    /// missing. Retries always position at the head so a file created after
    /// a failed open is read from its beginning.
    async fn open_with_retry(
        &mut self,
        start: SeekPos,
        shutdown: &CancellationToken,
    ) -> Option<TailFile> {
        let mut seek = start;
        let mut first = true;
        loop {
            match TailFile::open(&self.path, seek, self.read_buffer_size) {
                Ok(file) => {
                    self.send_file_stat(file.position as i64, String::new()).await;
                    return Some(file);
                }
                Err(e) => {
                    self.send_file_stat(-1, format!("[{}] {e}", Utc::now())).await;
                    if first {
                        warn!(path = %self.path.display(), err = %e, "open failed, retrying");
                    }
                    first = false;
                }
            }
            seek = SeekPos::Head;
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.send_close_stat().await;
                    return None;
                }
                _ = tokio::time::sleep(OPEN_RETRY_INTERVAL) => {}
            }
        }
    }

    async fn cycle(&mut self, file: &mut TailFile) -> anyhow::Result<()> {
        file.check_truncated()?;
        if self.last_read_at.elapsed() < self.interval {
            return Ok(());
        }
        self.read_to_eof(file).await?;
        self.last_read_at = Instant::now();
        self.interval = INACTIVE_TAIL_INTERVAL;
        Ok(())
    }

    /// Read and ship complete lines until end of file.
    async fn read_to_eof(&mut self, file: &mut TailFile) -> anyhow::Result<()> {
        while let Some(lines) = file.read_lines()? {
            let timestamp = Utc::now();
            for line in lines {
                let record = Record {
                    tag: self.config.tag.clone(),
                    timestamp,
                    message: line,
                    path: self.path.display().to_string(),
                    host: self.config.host.clone(),
                    field_name: self.config.field_name.clone(),
                    path_field_name: self.config.path_field_name.clone(),
                    host_field_name: self.config.host_field_name.clone(),
                };
                self.message_tx
                    .send(record)
                    .await
                    .map_err(|_| anyhow::anyhow!("message queue closed"))?;
                self.send_file_stat(file.position as i64, String::new()).await;
            }
        }
        Ok(())
    }

    async fn send_file_stat(&self, position: i64, error: String) {
        let stat = Stat::File(FileStat {
            tag: self.config.tag.clone(),
            file: self.path.display().to_string(),
            position,
            error,
            close: false,
        });
        let _ = self.monitor_tx.send(stat).await;
    }

    async fn send_close_stat(&self) {
        let stat = Stat::File(FileStat {
            tag: self.config.tag.clone(),
            file: self.path.display().to_string(),
            position: 0,
            error: String::new(),
            close: true,
        });
        let _ = self.monitor_tx.send(stat).await;
    }
}

#[cfg(test)]
#[path = "tail_tests.rs"]
mod tests;
