// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Forward-protocol client: MessagePack `[tag, time, record]` tuples over a
//! TCP or Unix stream.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rmpv::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UnixStream};
use tracing::debug;

use crate::config::ServerConfig;

enum Conn {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// Client for one upstream Forward-protocol endpoint.
///
/// Connects lazily; after [`close`](Self::close) the next post reconnects.
pub struct ForwardClient {
    network: String,
    address: String,
    subsecond: bool,
    conn: Option<Conn>,
}

impl ForwardClient {
    pub fn new(server: &ServerConfig, subsecond: bool) -> Self {
        Self {
            network: server.network.clone(),
            address: server.address.clone(),
            subsecond,
            conn: None,
        }
    }

    async fn connect(&mut self) -> anyhow::Result<&mut Conn> {
        if self.conn.is_none() {
            let conn = match self.network.as_str() {
                "unix" => Conn::Unix(UnixStream::connect(&self.address).await?),
                _ => Conn::Tcp(TcpStream::connect(&self.address).await?),
            };
            debug!(network = %self.network, address = %self.address, "connected to upstream");
            self.conn = Some(conn);
        }
        self.conn.as_mut().context("upstream connection missing")
    }

    /// Post one event. Any I/O failure drops the connection so the next
    /// post starts from a fresh one.
    pub async fn post(
        &mut self,
        tag: &str,
        record: Value,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let time = if self.subsecond {
            Value::F64(
                timestamp.timestamp() as f64
                    + f64::from(timestamp.timestamp_subsec_nanos()) / 1e9,
            )
        } else {
            Value::from(timestamp.timestamp())
        };
        let event = Value::Array(vec![Value::from(tag), time, record]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &event).context("encode forward event")?;

        let result: anyhow::Result<()> = async {
            match self.connect().await? {
                Conn::Tcp(stream) => {
                    stream.write_all(&buf).await?;
                    stream.flush().await?;
                }
                Conn::Unix(stream) => {
                    stream.write_all(&buf).await?;
                    stream.flush().await?;
                }
            }
            Ok(())
        }
        .await;
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Drop the connection; the next post reconnects.
    pub fn close(&mut self) {
        self.conn = None;
    }

    /// Flush and close gracefully, erroring when `deadline` elapses.
    pub async fn shutdown(&mut self, deadline: Duration) -> anyhow::Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        tokio::time::timeout(deadline, async move {
            match conn {
                Conn::Tcp(mut stream) => stream.shutdown().await,
                Conn::Unix(mut stream) => stream.shutdown().await,
            }
        })
        .await
        .context("upstream shutdown timed out")??;
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
