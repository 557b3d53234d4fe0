// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers: a mock Forward-protocol server that records every
//! event posted to it.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rmpv::Value;

/// One decoded `[tag, time, record]` event.
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    pub tag: String,
    pub time: f64,
    pub record: Vec<(Value, Value)>,
}

impl ReceivedEvent {
    /// Look up a record field by string key.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.record.iter().find(|(key, _)| key.as_str() == Some(name)).map(|(_, value)| value)
    }
}

/// In-process Forward-protocol server. Accepts any number of connections
/// and decodes every posted event.
pub struct MockForwardServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<ReceivedEvent>>>,
}

impl MockForwardServer {
    /// Bind on an ephemeral local port and start accepting.
    pub fn start() -> std::io::Result<Self> {
        Self::bind("127.0.0.1:0")
    }

    /// Bind on a specific address and start accepting.
    pub fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let sink = Arc::clone(&sink);
                thread::spawn(move || read_events(stream, &sink));
            }
        });
        Ok(Self { addr, received })
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Snapshot of everything received so far.
    pub fn received(&self) -> Vec<ReceivedEvent> {
        self.received.lock().clone()
    }

    /// Wait until at least `count` events have arrived or `timeout`
    /// elapses, returning whatever was received.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<ReceivedEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let events = self.received();
            if events.len() >= count || tokio::time::Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn read_events(mut stream: TcpStream, sink: &Mutex<Vec<ReceivedEvent>>) {
    loop {
        let value = match rmpv::decode::read_value(&mut stream) {
            Ok(value) => value,
            Err(_) => return,
        };
        if let Some(event) = decode_event(&value) {
            sink.lock().push(event);
        }
    }
}

fn decode_event(value: &Value) -> Option<ReceivedEvent> {
    let entry = value.as_array()?;
    let tag = entry.first()?.as_str()?.to_owned();
    let time = entry.get(1)?.as_f64().or_else(|| entry.get(1)?.as_i64().map(|v| v as f64))?;
    let record = entry.get(2)?.as_map()?.clone();
    Some(ReceivedEvent { tag, time, record })
}
