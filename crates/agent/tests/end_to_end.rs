// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end pipeline tests: a real agent tailing a temp directory and
//! posting to a mock Forward server.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use regex::Regex;

use logship::config::{Config, LogConfig, MonitorConfig, ServerConfig};
use logship::test_support::{MockForwardServer, ReceivedEvent};

fn agent_config(basedir: &Path, address: String) -> anyhow::Result<Config> {
    Ok(Config {
        tag_prefix: String::new(),
        field_name: "message".to_owned(),
        path_field_name: "path".to_owned(),
        host_field_name: "host".to_owned(),
        host: "e2ehost".to_owned(),
        read_buffer_size: 80,
        sub_second_time: false,
        server: ServerConfig { network: "tcp".to_owned(), address },
        logs: vec![LogConfig {
            tag: "app.e2e".to_owned(),
            basedir: basedir.to_path_buf(),
            recursive: false,
            target_file_regexp: Regex::new(r"^.+/logfile(\d{8})\..*$")?,
            file_time_format: "%Y%m%d".to_owned(),
            field_name: "message".to_owned(),
            path_field_name: "path".to_owned(),
            host_field_name: "host".to_owned(),
            host: "e2ehost".to_owned(),
        }],
        monitor: Some(MonitorConfig { host: "127.0.0.1".to_owned(), port: 0 }),
        log_level: "info".to_owned(),
    })
}

fn append(path: &Path, data: &str) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(data.as_bytes())?;
    Ok(())
}

fn body(event: &ReceivedEvent) -> anyhow::Result<&[u8]> {
    event.field("message").and_then(|v| v.as_slice()).context("message field missing")
}

#[tokio::test(flavor = "multi_thread")]
async fn ships_appends_rotation_and_truncation() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let server = MockForwardServer::start()?;
    let hub = logship::run(agent_config(dir.path(), server.address())?).await?;

    // Created after startup, so the file is read from the beginning.
    let first = dir.path().join("logfile20180101.log");
    append(&first, "single line\n")?;
    let events = server.wait_for(1, Duration::from_secs(10)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tag, "app.e2e");
    assert_eq!(body(&events[0])?, b"single line");
    assert_eq!(events[0].field("path").and_then(|v| v.as_str()), first.to_str());
    assert_eq!(events[0].field("host").and_then(|v| v.as_str()), Some("e2ehost"));

    // Several lines in one write arrive as ordered records.
    append(&first, "multi line 1\nmulti line 2\nmultiline 3\n")?;
    let events = server.wait_for(4, Duration::from_secs(10)).await;
    assert_eq!(events.len(), 4);
    assert_eq!(body(&events[1])?, b"multi line 1");
    assert_eq!(body(&events[2])?, b"multi line 2");
    assert_eq!(body(&events[3])?, b"multiline 3");

    // A fragment without a newline is held until its terminator arrives.
    append(&first, "continuous line 1")?;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    append(&first, "continuous line 2\n")?;
    let events = server.wait_for(5, Duration::from_secs(10)).await;
    assert_eq!(events.len(), 5);
    assert_eq!(body(&events[4])?, b"continuous line 1continuous line 2");

    // An 81-byte line against the 80-byte read buffer still ships whole.
    let long = "y".repeat(81);
    append(&first, &format!("{long}\n"))?;
    let events = server.wait_for(6, Duration::from_secs(10)).await;
    assert_eq!(events.len(), 6);
    assert_eq!(body(&events[5])?, long.as_bytes());

    // Rotation: a later-dated file takes over the stream.
    let second = dir.path().join("logfile20180102.log");
    append(&second, "")?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    append(&second, "foo\nbar\nbaz\n")?;
    let events = server.wait_for(9, Duration::from_secs(10)).await;
    assert_eq!(events.len(), 9);
    for (offset, want) in [&b"foo"[..], b"bar", b"baz"].iter().enumerate() {
        assert_eq!(body(&events[6 + offset])?, *want);
        assert_eq!(events[6 + offset].field("path").and_then(|v| v.as_str()), second.to_str());
    }

    // Truncation: reads continue from offset zero.
    std::fs::OpenOptions::new().write(true).truncate(true).open(&second)?;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    append(&second, "FOOOO\nBAAAR\nBAZZZZZZZ\n")?;
    let events = server.wait_for(12, Duration::from_secs(10)).await;
    assert_eq!(events.len(), 12);
    assert_eq!(body(&events[9])?, b"FOOOO");
    assert_eq!(body(&events[10])?, b"BAAAR");
    assert_eq!(body(&events[11])?, b"BAZZZZZZZ");

    tokio::time::timeout(Duration::from_secs(10), hub.shutdown()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn older_dated_file_does_not_take_over_stream() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let server = MockForwardServer::start()?;
    let hub = logship::run(agent_config(dir.path(), server.address())?).await?;

    let newer = dir.path().join("logfile20180103.log");
    append(&newer, "current\n")?;
    let events = server.wait_for(1, Duration::from_secs(10)).await;
    assert_eq!(events.len(), 1);

    // A stale rotation candidate is ignored; its writes never ship.
    let older = dir.path().join("logfile20180101.log");
    append(&older, "stale\n")?;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(server.received().len(), 1);

    append(&newer, "still current\n")?;
    let events = server.wait_for(2, Duration::from_secs(10)).await;
    assert_eq!(events.len(), 2);
    assert_eq!(body(&events[1])?, b"still current");

    tokio::time::timeout(Duration::from_secs(10), hub.shutdown()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn monitor_reports_sent_files_and_server() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let server = MockForwardServer::start()?;
    let hub = logship::run(agent_config(dir.path(), server.address())?).await?;
    let addr = hub.monitor_addr().context("monitor server not bound")?;
    let base = format!("http://{addr}");

    let path = dir.path().join("logfile20180101.log");
    append(&path, "one\ntwo\nthree\n")?;
    let events = server.wait_for(3, Duration::from_secs(10)).await;
    assert_eq!(events.len(), 3);

    // Sent counts land in the aggregator shortly after the posts.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut sent = serde_json::Value::Null;
    while tokio::time::Instant::now() < deadline {
        sent = reqwest::get(format!("{base}/sent")).await?.json().await?;
        if sent["app.e2e"]["sents"] == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(sent["app.e2e"]["sents"], 3);

    let full: serde_json::Value = reqwest::get(base.clone()).await?.json().await?;
    assert_eq!(full["sent"]["app.e2e"]["sents"], 3);

    let path_key = path.to_str().context("utf8 path")?;
    let mut files = serde_json::Value::Null;
    while tokio::time::Instant::now() < deadline {
        files = reqwest::get(format!("{base}/files")).await?.json().await?;
        if files[path_key]["position"] == 14 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(files[path_key]["tag"], "app.e2e");
    assert_eq!(files[path_key]["position"], 14);

    // The health reporter flips the server record to alive after a post.
    let mut server_doc = serde_json::Value::Null;
    while tokio::time::Instant::now() < deadline {
        server_doc = reqwest::get(format!("{base}/server")).await?.json().await?;
        if server_doc["alive"] == true {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert_eq!(server_doc["alive"], true);

    let system: serde_json::Value = reqwest::get(format!("{base}/system")).await?.json().await?;
    assert_eq!(system["pid"], u64::from(std::process::id()));

    tokio::time::timeout(Duration::from_secs(10), hub.shutdown()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_shutdown_joins_all_tasks() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let server = MockForwardServer::start()?;
    let hub = logship::run(agent_config(dir.path(), server.address())?).await?;

    let path = dir.path().join("logfile20180101.log");
    append(&path, "before shutdown\n")?;
    let events = server.wait_for(1, Duration::from_secs(10)).await;
    assert_eq!(events.len(), 1);

    tokio::time::timeout(Duration::from_secs(10), hub.shutdown()).await?;
    Ok(())
}
