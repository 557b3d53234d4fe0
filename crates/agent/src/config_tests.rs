// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const SAMPLE: &str = r#"
TagPrefix = "nginx"
FieldName = "msg"
ReadBufferSize = 1024
SubSecondTime = true
LogLevel = "debug"

[Server]
Address = "10.0.0.1:24224"

[[Logs]]
Tag = "access"
Basedir = "/var/log/nginx"
TargetFileRegexp = '^.+/access(\d{8})\.log$'
FileTimeFormat = "%Y%m%d"

[[Logs]]
Tag = "error"
Basedir = "/var/log/nginx"
Recursive = true
TargetFileRegexp = '^.+/error(\d{8})\.log$'
FileTimeFormat = "%Y%m%d"
FieldName = "errmsg"
Host = "web01"

[Monitor]
Port = 9999
"#;

fn parse(text: &str) -> anyhow::Result<Config> {
    let mut config: Config = toml::from_str(text)?;
    config.normalize()?;
    config.validate()?;
    Ok(config)
}

#[test]
fn parses_full_config() -> anyhow::Result<()> {
    let config = parse(SAMPLE)?;

    assert_eq!(config.field_name, "msg");
    assert_eq!(config.path_field_name, "path");
    assert_eq!(config.host_field_name, "host");
    assert_eq!(config.read_buffer_size, 1024);
    assert!(config.sub_second_time);
    assert_eq!(config.log_level, "debug");

    assert_eq!(config.server.network, "tcp");
    assert_eq!(config.server.address, "10.0.0.1:24224");

    assert_eq!(config.logs.len(), 2);
    assert_eq!(config.logs[0].tag, "nginx.access");
    assert_eq!(config.logs[0].field_name, "msg");
    assert!(!config.logs[0].recursive);
    assert_eq!(config.logs[1].tag, "nginx.error");
    assert_eq!(config.logs[1].field_name, "errmsg");
    assert_eq!(config.logs[1].host, "web01");
    assert!(config.logs[1].recursive);
    Ok(())
}

#[test]
fn applies_defaults_for_empty_config() -> anyhow::Result<()> {
    let config = parse("")?;

    assert_eq!(config.field_name, DEFAULT_FIELD_NAME);
    assert_eq!(config.path_field_name, DEFAULT_PATH_FIELD_NAME);
    assert_eq!(config.host_field_name, DEFAULT_HOST_FIELD_NAME);
    assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
    assert!(!config.sub_second_time);
    assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
    assert_eq!(config.server.network, DEFAULT_NETWORK);
    assert_eq!(config.server.address, DEFAULT_ADDRESS);
    // Host falls back to the OS hostname.
    assert!(!config.host.is_empty());
    assert!(config.monitor.is_none());
    Ok(())
}

#[test]
fn monitor_section_gets_defaults() -> anyhow::Result<()> {
    let config = parse("[Monitor]\n")?;
    let monitor = config.monitor.as_ref().map(|m| (m.host.clone(), m.port));
    assert_eq!(monitor, Some((DEFAULT_MONITOR_HOST.to_owned(), DEFAULT_MONITOR_PORT)));
    Ok(())
}

#[test]
fn monitor_port_override_keeps_default_host() -> anyhow::Result<()> {
    let config = parse(SAMPLE)?;
    let monitor = config.monitor.as_ref().map(|m| (m.host.clone(), m.port));
    assert_eq!(monitor, Some((DEFAULT_MONITOR_HOST.to_owned(), 9999)));
    Ok(())
}

#[test]
fn relative_basedir_is_absolutized() -> anyhow::Result<()> {
    let config = parse(
        r#"
[[Logs]]
Tag = "app"
Basedir = "logs/app"
TargetFileRegexp = '^.+/app(\d{8})\.log$'
FileTimeFormat = "%Y%m%d"
"#,
    )?;
    assert!(config.logs[0].basedir.is_absolute());
    assert!(config.logs[0].basedir.ends_with("logs/app"));
    Ok(())
}

#[test]
fn rejects_regex_without_capture_group() {
    let result = parse(
        r#"
[[Logs]]
Tag = "app"
Basedir = "/var/log/app"
TargetFileRegexp = '^.+/app\d{8}\.log$'
FileTimeFormat = "%Y%m%d"
"#,
    );
    assert!(result.is_err());
}

#[test]
fn rejects_regex_with_two_capture_groups() {
    let result = parse(
        r#"
[[Logs]]
Tag = "app"
Basedir = "/var/log/app"
TargetFileRegexp = '^.+/(app)(\d{8})\.log$'
FileTimeFormat = "%Y%m%d"
"#,
    );
    assert!(result.is_err());
}

#[test]
fn rejects_invalid_regex() {
    let result: Result<Config, _> = toml::from_str(
        r#"
[[Logs]]
Tag = "app"
Basedir = "/var/log/app"
TargetFileRegexp = '^.+/app([\d{8}\.log$'
FileTimeFormat = "%Y%m%d"
"#,
    );
    assert!(result.is_err());
}

#[test]
fn rejects_unknown_network() {
    let result = parse("[Server]\nNetwork = \"udp\"\n");
    assert!(result.is_err());
}

#[test]
fn load_reads_file_from_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("agent.toml");
    std::fs::write(&path, SAMPLE)?;

    let config = Config::load(&path)?;
    assert_eq!(config.logs.len(), 2);
    Ok(())
}

#[test]
fn load_missing_file_errors() {
    let result = Config::load(std::path::Path::new("/nonexistent/agent.toml"));
    assert!(result.is_err());
}
