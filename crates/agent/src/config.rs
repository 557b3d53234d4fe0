// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TOML configuration: top-level defaults, per-stream log sections, and the
//! upstream/monitor endpoints.

use std::path::{Path, PathBuf};

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Deserializer};

pub const DEFAULT_NETWORK: &str = "tcp";
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:24224";
pub const DEFAULT_FIELD_NAME: &str = "message";
pub const DEFAULT_PATH_FIELD_NAME: &str = "path";
pub const DEFAULT_HOST_FIELD_NAME: &str = "host";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_MONITOR_HOST: &str = "localhost";
pub const DEFAULT_MONITOR_PORT: u16 = 24223;

/// Agent configuration, loaded from a TOML file.
///
/// Empty or zero values are filled with defaults by [`Config::normalize`];
/// per-log overrides inherit the top-level values the same way.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    /// Prefix joined with `.` onto every log's tag when non-empty.
    #[serde(default)]
    pub tag_prefix: String,

    /// Wire key for the message body.
    #[serde(default)]
    pub field_name: String,

    /// Wire key for the source file path.
    #[serde(default)]
    pub path_field_name: String,

    /// Wire key for the host name.
    #[serde(default)]
    pub host_field_name: String,

    /// Host name attached to every record. Defaults to the OS hostname.
    #[serde(default)]
    pub host: String,

    /// Tail read buffer size in bytes.
    #[serde(default)]
    pub read_buffer_size: usize,

    /// Emit timestamps with sub-second precision.
    #[serde(default)]
    pub sub_second_time: bool,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logs: Vec<LogConfig>,

    /// Statistics HTTP server. Omitting the section disables HTTP but not
    /// stats aggregation.
    #[serde(default)]
    pub monitor: Option<MonitorConfig>,

    #[serde(default)]
    pub log_level: String,
}

/// Upstream Forward-protocol endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerConfig {
    /// `tcp` or `unix`.
    #[serde(default)]
    pub network: String,

    /// Host:port for `tcp`, socket path for `unix`.
    #[serde(default)]
    pub address: String,
}

/// One logical log stream: a base directory plus the pattern identifying
/// its rotated files.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogConfig {
    pub tag: String,

    pub basedir: PathBuf,

    #[serde(default)]
    pub recursive: bool,

    /// Full-path regex with exactly one capture group yielding the
    /// embedded-date substring.
    #[serde(deserialize_with = "regex_from_str")]
    pub target_file_regexp: Regex,

    /// chrono strftime format matching the captured date substring.
    pub file_time_format: String,

    #[serde(default)]
    pub field_name: String,

    #[serde(default)]
    pub path_field_name: String,

    #[serde(default)]
    pub host_field_name: String,

    #[serde(default)]
    pub host: String,
}

/// Statistics HTTP endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MonitorConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: u16,
}

impl Config {
    /// Read, parse, and validate a configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents).context("parse config file")?;
        config.normalize()?;
        config.validate()?;
        Ok(config)
    }

    /// Fill defaults, resolve per-log inheritance, apply the tag prefix,
    /// and absolutize base directories.
    pub fn normalize(&mut self) -> anyhow::Result<()> {
        if self.field_name.is_empty() {
            self.field_name = DEFAULT_FIELD_NAME.to_owned();
        }
        if self.path_field_name.is_empty() {
            self.path_field_name = DEFAULT_PATH_FIELD_NAME.to_owned();
        }
        if self.host_field_name.is_empty() {
            self.host_field_name = DEFAULT_HOST_FIELD_NAME.to_owned();
        }
        if self.host.is_empty() {
            self.host = hostname::get().context("resolve hostname")?.to_string_lossy().into_owned();
        }
        if self.read_buffer_size == 0 {
            self.read_buffer_size = DEFAULT_READ_BUFFER_SIZE;
        }
        if self.log_level.is_empty() {
            self.log_level = DEFAULT_LOG_LEVEL.to_owned();
        }
        if self.server.network.is_empty() {
            self.server.network = DEFAULT_NETWORK.to_owned();
        }
        if self.server.address.is_empty() {
            self.server.address = DEFAULT_ADDRESS.to_owned();
        }
        if let Some(monitor) = self.monitor.as_mut() {
            if monitor.host.is_empty() {
                monitor.host = DEFAULT_MONITOR_HOST.to_owned();
            }
            if monitor.port == 0 {
                monitor.port = DEFAULT_MONITOR_PORT;
            }
        }

        let cwd = std::env::current_dir().context("resolve working directory")?;
        for log in &mut self.logs {
            if log.field_name.is_empty() {
                log.field_name = self.field_name.clone();
            }
            if log.path_field_name.is_empty() {
                log.path_field_name = self.path_field_name.clone();
            }
            if log.host_field_name.is_empty() {
                log.host_field_name = self.host_field_name.clone();
            }
            if log.host.is_empty() {
                log.host = self.host.clone();
            }
            if !self.tag_prefix.is_empty() {
                log.tag = format!("{}.{}", self.tag_prefix, log.tag);
            }
            if log.basedir.is_relative() {
                log.basedir = cwd.join(&log.basedir);
            }
        }
        Ok(())
    }

    /// Validate the configuration after normalization.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.server.network.as_str() {
            "tcp" | "unix" => {}
            other => anyhow::bail!("invalid server network: {other}"),
        }
        for log in &self.logs {
            if log.tag.is_empty() {
                anyhow::bail!("log entry for {} is missing a Tag", log.basedir.display());
            }
            // captures_len counts the implicit whole-match group.
            if log.target_file_regexp.captures_len() != 2 {
                anyhow::bail!(
                    "TargetFileRegexp for tag {} must have exactly one capture group",
                    log.tag
                );
            }
        }
        Ok(())
    }
}

fn regex_from_str<'de, D>(deserializer: D) -> Result<Regex, D::Error>
where
    D: Deserializer<'de>,
{
    let pattern = String::deserialize(deserializer)?;
    Regex::new(&pattern).map_err(serde::de::Error::custom)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
