// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Server settings from command line flags, environment variables and an
//! optional config file. A flag wins over its environment variable, which
//! wins over the config file, which wins over the built-in default.

use clap::builder::BoolishValueParser;
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use syslog_notify::constants::{
    DEFAULT_BIND_ADDRESS, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_QUEUE_CAPACITY,
};
use syslog_notify::filter::{AllOf, SeverityFilter, TagFilter};
use syslog_notify::message::Severity;
use syslog_notify::sink::parse_webhook_url;

use crate::error::ConfigError;

pub const DEFAULT_LOG_LEVEL: &str = "info";

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "syslog-notify-server")]
#[command(about = "Forwards syslog messages to a chat incoming webhook")]
pub struct Args {
    #[arg(long, env = "CONFIG", help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "BIND", help = "Address to receive syslog on [default: 0.0.0.0:1514]")]
    pub bind: Option<String>,

    #[arg(long = "slack-url", env = "SLACK_URL", help = "Incoming webhook URL")]
    pub slack_url: Option<String>,

    #[arg(
        long,
        env = "TCP",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        help = "Also accept newline delimited syslog over TCP"
    )]
    pub tcp: Option<bool>,

    #[arg(long, env = "QUEUE_CAPACITY", help = "Buffered messages per dispatcher [default: 5]")]
    pub queue_capacity: Option<usize>,

    #[arg(long, env = "HTTP_TIMEOUT", help = "Webhook request timeout in seconds [default: 30]")]
    pub http_timeout: Option<u64>,

    #[arg(long, env = "DENY_TAGS", help = "Comma separated tags never forwarded")]
    pub deny_tags: Option<String>,

    #[arg(long, env = "MIN_SEVERITY", help = "Least severe level forwarded, e.g. warning")]
    pub min_severity: Option<String>,

    #[arg(long, env = "LOG_LEVEL", help = "Log level [default: info]")]
    pub log_level: Option<String>,
}

impl Args {
    pub fn from_cli() -> Self {
        <Self as Parser>::parse()
    }
}

/// Raw values found in a config file. Keys accept `_` or `-`.
#[derive(Debug, Default, PartialEq, Eq)]
struct FileValues {
    bind: Option<String>,
    slack_url: Option<String>,
    tcp: Option<String>,
    queue_capacity: Option<String>,
    http_timeout: Option<String>,
    deny_tags: Option<String>,
    min_severity: Option<String>,
    log_level: Option<String>,
}

/// Lines of `key value` or `key=value`. Blank lines and `#` comments are
/// skipped. A later line overrides an earlier one.
fn parse_config_file(contents: &str) -> Result<FileValues, ConfigError> {
    let mut values = FileValues::default();

    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once(|c: char| c == '=' || c.is_whitespace()) else {
            return Err(ConfigError::Syntax {
                line: index + 1,
                text: line.to_string(),
            });
        };
        let value = value.trim_start();
        let value = value.strip_prefix('=').unwrap_or(value).trim().to_string();

        let slot = match key.replace('-', "_").as_str() {
            "bind" => &mut values.bind,
            "slack_url" => &mut values.slack_url,
            "tcp" => &mut values.tcp,
            "queue_capacity" => &mut values.queue_capacity,
            "http_timeout" => &mut values.http_timeout,
            "deny_tags" => &mut values.deny_tags,
            "min_severity" => &mut values.min_severity,
            "log_level" => &mut values.log_level,
            _ => {
                return Err(ConfigError::UnknownKey {
                    line: index + 1,
                    key: key.to_string(),
                })
            }
        };
        *slot = Some(value);
    }

    Ok(values)
}

fn read_config_file(path: &Path) -> Result<FileValues, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_file(&contents)
}

/// Resolved and validated server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub slack_url: String,
    pub tcp: bool,
    pub queue_capacity: usize,
    pub http_timeout: Duration,
    pub deny_tags: Vec<String>,
    pub min_severity: Option<Severity>,
    pub log_level: String,
}

impl Config {
    pub fn resolve(args: Args) -> Result<Config, ConfigError> {
        let file = match &args.config {
            Some(path) => read_config_file(path)?,
            None => FileValues::default(),
        };
        Config::merge(args, file)
    }

    fn merge(args: Args, file: FileValues) -> Result<Config, ConfigError> {
        let tcp = match (args.tcp, file.tcp) {
            (Some(tcp), _) => tcp,
            (None, Some(value)) => parse_bool(&value)
                .ok_or_else(|| ConfigError::invalid("tcp", value, "expected true or false"))?,
            (None, None) => false,
        };

        let queue_capacity = match (args.queue_capacity, file.queue_capacity) {
            (Some(capacity), _) => capacity,
            (None, Some(value)) => value
                .parse()
                .map_err(|e| ConfigError::invalid("queue-capacity", &value, format!("{e}")))?,
            (None, None) => DEFAULT_QUEUE_CAPACITY,
        };

        let http_timeout = match (args.http_timeout, file.http_timeout) {
            (Some(secs), _) => secs,
            (None, Some(value)) => value
                .parse()
                .map_err(|e| ConfigError::invalid("http-timeout", &value, format!("{e}")))?,
            (None, None) => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        let min_severity = match args.min_severity.or(file.min_severity) {
            Some(name) if !name.trim().is_empty() => Some(
                Severity::from_name(name.trim())
                    .ok_or_else(|| ConfigError::invalid("min-severity", &name, "unknown severity"))?,
            ),
            _ => None,
        };

        let deny_tags = args
            .deny_tags
            .or(file.deny_tags)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(String::from)
            .collect();

        let config = Config {
            bind: args
                .bind
                .or(file.bind)
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            slack_url: args
                .slack_url
                .or(file.slack_url)
                .ok_or(ConfigError::Missing("slack-url"))?,
            tcp,
            queue_capacity,
            http_timeout: Duration::from_secs(http_timeout),
            deny_tags,
            min_severity,
            log_level: args
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
                .to_lowercase(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_bind(&self.bind)?;
        parse_webhook_url(&self.slack_url)
            .map_err(|e| ConfigError::invalid("slack-url", &self.slack_url, e.to_string()))?;
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "queue-capacity",
                "0",
                "must be greater than zero",
            ));
        }
        if self.http_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "http-timeout",
                "0",
                "must be greater than zero",
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::invalid(
                "log-level",
                &self.log_level,
                format!("expected one of {}", LOG_LEVELS.join(", ")),
            ));
        }
        Ok(())
    }

    /// Filter admitting records that pass both the tag deny list and the
    /// minimum severity, when those are set.
    pub fn admission_filter(&self) -> AllOf {
        let mut filter = AllOf::default();
        if !self.deny_tags.is_empty() {
            filter.push(Arc::new(TagFilter::deny(self.deny_tags.iter().cloned())));
        }
        if let Some(severity) = self.min_severity {
            filter.push(Arc::new(SeverityFilter::new(severity)));
        }
        filter
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" | "" => Some(false),
        _ => None,
    }
}

// host:port, where host may be a name or a bracketed IPv6 address.
fn validate_bind(bind: &str) -> Result<(), ConfigError> {
    if bind.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }
    match bind.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(ConfigError::invalid(
            "bind",
            bind,
            "expected host:port",
        )),
    }
}
