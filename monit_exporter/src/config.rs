//! Configuration for the exporter.
//!
//! The [`Config`] record is built once at startup, usually from command line
//! flags, and is treated as immutable afterward. Nothing here validates the
//! upstream URL beyond what the HTTP client does on first use.

use std::{fmt, str::FromStr};

use serde::Deserialize;
use tracing::level_filters::LevelFilter;

/// Default address the exporter listens on.
pub const DEFAULT_LISTEN_ADDRESS: &str = "localhost:9388";
/// Default path the metrics are served under.
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
/// Default Monit status endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = "http://localhost:2812/_status?format=xml&level=full";

/// Errors produced by this module.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The log level string is not one of the accepted names.
    #[error("Unknown log level '{0}', expected one of debug, info, warn, error, fatal, panic")]
    InvalidLogLevel(String),
}

fn default_listen_address() -> String {
    DEFAULT_LISTEN_ADDRESS.to_string()
}

fn default_metrics_path() -> String {
    DEFAULT_METRICS_PATH.to_string()
}

fn default_upstream_url() -> String {
    DEFAULT_UPSTREAM_URL.to_string()
}

#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Configuration for the exporter
pub struct Config {
    /// Absolute URL of Monit's XML status document
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    /// Basic auth user for Monit, empty for none
    #[serde(default)]
    pub user: String,
    /// Basic auth password for Monit, empty for none
    #[serde(default)]
    pub password: String,
    /// Skip TLS certificate verification when talking to Monit
    #[serde(default)]
    pub ignore_tls: bool,
    /// Address -- host plus port -- to serve metrics on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// HTTP path the metrics are served under
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream_url: default_upstream_url(),
            user: String::new(),
            password: String::new(),
            ignore_tls: false,
            listen_address: default_listen_address(),
            metrics_path: default_metrics_path(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.password.is_empty() { "" } else { "***" };
        f.debug_struct("Config")
            .field("upstream_url", &self.upstream_url)
            .field("user", &self.user)
            .field("password", &password)
            .field("ignore_tls", &self.ignore_tls)
            .field("listen_address", &self.listen_address)
            .field("metrics_path", &self.metrics_path)
            .finish()
    }
}

/// Verbosity of the exporter's own logging.
///
/// `Fatal` and `Panic` are accepted for compatibility with existing
/// deployments and behave as `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Everything, including per-service scrape detail
    Debug,
    /// Lifecycle and access log lines
    #[default]
    Info,
    /// Upstream failures and unknown service types
    Warn,
    /// Errors only
    Error,
    /// Alias of `Error`
    Fatal,
    /// Alias of `Error`
    Panic,
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            "panic" => Ok(Self::Panic),
            _ => Err(Error::InvalidLogLevel(input.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
            Self::Panic => "panic",
        };
        f.write_str(name)
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Fatal | LogLevel::Panic => LevelFilter::ERROR,
        }
    }
}
