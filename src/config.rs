//! Server configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file is
//! a valid configuration.
//!
//! ```toml
//! listen = "127.0.0.1:8080"
//! worker_task_n = 8
//! doc_root = "/srv/www"
//!
//! [limits]
//! max_body_size = 1048576
//!
//! [log]
//! level = "debug"
//!
//! [[route]]
//! pattern = "^/svc/"
//! name = "svc"
//! kind = "native"
//! library = "/usr/lib/svcd/libsvc.so"
//! ```

use crate::http::Limits;
use crate::route::RouteKind;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub backlog: i32,
    /// Number of forked server processes
    pub worker_processes: usize,
    /// Worker threads per process
    pub worker_task_n: usize,
    pub doc_root: PathBuf,
    pub server_name: String,
    /// Failed readiness polls tolerated per read or write
    pub timeout: u32,
    pub poll_interval_ms: u64,
    /// Idle keep-alive connections are dropped after this many seconds
    pub keepalive_idle_secs: u64,
    /// Allow route libraries missing from the in-process table to be
    /// loaded from disk
    pub plugins: bool,
    pub limits: LimitsConfig,
    pub log: LogConfig,
    #[serde(rename = "route")]
    pub routes: Vec<RouteConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            backlog: 1024,
            worker_processes: 1,
            worker_task_n: 4,
            doc_root: PathBuf::from("./htdocs"),
            server_name: "svcd".to_string(),
            timeout: 50,
            poll_interval_ms: 100,
            keepalive_idle_secs: 60,
            plugins: false,
            limits: LimitsConfig::default(),
            log: LogConfig::default(),
            routes: Vec::new(),
        }
    }
}

/// `[limits]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_url_size: usize,
    pub max_header_size: usize,
    pub max_body_size: usize,
    pub read_cache_size: usize,
    pub write_cache_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_url_size: limits.max_url_size,
            max_header_size: limits.max_header_size,
            max_body_size: limits.max_body_size,
            read_cache_size: limits.read_cache_size,
            write_cache_size: limits.write_cache_size,
        }
    }
}

impl From<&LimitsConfig> for Limits {
    fn from(config: &LimitsConfig) -> Self {
        Limits {
            max_url_size: config.max_url_size,
            max_header_size: config.max_header_size,
            max_body_size: config.max_body_size,
            read_cache_size: config.read_cache_size,
            write_cache_size: config.write_cache_size,
        }
    }
}

/// `[log]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: false,
        }
    }
}

/// One `[[route]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub pattern: String,
    pub name: String,
    #[serde(default, deserialize_with = "route_kind")]
    pub kind: RouteKind,
    #[serde(default)]
    pub library: String,
}

fn route_kind<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RouteKind, D::Error> {
    let kind = String::deserialize(deserializer)?;
    Ok(RouteKind::from_str(&kind))
}

impl ServerConfig {
    /// Read, parse and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_processes == 0 {
            return Err(ConfigError::Invalid("worker_processes must be at least 1".into()));
        }
        if self.worker_task_n == 0 {
            return Err(ConfigError::Invalid("worker_task_n must be at least 1".into()));
        }
        if self.timeout == 0 {
            return Err(ConfigError::Invalid("timeout must be at least 1 poll".into()));
        }

        let limits = [
            ("max_url_size", self.limits.max_url_size),
            ("max_header_size", self.limits.max_header_size),
            ("max_body_size", self.limits.max_body_size),
            ("read_cache_size", self.limits.read_cache_size),
            ("write_cache_size", self.limits.write_cache_size),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("limits.{} must be nonzero", name)));
        }

        for route in &self.routes {
            if route.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "route {:?} has an empty name",
                    route.pattern
                )));
            }
            regex::bytes::Regex::new(&route.pattern).map_err(|e| {
                ConfigError::Invalid(format!("route {:?}: {}", route.name, e))
            })?;
        }

        Ok(())
    }

    pub fn http_limits(&self) -> Limits {
        Limits::from(&self.limits)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn keepalive_idle(&self) -> Duration {
        Duration::from_secs(self.keepalive_idle_secs)
    }
}
