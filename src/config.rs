// src/config.rs

//! Connection configuration: the process-wide default topology, per-connection
//! overrides, and loading a topology from a TOML file.

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Upper bound, in milliseconds, of the default reconnect delay.
pub const MAX_DEFAULT_RETRY_DELAY_MS: f64 = 20_000.0;

/// Decides how long to wait before reconnect attempt number `attempt` (starting at 1).
///
/// Returning `None` stops reconnecting and lets the client move to `end`.
#[derive(Clone)]
pub struct RetryStrategy(Arc<dyn Fn(u32) -> Option<Duration> + Send + Sync>);

impl RetryStrategy {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(u32) -> Option<Duration> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Exponential backoff: `min(e^attempt, 20000)` milliseconds, retrying forever.
    pub fn exponential() -> Self {
        Self::new(|attempt| {
            let millis = (attempt as f64).exp().min(MAX_DEFAULT_RETRY_DELAY_MS);
            Some(Duration::from_millis(millis as u64))
        })
    }

    /// Waits the same delay before every attempt.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(move |_| Some(delay))
    }

    /// Never reconnects. The first failed attempt ends the client.
    pub fn never() -> Self {
        Self::new(|_| None)
    }

    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        (self.0)(attempt)
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl fmt::Debug for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryStrategy(..)")
    }
}

/// Options for a single store connection.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientOptions {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Logical database selected after connecting.
    #[serde(default)]
    pub db: u32,
    /// Name registered with `CLIENT SETNAME` after connecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
    #[serde(skip)]
    pub retry_strategy: RetryStrategy,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    6379
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_command_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            db: 0,
            connection_name: None,
            tls: false,
            connect_timeout: default_connect_timeout(),
            command_timeout: default_command_timeout(),
            retry_strategy: RetryStrategy::default(),
        }
    }
}

impl ClientOptions {
    /// Options pointing at `host:port`, everything else defaulted.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self, context: &str) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("{context}: host cannot be empty"));
        }
        if self.port == 0 {
            return Err(anyhow!("{context}: port cannot be 0"));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("{context}: connect_timeout cannot be 0"));
        }
        if self.command_timeout.is_zero() {
            return Err(anyhow!("{context}: command_timeout cannot be 0"));
        }
        Ok(())
    }
}

/// The address of one node in a clustered deployment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The store topology every new connection is built against.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum GlobalConfig {
    /// One node, reached directly.
    Single(ClientOptions),
    /// Several nodes behind a routing layer. `options` apply to every node.
    Cluster {
        nodes: Vec<NodeAddr>,
        #[serde(default)]
        options: ClientOptions,
    },
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self::Single(ClientOptions::default())
    }
}

impl GlobalConfig {
    /// Reads and validates a topology from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to load config from '{path}'"))?;
        info!("Loaded {} store configuration from '{}'", config.mode(), path);
        Ok(config)
    }

    /// Parses and validates a topology from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: GlobalConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn mode(&self) -> &'static str {
        match self {
            GlobalConfig::Single(_) => "single",
            GlobalConfig::Cluster { .. } => "cluster",
        }
    }

    /// Checks the topology for values no connection could work with.
    pub fn validate(&self) -> Result<()> {
        match self {
            GlobalConfig::Single(options) => options.validate("single"),
            GlobalConfig::Cluster { nodes, options } => {
                if nodes.is_empty() {
                    return Err(anyhow!("cluster: at least one node is required"));
                }
                for (i, node) in nodes.iter().enumerate() {
                    if node.host.trim().is_empty() {
                        return Err(anyhow!("cluster node #{}: host cannot be empty", i + 1));
                    }
                    if node.port == 0 {
                        return Err(anyhow!("cluster node #{}: port cannot be 0", i + 1));
                    }
                }
                // Node addresses come from `nodes`; only the shared settings matter here.
                options.validate("cluster options")
            }
        }
    }
}

/// Per-connection values layered over the matching `GlobalConfig` options.
#[derive(Debug, Clone, Default)]
pub struct ClientOptionsOverride {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: Option<u32>,
    pub connection_name: Option<String>,
    pub tls: Option<bool>,
    pub connect_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
    pub retry_strategy: Option<RetryStrategy>,
}

impl ClientOptionsOverride {
    /// Returns `base` with every value set in `self` taking precedence.
    pub fn apply(&self, base: &ClientOptions) -> ClientOptions {
        let mut merged = base.clone();
        if let Some(host) = &self.host {
            merged.host = host.clone();
        }
        if let Some(port) = self.port {
            merged.port = port;
        }
        if self.username.is_some() {
            merged.username = self.username.clone();
        }
        if self.password.is_some() {
            merged.password = self.password.clone();
        }
        if let Some(db) = self.db {
            merged.db = db;
        }
        if self.connection_name.is_some() {
            merged.connection_name = self.connection_name.clone();
        }
        if let Some(tls) = self.tls {
            merged.tls = tls;
        }
        if let Some(timeout) = self.connect_timeout {
            merged.connect_timeout = timeout;
        }
        if let Some(timeout) = self.command_timeout {
            merged.command_timeout = timeout;
        }
        if let Some(strategy) = &self.retry_strategy {
            merged.retry_strategy = strategy.clone();
        }
        merged
    }
}

/// Options for one queue connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    pub overrides: ClientOptionsOverride,
    /// Skips the minimum server version check during initialization.
    pub skip_version_check: bool,
}

impl ConnectionOptions {
    pub fn skip_version_check(mut self, skip: bool) -> Self {
        self.skip_version_check = skip;
        self
    }

    pub fn with_overrides(mut self, overrides: ClientOptionsOverride) -> Self {
        self.overrides = overrides;
        self
    }
}

// Read when a connection is constructed, never afterwards. Not meant to be
// changed while other threads are constructing connections.
static GLOBAL_CONFIG: Lazy<RwLock<GlobalConfig>> =
    Lazy::new(|| RwLock::new(GlobalConfig::default()));

/// Replaces the default topology used by connections constructed from now on.
/// Connections that already exist keep the configuration they were built with.
pub fn set_global_config(config: GlobalConfig) {
    info!("Default store configuration set to {} mode", config.mode());
    *GLOBAL_CONFIG.write() = config;
}

/// Returns a snapshot of the current default topology.
pub fn global_config() -> GlobalConfig {
    GLOBAL_CONFIG.read().clone()
}
