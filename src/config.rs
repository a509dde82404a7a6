//! Configuration management for Slidewire.
//!
//! Configuration is captured once at startup and handed to the components
//! that need it. Sources are layered: built-in defaults, an optional YAML
//! file, then `SLIDEWIRE__SECTION__FIELD` environment variables.

use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Result, SlidewireError};
use crate::ratelimit::{Consistency, LimitPolicy};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SLIDEWIRE";

/// Main configuration for the Slidewire service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlidewireConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Window store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Resolve the client from `X-Forwarded-For` / `X-Real-IP` when the
    /// peer is a trusted proxy
    #[serde(default = "default_trust_forwarded_headers")]
    pub trust_forwarded_headers: bool,

    /// Peers whose forwarding headers are honoured. Entries are addresses
    /// or CIDR ranges.
    #[serde(
        default = "default_trusted_proxies",
        deserialize_with = "deserialize_proxies"
    )]
    pub trusted_proxies: Vec<IpNet>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trust_forwarded_headers: default_trust_forwarded_headers(),
            trusted_proxies: default_trusted_proxies(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_trust_forwarded_headers() -> bool {
    true
}

fn default_trusted_proxies() -> Vec<IpNet> {
    vec![IpNet::from(IpAddr::V4(Ipv4Addr::LOCALHOST))]
}

/// Parse one trusted-proxy entry. A bare address is a single-host range.
fn parse_proxy(entry: &str) -> std::result::Result<IpNet, String> {
    let entry = entry.trim();
    entry
        .parse::<IpNet>()
        .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
        .map_err(|_| format!("invalid trusted proxy {:?}", entry))
}

fn deserialize_proxies<'de, D>(d: D) -> std::result::Result<Vec<IpNet>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<String> = Vec::deserialize(d)?;
    raw.iter()
        .map(|entry| parse_proxy(entry).map_err(serde::de::Error::custom))
        .collect()
}

/// Which window store implementation backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance; limits hold across every process pointed at it.
    #[default]
    Redis,
    /// Process-local store; limits hold for this process only.
    Memory,
}

/// Window store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Namespace prepended to every client key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Timeout for establishing the store connection, in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Timeout applied to each store round trip, in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// How often the in-memory store drops expired windows, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout(),
            operation_timeout_ms: default_operation_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "rate_limiter".to_string()
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_operation_timeout() -> u64 {
    250
}

fn default_sweep_interval() -> u64 {
    30
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum arrivals admitted per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Trailing window length in milliseconds
    #[serde(default = "default_window")]
    pub window_ms: u64,

    /// Whether record and count run as one atomic store operation
    #[serde(default)]
    pub consistency: Consistency,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_ms: default_window(),
            consistency: Consistency::default(),
        }
    }
}

fn default_limit() -> u64 {
    10
}

fn default_window() -> u64 {
    1000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl SlidewireConfig {
    /// Load configuration from defaults, an optional YAML file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let defaults = ::config::Config::try_from(&SlidewireConfig::default())
            .map_err(|e| SlidewireError::InvalidConfiguration(e.to_string()))?;

        let mut builder = ::config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(::config::File::new(path, ::config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.trusted_proxies")
                .try_parsing(true),
        );

        let config: SlidewireConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SlidewireError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SlidewireConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SlidewireError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.limit_policy()?;
        if self.store.key_prefix.is_empty() {
            return Err(SlidewireError::InvalidConfiguration(
                "store.key_prefix must not be empty".to_string(),
            ));
        }
        if self.store.connect_timeout_ms == 0 {
            return Err(SlidewireError::InvalidConfiguration(
                "store.connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Memory && self.store.sweep_interval_secs == 0 {
            return Err(SlidewireError::InvalidConfiguration(
                "store.sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the limiter policy described by this configuration.
    pub fn limit_policy(&self) -> Result<LimitPolicy> {
        LimitPolicy::new(
            self.rate_limiting.limit,
            Duration::from_millis(self.rate_limiting.window_ms),
        )?
        .with_consistency(self.rate_limiting.consistency)
        .with_store_timeout(self.store.operation_timeout())
        .validated()
    }
}
