// src/config/models.rs
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one backend must be configured")]
    NoBackends,

    #[error("backend url {0} has no host")]
    BackendWithoutHost(Url),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("simulated_failure_rate must be within [0, 1], got {0}")]
    FailureRate(f64),

    #[error("route {0:?} must start with '/'")]
    Route(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        for backend in &self.backends {
            if backend.url.host_str().is_none() {
                return Err(ConfigError::BackendWithoutHost(backend.url.clone()));
            }
        }

        if self.health_check.interval_secs == 0 {
            return Err(ConfigError::Zero("health_check.interval_secs"));
        }
        if self.health_check.timeout_secs == 0 {
            return Err(ConfigError::Zero("health_check.timeout_secs"));
        }
        if self.proxy.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("proxy.request_timeout_secs"));
        }
        if self.proxy.max_body_bytes == 0 {
            return Err(ConfigError::Zero("proxy.max_body_bytes"));
        }

        let rate = self.health_check.simulated_failure_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::FailureRate(rate));
        }

        let routes = std::iter::once(&self.server.route)
            .chain(self.server.status_path.as_ref())
            .chain(std::iter::once(&self.metrics.path));
        for route in routes {
            if !route.starts_with('/') {
                return Err(ConfigError::Route(route.clone()));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Path that is balanced across the backends.
    #[serde(default = "default_route")]
    pub route: String,
    /// Path of the JSON pool status endpoint, `None` disables it.
    #[serde(default = "default_status_path")]
    pub status_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            route: default_route(),
            status_path: default_status_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: Url,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound on a single TCP probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
    /// Probability of failing a probe without dialing, for demos.
    #[serde(default)]
    pub simulated_failure_rate: f64,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_probe_timeout_secs(),
            simulated_failure_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries against the same backend before failing over.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Backend switches allowed for one request.
    #[serde(default = "default_max_failover_attempts")]
    pub max_failover_attempts: u32,
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            max_failover_attempts: default_max_failover_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Largest request body buffered for forwarding; larger ones get 413.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl ProxyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_route() -> String {
    "/hello".to_string()
}

fn default_status_path() -> Option<String> {
    Some("/status".to_string())
}

fn default_interval_secs() -> u64 {
    20
}

fn default_probe_timeout_secs() -> u64 {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    10
}

fn default_max_failover_attempts() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
