//! Configuration data types.

use crate::backend::BackendAddress;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Address the proxy listens on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Upstream servers, in rotation order
    #[serde(default)]
    pub backends: Vec<BackendAddress>,

    /// Active health check settings
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Same-backend retry and failover limits
    #[serde(default)]
    pub retry: RetryConfig,

    /// Forwarding settings
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// Type of health check: tcp or http
    #[serde(default, rename = "type")]
    pub check_type: HealthCheckType,

    /// Time between sweeps
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Upper bound for one probe
    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// HTTP path to check (for HTTP health checks)
    #[serde(default)]
    pub path: Option<String>,

    /// Expected HTTP status code (for HTTP health checks)
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_type: HealthCheckType::Tcp,
            interval: default_health_interval(),
            timeout: default_health_timeout(),
            path: None,
            expected_status: default_expected_status(),
        }
    }
}

/// Type of health check.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    #[default]
    Tcp,
    Http,
}

/// Retry and failover limits for one client request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Extra forwards to the same backend before it is marked dead
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause before each same-backend retry
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Distinct backend selections before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Timeout for establishing a backend connection
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout for receiving the backend's response head
    #[serde(default = "default_forward_timeout", with = "humantime_serde")]
    pub forward_timeout: Duration,

    /// Largest request body buffered for replay, in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            forward_timeout: default_forward_timeout(),
            max_body_size: default_max_body_size(),
        }
    }
}

// Default value functions
fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_health_interval() -> Duration {
    Duration::from_secs(120)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_expected_status() -> u16 {
    200
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(10)
}

fn default_max_attempts() -> u32 {
    4
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_forward_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("backends: [\"http://127.0.0.1:9001\"]").unwrap();
        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.global.log_format, LogFormat::Json);
        assert_eq!(config.listen, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.health_check.interval, Duration::from_secs(120));
        assert_eq!(config.health_check.timeout, Duration::from_secs(2));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.retry_delay, Duration::from_millis(10));
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn test_humantime_fields() {
        let yaml = r#"
health_check:
  type: http
  path: /health
  interval: 30s
  timeout: 1500ms
retry:
  retry_delay: 25ms
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.health_check.check_type, HealthCheckType::Http);
        assert_eq!(config.health_check.interval, Duration::from_secs(30));
        assert_eq!(config.health_check.timeout, Duration::from_millis(1500));
        assert_eq!(config.retry.retry_delay, Duration::from_millis(25));
    }

    #[test]
    fn test_invalid_duration() {
        let result: Result<Config, _> = serde_yaml::from_str("retry:\n  retry_delay: soon\n");
        assert!(result.is_err());
    }
}
