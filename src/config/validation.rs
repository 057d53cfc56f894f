//! Configuration validation.

use crate::config::{Config, HealthCheckType};
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - At least one backend, with no duplicates
/// - A known log level
/// - HTTP health checks have paths
/// - Probe timeout below the sweep interval
/// - Usable retry and body limits
/// - Metrics and proxy listeners on different addresses
///
/// # Returns
///
/// `Ok(())` if valid, or every problem found joined into one message.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if !seen.insert(backend) {
            errors.push(format!("duplicate backend address: {}", backend));
        }
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    let hc = &config.health_check;
    if hc.check_type == HealthCheckType::Http && hc.path.is_none() {
        errors.push("HTTP health check has no path specified".to_string());
    }
    if hc.interval.is_zero() {
        errors.push("health check interval must be greater than zero".to_string());
    }
    if hc.timeout >= hc.interval {
        errors.push(format!(
            "health check timeout ({}) must be shorter than the interval ({})",
            humantime::format_duration(hc.timeout),
            humantime::format_duration(hc.interval)
        ));
    }

    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }

    if config.proxy.max_body_size == 0 {
        errors.push("proxy.max_body_size must be greater than zero".to_string());
    }

    if config.global.metrics.enabled && config.global.metrics.address == config.listen {
        errors.push(format!(
            "metrics address {} is the same as the listen address",
            config.listen
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use std::time::Duration;

    fn minimal_config() -> Config {
        serde_yaml::from_str(
            r#"
listen: "127.0.0.1:8080"
backends:
  - http://127.0.0.1:9001
  - http://127.0.0.1:9002
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&minimal_config()).is_ok());
    }

    #[test]
    fn test_no_backends() {
        let mut config = minimal_config();
        config.backends.clear();
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("at least one backend"));
    }

    #[test]
    fn test_duplicate_backends() {
        let mut config = minimal_config();
        config.backends.push("http://127.0.0.1:9001/".parse().unwrap());
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("duplicate backend address: http://127.0.0.1:9001"));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = minimal_config();
        config.global.log_level = "loud".to_string();
        assert!(validate_config(&config).unwrap_err().contains("invalid log level"));
    }

    #[test]
    fn test_http_health_check_missing_path() {
        let mut config = minimal_config();
        config.health_check.check_type = HealthCheckType::Http;
        config.health_check.path = None;
        assert!(validate_config(&config).unwrap_err().contains("no path specified"));
    }

    #[test]
    fn test_timeout_not_below_interval() {
        let mut config = minimal_config();
        config.health_check.interval = Duration::from_secs(2);
        config.health_check.timeout = Duration::from_secs(2);
        assert!(validate_config(&config).unwrap_err().contains("must be shorter than the interval"));
    }

    #[test]
    fn test_zero_attempts() {
        let mut config = minimal_config();
        config.retry.max_attempts = 0;
        assert!(validate_config(&config).unwrap_err().contains("max_attempts"));
    }

    #[test]
    fn test_metrics_address_clash() {
        let mut config = minimal_config();
        config.global.metrics.address = config.listen;
        assert!(validate_config(&config).unwrap_err().contains("metrics address"));

        config.global.metrics.enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = minimal_config();
        config.backends.clear();
        config.retry.max_attempts = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("at least one backend"));
        assert!(err.contains("max_attempts"));
    }
}
