use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - At least one worker when workers are enabled
/// - Channel poll interval and lease are not 0
/// - Retry backoff grows and its initial delay fits under the cap
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    // Channel validation
    if config.channel.poll_interval_ms == 0 {
        return Err(invalid("channel.poll_interval_ms cannot be 0"));
    }
    if config.channel.lease_secs == 0 {
        return Err(invalid("channel.lease_secs cannot be 0"));
    }

    // Worker validation
    let workers = &config.workers;
    if workers.enabled && workers.count == 0 {
        return Err(invalid("workers.count cannot be 0 when workers are enabled"));
    }
    if workers.retry.multiplier.is_nan() || workers.retry.multiplier < 1.0 {
        return Err(invalid("workers.retry.multiplier must be at least 1.0"));
    }
    if workers.retry.initial_delay_ms > workers.retry.max_delay_ms {
        return Err(ConfigError::ValidationError(format!(
            "workers.retry.initial_delay_ms ({}) exceeds workers.retry.max_delay_ms ({})",
            workers.retry.initial_delay_ms, workers.retry.max_delay_ms
        )));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::net::IpAddr;

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".parse::<IpAddr>().unwrap(),
                port: 0,
            },
            ..Config::default()
        };
        let result = validate_config(&config);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_workers() {
        let mut config = Config::default();
        config.workers.count = 0;
        assert!(validate_config(&config).is_err());

        // Fine when the pool is not started at all.
        config.workers.enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_channel_timings() {
        let mut config = Config::default();
        config.channel.poll_interval_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.channel.lease_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_retry_policy() {
        let mut config = Config::default();
        config.workers.retry.multiplier = 0.5;
        assert!(validate_config(&config).is_err());

        config.workers.retry.multiplier = f64::NAN;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.workers.retry.initial_delay_ms = 60_000;
        config.workers.retry.max_delay_ms = 1_000;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("initial_delay_ms"));
    }
}
