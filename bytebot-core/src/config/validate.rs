//! Configuration validation rules.

use std::net::SocketAddr;

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.gateway.id.trim().is_empty() {
        errors.push("gateway.id must not be empty".to_string());
    }
    if config.gateway.id.contains('.') {
        errors.push("gateway.id must not contain '.'".to_string());
    }
    if config.gateway.platform.trim().is_empty() || config.gateway.platform.contains('.') {
        errors.push("gateway.platform must be a non-empty topic segment".to_string());
    }
    if config.redis.addr.trim().is_empty() {
        errors.push("redis.addr must not be empty".to_string());
    }
    if config.redis.db < 0 {
        errors.push("redis.db must be >= 0".to_string());
    }
    if config.discord.gateway_url.trim().is_empty() {
        errors.push("discord.gateway_url must not be empty".to_string());
    }
    if config.discord.api_base.trim().is_empty() {
        errors.push("discord.api_base must not be empty".to_string());
    }
    if config.supervisor.ping_timeout_secs == 0 {
        errors.push("supervisor.ping_timeout_secs must be > 0".to_string());
    }
    if config.health.enabled {
        if config.health.interval_secs == 0 {
            errors.push("health.interval_secs must be > 0".to_string());
        }
        if config.health.bind.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "health.bind '{}' is not a valid socket address",
                config.health.bind
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}

/// Checks that only apply when running the gateway itself
pub fn validate_gateway(config: &Config) -> crate::Result<()> {
    validate_config(config)?;
    if config.discord.token.trim().is_empty() {
        return Err(crate::Error::Validation(
            "discord.token is required to run the gateway (set BYTEBOT_TOKEN or -t)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        validate_config(&Config::default()).unwrap();
    }

    #[test]
    fn test_validate_aggregates_errors() {
        let mut config = Config::default();
        config.gateway.id = " ".to_string();
        config.redis.addr = String::new();

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("gateway.id"));
        assert!(err.contains("redis.addr"));
    }

    #[test]
    fn test_validate_health_bind() {
        let mut config = Config::default();
        config.health.enabled = true;
        config.health.bind = "not-an-address".to_string();

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("health.bind"));
    }

    #[test]
    fn test_gateway_requires_token() {
        let mut config = Config::default();
        let err = validate_gateway(&config).unwrap_err();
        assert!(err.to_string().contains("discord.token"));

        config.discord.token = "token".to_string();
        validate_gateway(&config).unwrap();
    }
}
