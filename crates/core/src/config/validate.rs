use super::{types::Config, ConfigError};
use crate::provider::ProviderInfo;
use crate::scoring::ScoringWeights;

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

/// Validate configuration
///
/// Rejects values that would stall or disable the engine: zero port,
/// concurrency, deadline or thresholds.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.engine.max_concurrency == 0 {
        return Err(invalid("engine.max_concurrency must be at least 1"));
    }
    if config.engine.deadline_ms == 0 {
        return Err(invalid("engine.deadline_ms must be greater than 0"));
    }

    if config.circuit_breaker.failure_threshold == 0 {
        return Err(invalid("circuit_breaker.failure_threshold must be at least 1"));
    }
    if config.health.auto_disable_multiplier == 0 {
        return Err(invalid("health.auto_disable_multiplier must be at least 1"));
    }

    if config.scoring.max_provider_modifier < 0 {
        return Err(invalid("scoring.max_provider_modifier cannot be negative"));
    }
    if let Some(key) = config.scoring.out_of_range() {
        return Err(invalid(format!(
            "scoring.{} must be within ±{}",
            key,
            ScoringWeights::LIMIT
        )));
    }

    for (name, settings) in &config.providers {
        if name.trim().is_empty() {
            return Err(invalid("providers: name cannot be empty"));
        }
        if settings.failure_threshold == Some(0) {
            return Err(invalid(format!(
                "providers.{}.failure_threshold must be at least 1",
                name
            )));
        }
        if let Some(timeout) = settings.timeout_secs {
            if timeout == 0 || timeout > ProviderInfo::MAX_TIMEOUT_SECS {
                return Err(invalid(format!(
                    "providers.{}.timeout_secs must be between 1 and {}",
                    name,
                    ProviderInfo::MAX_TIMEOUT_SECS
                )));
            }
        }
    }

    Ok(())
}
