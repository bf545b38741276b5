use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Collation window and initial poll interval are non-zero
/// - Max poll interval is not below the initial one
/// - An API key is present when the serving mode submits work
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let batching = &config.batching;
    if batching.collation_window_ms == 0 {
        return Err(ConfigError::ValidationError(
            "batching.collation_window_ms cannot be 0".to_string(),
        ));
    }
    if batching.poll_initial_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "batching.poll_initial_interval_ms cannot be 0".to_string(),
        ));
    }
    if batching.poll_max_interval_ms < batching.poll_initial_interval_ms {
        return Err(ConfigError::ValidationError(format!(
            "batching.poll_max_interval_ms ({}) is below poll_initial_interval_ms ({})",
            batching.poll_max_interval_ms, batching.poll_initial_interval_ms
        )));
    }

    if config.serving.mode.submits_work() && config.provider.api_key.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "provider.api_key is required in {} mode",
            config.serving.mode
        )));
    }

    Ok(())
}
