use crate::config::types::{BrowserConfig, Config, StorageConfig, UserAgentConfig, WorkerConfig};
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_worker_config(&config.worker)?;
    validate_browser_config(&config.browser)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates job claiming and lease settings
fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if let Some(worker_id) = &config.worker_id {
        if worker_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "worker_id cannot be blank when set".to_string(),
            ));
        }
    }

    if config.poll_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "poll_interval_ms must be >= 10ms, got {}ms",
            config.poll_interval_ms
        )));
    }

    if config.error_backoff_ms < config.poll_interval_ms {
        return Err(ConfigError::Validation(format!(
            "error_backoff_ms ({}ms) must not be shorter than poll_interval_ms ({}ms)",
            config.error_backoff_ms, config.poll_interval_ms
        )));
    }

    if config.lease_duration_secs < 1 {
        return Err(ConfigError::Validation(
            "lease_duration_secs must be >= 1".to_string(),
        ));
    }

    // Renewal must fire strictly before the lease lapses
    if !(config.lease_renewal_factor > 0.0 && config.lease_renewal_factor < 1.0) {
        return Err(ConfigError::Validation(format!(
            "lease_renewal_factor must be between 0 and 1 (exclusive), got {}",
            config.lease_renewal_factor
        )));
    }

    Ok(())
}

/// Validates rendering pool settings
fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    if config.max_contexts < 1 || config.max_contexts > 64 {
        return Err(ConfigError::Validation(format!(
            "max_contexts must be between 1 and 64, got {}",
            config.max_contexts
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.default.trim().is_empty() {
        return Err(ConfigError::Validation(
            "default user agent cannot be empty".to_string(),
        ));
    }

    if config.default.chars().any(|c| c.is_control()) {
        return Err(ConfigError::Validation(
            "default user agent cannot contain control characters".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config {
            worker: WorkerConfig::default(),
            browser: BrowserConfig::default(),
            user_agent: UserAgentConfig::default(),
            storage: StorageConfig {
                database_path: "./crawl.db".to_string(),
            },
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&create_valid_config()).is_ok());
    }

    #[test]
    fn test_blank_worker_id() {
        let mut config = create_valid_config();
        config.worker.worker_id = Some("   ".to_string());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_backoff_shorter_than_poll() {
        let mut config = create_valid_config();
        config.worker.poll_interval_ms = 5_000;
        config.worker.error_backoff_ms = 1_000;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_renewal_factor_bounds() {
        let mut config = create_valid_config();

        config.worker.lease_renewal_factor = 0.0;
        assert!(validate(&config).is_err());

        config.worker.lease_renewal_factor = 1.0;
        assert!(validate(&config).is_err());

        config.worker.lease_renewal_factor = 0.99;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_lease_duration() {
        let mut config = create_valid_config();
        config.worker.lease_duration_secs = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_max_contexts_bounds() {
        let mut config = create_valid_config();

        config.browser.max_contexts = 0;
        assert!(validate(&config).is_err());

        config.browser.max_contexts = 65;
        assert!(validate(&config).is_err());

        config.browser.max_contexts = 1;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_user_agent() {
        let mut config = create_valid_config();
        config.user_agent.default = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_user_agent_with_newline() {
        let mut config = create_valid_config();
        config.user_agent.default = "Bot\r\nX-Injected: 1".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_database_path() {
        let mut config = create_valid_config();
        config.storage.database_path = String::new();
        assert!(validate(&config).is_err());
    }
}
