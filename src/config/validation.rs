use crate::config::types::{
    Config, CrawlConfig, FetchConfig, RateLimitConfig, ScheduleConfig, StorageConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_fetch_config(&config.fetch)?;
    validate_crawl_config(&config.crawl)?;
    validate_storage_config(&config.storage)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_schedule_config(&config.schedule)?;
    Ok(())
}

/// Validates outbound HTTP settings
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "timeout_secs must be >= 1, got {}",
            config.timeout_secs
        )));
    }

    // 2^max_retries must stay a sane multiplier
    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    Ok(())
}

/// Validates catalog walk settings
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "base_url '{}' must use http or https",
            config.base_url
        )));
    }

    if !config.catalog_path.contains("{page}") {
        return Err(ConfigError::Validation(format!(
            "catalog_path must contain '{{page}}', got '{}'",
            config.catalog_path
        )));
    }

    if config.start_page < 1 {
        return Err(ConfigError::Validation(
            "start_page must be >= 1".to_string(),
        ));
    }

    if let Some(end_page) = config.end_page {
        if end_page < config.start_page {
            return Err(ConfigError::Validation(format!(
                "end_page ({}) must be >= start_page ({})",
                end_page, config.start_page
            )));
        }
    }

    if config.default_total_pages < 1 {
        return Err(ConfigError::Validation(
            "default_total_pages must be >= 1".to_string(),
        ));
    }

    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "batch_size must be >= 1".to_string(),
        ));
    }

    if config.max_crawl_duration_secs < 1 {
        return Err(ConfigError::Validation(
            "max_crawl_duration_secs must be >= 1".to_string(),
        ));
    }

    if config.lock_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "lock_name cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates database locations
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.kv_path.is_empty() {
        return Err(ConfigError::Validation(
            "kv_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.requests < 1 {
        return Err(ConfigError::Validation(
            "rate-limit requests must be >= 1".to_string(),
        ));
    }

    if config.window_secs < 1 {
        return Err(ConfigError::Validation(
            "rate-limit window_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_schedule_config(config: &ScheduleConfig) -> Result<(), ConfigError> {
    if config.interval_secs < 1 {
        return Err(ConfigError::Validation(
            "interval_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}
