//! Site configuration validation
//!
//! All checks run at load time so that a bad configuration fails the run
//! before any network traffic happens.

use crate::config::types::{PaginationMode, SiteConfig};
use crate::site::wrap_url_pattern;
use crate::ConfigError;
use url::Url;

/// Validates a site configuration
///
/// # Checks
///
/// - the base URL parses and has a host
/// - at least one language is configured
/// - extraction patterns compile and capture an `id` group
/// - the language selector mapping covers every configured language
/// - the brand selector mapping covers every configured brand
/// - the pagination range is non-empty and carries the fields its mode needs
///
/// # Arguments
///
/// * `config` - The site configuration to validate
///
/// # Returns
///
/// * `Ok(())` - Configuration is valid
/// * `Err(ConfigError)` - The first problem found
pub fn validate(config: &SiteConfig) -> Result<(), ConfigError> {
    let base = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
    if base.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url has no host: {}",
            config.base_url
        )));
    }

    if config.langs.is_empty() {
        return Err(ConfigError::Validation(
            "at least one language must be configured".to_string(),
        ));
    }

    validate_pattern("categories.url-regex", &config.categories.url_regex)?;
    validate_pattern("products.url-regex", &config.products.url_regex)?;

    if let Some(selector) = &config.lang_selector {
        for lang in &config.langs {
            if !selector.mapping.contains_key(lang) {
                return Err(ConfigError::Validation(format!(
                    "lang-selector mapping is missing language {}",
                    lang
                )));
            }
        }
    }

    if let Some(selector) = &config.brand_selector {
        if config.brands.is_empty() {
            return Err(ConfigError::Validation(
                "brand-selector is configured but no brands are listed".to_string(),
            ));
        }
        for brand in &config.brands {
            if !selector.mapping.contains_key(brand) {
                return Err(ConfigError::Validation(format!(
                    "brand-selector mapping is missing brand {}",
                    brand
                )));
            }
        }
    }

    validate_pagination(config)?;

    Ok(())
}

/// Checks that an extraction pattern compiles and captures what the crawl
/// engine needs once wrapped into its URL-matching form
fn validate_pattern(field: &str, pattern: &str) -> Result<(), ConfigError> {
    let wrapped = wrap_url_pattern(pattern);
    let regex = regex::Regex::new(&wrapped)
        .map_err(|e| ConfigError::InvalidPattern(format!("{}: {}", field, e)))?;

    let names: Vec<_> = regex.capture_names().flatten().collect();
    if !names.contains(&"id") {
        return Err(ConfigError::InvalidPattern(format!(
            "{} must contain an `id` capture group",
            field
        )));
    }

    Ok(())
}

fn validate_pagination(config: &SiteConfig) -> Result<(), ConfigError> {
    let pagination = &config.categories.pagination;

    if pagination.step == 0 {
        return Err(ConfigError::Validation(
            "pagination step must be at least 1".to_string(),
        ));
    }

    if pagination.end <= pagination.start {
        return Err(ConfigError::Validation(format!(
            "pagination end ({}) must be greater than start ({})",
            pagination.end, pagination.start
        )));
    }

    match pagination.mode {
        PaginationMode::UrlPathSuffix => {
            let format = pagination.format.as_deref().ok_or_else(|| {
                ConfigError::Validation(
                    "url-path-suffix pagination requires a format".to_string(),
                )
            })?;
            if !format.contains("{}") {
                return Err(ConfigError::Validation(
                    "pagination format must contain a {} placeholder".to_string(),
                ));
            }
        }
        PaginationMode::QueryParam => {
            if pagination.key.is_none() {
                return Err(ConfigError::Validation(
                    "query-param pagination requires a key".to_string(),
                ));
            }
        }
    }

    Ok(())
}
