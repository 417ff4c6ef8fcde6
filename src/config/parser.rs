use crate::config::types::SiteConfig;
use crate::config::validation::validate;
use crate::ConfigError;
use std::path::Path;

/// Loads and parses a site configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML site configuration file
///
/// # Returns
///
/// * `Ok(SiteConfig)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_site_config(path: &Path) -> Result<SiteConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: SiteConfig = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Derives the source name for a configuration file from its file stem
pub fn source_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}
