//! Item-Scout: a catalog item discovery and publishing pipeline
//!
//! This crate crawls category-organized catalog sites, extracts product
//! references, and publishes each discovered item onto an AMQP broker with
//! delivery confirmation and automatic reconnection.

pub mod config;
pub mod crawler;
pub mod item;
pub mod publish;
pub mod runner;
pub mod site;

use thiserror::Error;

/// Main error type for Item-Scout operations
#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Site model error: {0}")]
    Site(#[from] SiteError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crawl task failed: {0}")]
    CrawlTask(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid extraction pattern: {0}")]
    InvalidPattern(String),

    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnv { name: String, value: String },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Unknown language code: {0}")]
    UnknownLang(String),
}

/// Errors raised while translating configuration into requests
#[derive(Debug, Error)]
pub enum SiteError {
    #[error("No language mapping for {lang} in {mode} selector")]
    MissingLangMapping { lang: String, mode: String },

    #[error("No brand mapping for {0}")]
    MissingBrandMapping(String),

    #[error("Failed to build URL from {base} and {fragment}: {source}")]
    UrlJoin {
        base: String,
        fragment: String,
        source: url::ParseError,
    },

    #[error("Base URL has no host: {0}")]
    MissingHost(String),

    #[error("Failed to rewrite host for {lang}: {reason}")]
    TldRewrite { lang: String, reason: String },
}

/// Errors raised by the publish channel
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("Failed to serialize item: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Publish run was cancelled before completion")]
    Cancelled,
}

/// Result type alias for Item-Scout operations
pub type Result<T> = std::result::Result<T, ScoutError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for site model operations
pub type SiteResult<T> = std::result::Result<T, SiteError>;

// Re-export commonly used types
pub use config::{BrokerParams, SiteConfig};
pub use item::{Category, Item, Lang, Product};
pub use runner::{RunContext, RunSummary};
pub use site::{SiteModel, SiteRegistry};
