//! Configuration loading and validation
//!
//! Site configurations are TOML documents, one per source; broker
//! parameters come from the environment. Everything is validated up front
//! so a bad configuration fails before the crawl starts.

mod broker;
mod parser;
mod types;
mod validation;

pub use broker::{BrokerParams, RECONNECT_DELAY};
pub use parser::{load_site_config, source_name};
pub use types::{
    BrandSelector, BrandSelectorMode, CategoriesConfig, LangSelector, LangSelectorMode,
    PaginationConfig, PaginationMode, ProductsConfig, SiteConfig,
};
pub use validation::validate;
