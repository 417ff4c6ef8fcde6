use crate::item::Lang;
use serde::Deserialize;
use std::collections::HashMap;

/// Site configuration describing how to crawl one catalog source
///
/// Loaded from a TOML document, one file per source. The file stem is the
/// source name carried on every published item.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Root URL of the catalog site
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// How the base URL varies per language, if it does
    #[serde(rename = "lang-selector")]
    pub lang_selector: Option<LangSelector>,

    /// How category requests vary per brand, if they do
    #[serde(rename = "brand-selector")]
    pub brand_selector: Option<BrandSelector>,

    /// Category page extraction and pagination rules
    pub categories: CategoriesConfig,

    /// Product extraction rules
    pub products: ProductsConfig,

    /// Politeness delay between page fetches (milliseconds)
    #[serde(rename = "delay-ms")]
    pub delay_ms: Option<u64>,

    /// Languages to crawl
    pub langs: Vec<Lang>,

    /// Brands to crawl; when absent the site is crawled once without a
    /// brand dimension
    #[serde(default)]
    pub brands: Vec<String>,
}

/// Language selector mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LangSelectorMode {
    /// Join the base URL with a per-language path suffix
    Suffix,

    /// Rewrite the top-level domain of the base URL's host per language
    Tld,
}

/// Per-language base URL selection
#[derive(Debug, Clone, Deserialize)]
pub struct LangSelector {
    pub mode: LangSelectorMode,

    /// Language code to path suffix or TLD replacement
    pub mapping: HashMap<Lang, String>,
}

/// Brand selector mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrandSelectorMode {
    /// Merge brand-specific query parameters into every category request
    CategoryQueryParam,
}

/// Per-brand request selection
#[derive(Debug, Clone, Deserialize)]
pub struct BrandSelector {
    pub mode: BrandSelectorMode,

    /// Brand name to the query parameters selecting it
    pub mapping: HashMap<String, HashMap<String, String>>,
}

/// Category extraction and pagination configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CategoriesConfig {
    /// Pattern matching category URLs; must contain an `id` capture group
    /// and may contain a `slug` group
    #[serde(rename = "url-regex")]
    pub url_regex: String,

    /// Whether category URLs require a trailing slash before pagination
    #[serde(rename = "trailing-slash", default)]
    pub trailing_slash: bool,

    pub pagination: PaginationConfig,
}

/// Pagination mode for category pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaginationMode {
    /// Append a formatted page suffix to the category URL path
    UrlPathSuffix,

    /// Set a query parameter to the page number
    QueryParam,
}

/// How successive pages of one category are requested
///
/// The page range is a safety ceiling; the crawl engine is expected to stop
/// earlier once a page yields nothing new.
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    pub mode: PaginationMode,

    /// First paginated page number (the unpaginated page always comes first)
    #[serde(default = "default_page_start")]
    pub start: u32,

    /// Exclusive upper bound on page numbers
    #[serde(default = "default_page_end")]
    pub end: u32,

    /// Page number increment
    #[serde(default = "default_page_step")]
    pub step: u32,

    /// Page suffix format for `url-path-suffix` mode, with `{}` as the
    /// page number placeholder (e.g. `"page-{}/"`)
    pub format: Option<String>,

    /// Query parameter name for `query-param` mode
    pub key: Option<String>,
}

fn default_page_start() -> u32 {
    2
}

fn default_page_end() -> u32 {
    1000
}

fn default_page_step() -> u32 {
    1
}

/// Product extraction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProductsConfig {
    /// Pattern matching product URLs; must contain an `id` capture group
    /// and may contain a `slug` group
    #[serde(rename = "url-regex")]
    pub url_regex: String,
}
