//! Crawl engine and HTTP fetching
//!
//! This module discovers product references for one site:
//! - [`Fetcher`]: HTTP client with retries and per-language headers
//! - [`CrawlEngine`]: worklist traversal with fixed-point pagination

mod engine;
mod fetcher;

pub use engine::{CrawlEngine, CrawlReport, DimensionReport};
pub use fetcher::{FetchError, Fetcher};
