//! Site models and the source registry
//!
//! This module translates site configuration into concrete HTTP requests
//! and extracted references:
//! - [`SiteModel`]: per-source extraction rules and request building
//! - [`SiteRegistry`]: name-to-model lookup for all configured sources

mod model;
mod registry;

pub use model::{join_url, wrap_url_pattern, PageRequest, SiteModel};
pub use registry::SiteRegistry;
