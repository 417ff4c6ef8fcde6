//! Site model: pure translation between configuration and HTTP requests
//!
//! A [`SiteModel`] owns one source's extraction rules and exposes
//! side-effect-free functions to:
//! - resolve the base URL for a (language, brand) dimension
//! - build category page requests, paginated
//! - extract category and product references from fetched page text
//!
//! The only non-pure member is [`SiteModel::apply_delay`], the politeness
//! throttle between page fetches.

use crate::config::{
    BrandSelectorMode, LangSelectorMode, PaginationMode, SiteConfig,
};
use crate::item::{Category, Lang, Product};
use crate::{ConfigError, SiteError, SiteResult};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

/// Wraps a configured URL pattern into its full matching form
///
/// The wrapped pattern captures the whole matched URL as `url` and requires
/// a terminating `?`, `/`, or `#` so that partial identifiers never match.
pub fn wrap_url_pattern(inner: &str) -> String {
    format!(r"(?P<url>{})(?:\?|/|#)", inner)
}

/// Matches the last DNS label of a host, with an optional port
fn tld_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z]+(:[0-9]+)?$").expect("static pattern"))
}

/// Joins a base URL with a path fragment
///
/// Absolute fragments win outright; otherwise the two are joined with
/// exactly one `/` between them.
pub fn join_url(base: &str, fragment: &str) -> String {
    if fragment.starts_with("http://") || fragment.starts_with("https://") {
        return fragment.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        fragment.trim_start_matches('/')
    )
}

/// One category page request: a URL plus query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
}

/// Extraction rules and request building for one catalog source
#[derive(Debug, Clone)]
pub struct SiteModel {
    name: String,
    config: SiteConfig,
    categories_regex: Regex,
    products_regex: Regex,
}

impl SiteModel {
    /// Builds a site model from a validated configuration
    ///
    /// # Arguments
    ///
    /// * `name` - Source name (carried on every published item)
    /// * `config` - The validated site configuration
    ///
    /// # Returns
    ///
    /// * `Ok(SiteModel)` - Patterns compiled and ready
    /// * `Err(ConfigError)` - An extraction pattern failed to compile
    pub fn new(name: impl Into<String>, config: SiteConfig) -> Result<Self, ConfigError> {
        let categories_regex = Regex::new(&wrap_url_pattern(&config.categories.url_regex))
            .map_err(|e| ConfigError::InvalidPattern(format!("categories.url-regex: {}", e)))?;
        let products_regex = Regex::new(&wrap_url_pattern(&config.products.url_regex))
            .map_err(|e| ConfigError::InvalidPattern(format!("products.url-regex: {}", e)))?;

        Ok(SiteModel {
            name: name.into(),
            config,
            categories_regex,
            products_regex,
        })
    }

    /// Returns the source name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the underlying configuration
    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Returns every (language, brand) dimension to crawl
    ///
    /// The Cartesian product of the configured languages and brands; a site
    /// without brands yields one brand-less dimension per language.
    pub fn dimensions(&self) -> Vec<(Lang, Option<String>)> {
        let brands: Vec<Option<String>> = if self.config.brands.is_empty() {
            vec![None]
        } else {
            self.config.brands.iter().cloned().map(Some).collect()
        };

        let mut dims = Vec::new();
        for lang in &self.config.langs {
            for brand in &brands {
                dims.push((*lang, brand.clone()));
            }
        }
        dims
    }

    /// Resolves the base URL for one (language, brand) dimension
    ///
    /// With no language selector the bare base URL is returned. In `suffix`
    /// mode the per-language path suffix is joined onto it; in `tld` mode
    /// the last DNS label of the host is rewritten through the mapping,
    /// preserving any port.
    pub fn resolve_base_url(&self, lang: Lang, _brand: Option<&str>) -> SiteResult<String> {
        let selector = match &self.config.lang_selector {
            Some(s) => s,
            None => return Ok(self.config.base_url.clone()),
        };

        let mapped = selector
            .mapping
            .get(&lang)
            .ok_or_else(|| SiteError::MissingLangMapping {
                lang: lang.code().to_string(),
                mode: format!("{:?}", selector.mode).to_lowercase(),
            })?;

        match selector.mode {
            LangSelectorMode::Suffix => Ok(join_url(&self.config.base_url, mapped)),
            LangSelectorMode::Tld => self.rewrite_tld(lang, mapped),
        }
    }

    fn rewrite_tld(&self, lang: Lang, replacement: &str) -> SiteResult<String> {
        let mut url = Url::parse(&self.config.base_url).map_err(|e| SiteError::TldRewrite {
            lang: lang.code().to_string(),
            reason: e.to_string(),
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| SiteError::MissingHost(self.config.base_url.clone()))?
            .to_string();

        let netloc = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let rewritten = tld_regex()
            .replace(&netloc, format!("{}${{1}}", replacement).as_str())
            .into_owned();

        let mut parts = rewritten.splitn(2, ':');
        let new_host = parts.next().unwrap_or(&host);
        let new_port: Option<u16> = parts.next().and_then(|p| p.parse().ok());

        url.set_host(Some(new_host)).map_err(|e| SiteError::TldRewrite {
            lang: lang.code().to_string(),
            reason: e.to_string(),
        })?;
        url.set_port(new_port).map_err(|_| SiteError::TldRewrite {
            lang: lang.code().to_string(),
            reason: "URL cannot carry a port".to_string(),
        })?;

        Ok(url.to_string())
    }

    /// Builds the unpaginated request for one category page
    ///
    /// Appends a trailing slash when configured and the URL lacks one, and
    /// merges the brand's query parameters when a brand selector applies.
    pub fn category_page(
        &self,
        category: &Category,
        brand: Option<&str>,
    ) -> SiteResult<PageRequest> {
        let mut url = category.url.clone();
        if self.config.categories.trailing_slash && !url.ends_with('/') {
            url.push('/');
        }

        let mut params = Vec::new();
        if let Some(selector) = &self.config.brand_selector {
            let BrandSelectorMode::CategoryQueryParam = selector.mode;
            if let Some(brand) = brand {
                let mapped = selector
                    .mapping
                    .get(brand)
                    .ok_or_else(|| SiteError::MissingBrandMapping(brand.to_string()))?;
                params.extend(mapped.iter().map(|(k, v)| (k.clone(), v.clone())));
                params.sort();
            }
        }

        Ok(PageRequest { url, params })
    }

    /// Yields the request sequence for one category: the unpaginated page
    /// first, then each page in the configured range
    ///
    /// The range is a safety ceiling (default pages 2..1000); callers stop
    /// earlier once a page yields nothing new.
    pub fn paginate(
        &self,
        category: &Category,
        brand: Option<&str>,
    ) -> SiteResult<impl Iterator<Item = PageRequest> + '_> {
        let first = self.category_page(category, brand)?;
        let base_url = first.url.clone();
        let base_params = first.params.clone();
        let pagination = &self.config.categories.pagination;

        let pages = (pagination.start..pagination.end)
            .step_by(pagination.step as usize)
            .map(move |page| match pagination.mode {
                PaginationMode::UrlPathSuffix => {
                    let suffix = pagination
                        .format
                        .as_deref()
                        .unwrap_or("")
                        .replace("{}", &page.to_string());
                    PageRequest {
                        url: join_url(&base_url, &suffix),
                        params: base_params.clone(),
                    }
                }
                PaginationMode::QueryParam => {
                    let mut params = base_params.clone();
                    let key = pagination.key.as_deref().unwrap_or("page");
                    params.push((key.to_string(), page.to_string()));
                    PageRequest {
                        url: base_url.clone(),
                        params,
                    }
                }
            });

        Ok(std::iter::once(first).chain(pages))
    }

    /// Extracts category and product references from fetched page text
    ///
    /// Applies the configured patterns; every match yields an id and, when
    /// the pattern captures one, a slug. Matched URLs are resolved against
    /// the given base URL.
    pub fn extract(&self, base_url: &str, page: &str) -> (HashSet<Category>, HashSet<Product>) {
        let categories = self
            .categories_regex
            .captures_iter(page)
            .filter_map(|caps| {
                let id = caps.name("id")?.as_str().to_string();
                let url = join_url(base_url, caps.name("url")?.as_str());
                let slug = caps.name("slug").map(|m| m.as_str().to_string());
                Some(Category { id, url, slug })
            })
            .collect();

        let products = self
            .products_regex
            .captures_iter(page)
            .filter_map(|caps| {
                let id = caps.name("id")?.as_str().to_string();
                let url = join_url(base_url, caps.name("url")?.as_str());
                let slug = caps.name("slug").map(|m| m.as_str().to_string());
                Some(Product {
                    id,
                    urls: vec![url],
                    slug,
                })
            })
            .collect();

        (categories, products)
    }

    /// Suspends the calling task for the configured politeness delay
    ///
    /// Only the crawling task sleeps, never the whole process.
    pub async fn apply_delay(&self) {
        if let Some(ms) = self.config.delay_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BrandSelector, CategoriesConfig, LangSelector, PaginationConfig, ProductsConfig,
    };
    use std::collections::HashMap;

    fn base_config() -> SiteConfig {
        SiteConfig {
            base_url: "https://shop.test".to_string(),
            lang_selector: None,
            brand_selector: None,
            categories: CategoriesConfig {
                url_regex: r"https?://[^\s\x22]+/cat/(?P<id>[a-z0-9-]+)".to_string(),
                trailing_slash: true,
                pagination: PaginationConfig {
                    mode: PaginationMode::UrlPathSuffix,
                    start: 2,
                    end: 1000,
                    step: 1,
                    format: Some("page-{}/".to_string()),
                    key: None,
                },
            },
            products: ProductsConfig {
                url_regex: r"https?://[^\s\x22]+/p/(?P<id>[a-z0-9-]+)".to_string(),
            },
            delay_ms: None,
            langs: vec![Lang::En],
            brands: vec![],
        }
    }

    fn category(id: &str, url: &str) -> Category {
        Category {
            id: id.to_string(),
            url: url.to_string(),
            slug: None,
        }
    }

    #[test]
    fn test_join_url_relative_and_absolute() {
        assert_eq!(
            join_url("https://shop.test/", "/cat/a/"),
            "https://shop.test/cat/a/"
        );
        assert_eq!(
            join_url("https://shop.test", "https://cdn.test/p/x/"),
            "https://cdn.test/p/x/"
        );
    }

    #[test]
    fn test_resolve_base_url_without_selector() {
        let model = SiteModel::new("shop", base_config()).unwrap();
        assert_eq!(
            model.resolve_base_url(Lang::En, None).unwrap(),
            "https://shop.test"
        );
    }

    #[test]
    fn test_resolve_base_url_suffix_mode() {
        let mut config = base_config();
        config.langs = vec![Lang::En, Lang::Fr];
        config.lang_selector = Some(LangSelector {
            mode: LangSelectorMode::Suffix,
            mapping: HashMap::from([
                (Lang::En, "gb/en".to_string()),
                (Lang::Fr, "fr/fr".to_string()),
            ]),
        });

        let model = SiteModel::new("shop", config).unwrap();
        assert_eq!(
            model.resolve_base_url(Lang::Fr, None).unwrap(),
            "https://shop.test/fr/fr"
        );
    }

    #[test]
    fn test_resolve_base_url_tld_mode_preserves_port() {
        let mut config = base_config();
        config.base_url = "https://shop.example.com:8443/store".to_string();
        config.langs = vec![Lang::De];
        config.lang_selector = Some(LangSelector {
            mode: LangSelectorMode::Tld,
            mapping: HashMap::from([(Lang::De, "de".to_string())]),
        });

        let model = SiteModel::new("shop", config).unwrap();
        assert_eq!(
            model.resolve_base_url(Lang::De, None).unwrap(),
            "https://shop.example.de:8443/store"
        );
    }

    #[test]
    fn test_resolve_base_url_missing_mapping() {
        let mut config = base_config();
        config.lang_selector = Some(LangSelector {
            mode: LangSelectorMode::Suffix,
            mapping: HashMap::new(),
        });

        let model = SiteModel::new("shop", config).unwrap();
        assert!(matches!(
            model.resolve_base_url(Lang::En, None),
            Err(SiteError::MissingLangMapping { .. })
        ));
    }

    #[test]
    fn test_category_page_appends_trailing_slash() {
        let model = SiteModel::new("shop", base_config()).unwrap();
        let page = model
            .category_page(&category("a", "https://shop.test/cat/a"), None)
            .unwrap();
        assert_eq!(page.url, "https://shop.test/cat/a/");
        assert!(page.params.is_empty());
    }

    #[test]
    fn test_category_page_merges_brand_params() {
        let mut config = base_config();
        config.brands = vec!["acme".to_string()];
        config.brand_selector = Some(BrandSelector {
            mode: BrandSelectorMode::CategoryQueryParam,
            mapping: HashMap::from([(
                "acme".to_string(),
                HashMap::from([("brand".to_string(), "42".to_string())]),
            )]),
        });

        let model = SiteModel::new("shop", config).unwrap();
        let page = model
            .category_page(&category("a", "https://shop.test/cat/a/"), Some("acme"))
            .unwrap();
        assert_eq!(page.params, vec![("brand".to_string(), "42".to_string())]);
    }

    #[test]
    fn test_paginate_path_suffix_sequence() {
        let mut config = base_config();
        config.categories.pagination.end = 4;
        let model = SiteModel::new("shop", config).unwrap();

        let pages: Vec<_> = model
            .paginate(&category("a", "https://shop.test/cat/a/"), None)
            .unwrap()
            .collect();

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].url, "https://shop.test/cat/a/");
        assert_eq!(pages[1].url, "https://shop.test/cat/a/page-2/");
        assert_eq!(pages[2].url, "https://shop.test/cat/a/page-3/");
    }

    #[test]
    fn test_paginate_query_param_sequence() {
        let mut config = base_config();
        config.categories.pagination = PaginationConfig {
            mode: PaginationMode::QueryParam,
            start: 2,
            end: 6,
            step: 2,
            format: None,
            key: Some("page".to_string()),
        };
        let model = SiteModel::new("shop", config).unwrap();

        let pages: Vec<_> = model
            .paginate(&category("a", "https://shop.test/cat/a/"), None)
            .unwrap()
            .collect();

        assert_eq!(pages.len(), 3);
        assert!(pages[0].params.is_empty());
        assert_eq!(pages[1].params, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(pages[2].params, vec![("page".to_string(), "4".to_string())]);
        // The URL itself never changes in query-param mode
        assert!(pages.iter().all(|p| p.url == "https://shop.test/cat/a/"));
    }

    #[test]
    fn test_extract_categories_and_products() {
        let model = SiteModel::new("shop", base_config()).unwrap();
        let html = r#"
            <a href="https://shop.test/cat/chairs/">Chairs</a>
            <a href="https://shop.test/cat/tables/">Tables</a>
            <a href="https://shop.test/p/p1/">Red chair</a>
            <a href="https://shop.test/p/p1/">Red chair again</a>
        "#;

        let (categories, products) = model.extract("https://shop.test", html);
        let category_ids: HashSet<_> = categories.iter().map(|c| c.id.as_str()).collect();

        assert_eq!(category_ids, HashSet::from(["chairs", "tables"]));
        assert_eq!(products.len(), 1);
        assert_eq!(products.iter().next().unwrap().id, "p1");
    }

    #[test]
    fn test_extract_requires_terminator() {
        let model = SiteModel::new("shop", base_config()).unwrap();
        // No trailing /, ? or # after the id, so nothing should match
        let (categories, products) = model.extract("https://shop.test", "https://shop.test/p/p1");
        assert!(categories.is_empty());
        assert!(products.is_empty());
    }

    #[test]
    fn test_extract_with_slug_group() {
        let mut config = base_config();
        config.products.url_regex =
            r"https?://[^\s\x22]+/p/(?P<id>[0-9]+)-(?P<slug>[a-z-]+)".to_string();
        let model = SiteModel::new("shop", config).unwrap();

        let (_, products) =
            model.extract("https://shop.test", r#"<a href="https://shop.test/p/17-red-chair/">"#);
        let product = products.iter().next().unwrap();
        assert_eq!(product.id, "17");
        assert_eq!(product.slug.as_deref(), Some("red-chair"));
    }

    #[test]
    fn test_dimensions_cartesian_product() {
        let mut config = base_config();
        config.langs = vec![Lang::En, Lang::Fr];
        config.brands = vec!["a".to_string(), "b".to_string()];
        let model = SiteModel::new("shop", config).unwrap();

        let dims = model.dimensions();
        assert_eq!(dims.len(), 4);
        assert!(dims.contains(&(Lang::Fr, Some("b".to_string()))));
    }

    #[test]
    fn test_dimensions_without_brands() {
        let model = SiteModel::new("shop", base_config()).unwrap();
        assert_eq!(model.dimensions(), vec![(Lang::En, None)]);
    }
}
