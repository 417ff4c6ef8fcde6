//! Crawl engine: bounded traversal of a site's category graph
//!
//! For each (language, brand) dimension the engine walks the category
//! graph from a synthetic root at the site's base URL, using an explicit
//! worklist with a visited set keyed on category id. Each category is
//! paginated until a page yields nothing new (the fixed-point rule) or the
//! configured page ceiling is reached. Discovered products are
//! deduplicated by id and streamed out as publish-ready items.

use crate::crawler::fetcher::Fetcher;
use crate::item::{Category, Item, Lang, Product};
use crate::site::SiteModel;
use crate::{ScoutError, SiteResult};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Identity of the synthetic root category
///
/// Extracted ids come from URL path segments, so a double-underscored name
/// can never collide with a real category.
const ROOT_CATEGORY_ID: &str = "__base__";

/// Per-dimension crawl counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionReport {
    pub lang: Lang,
    pub brand: Option<String>,
    /// Categories visited, including the synthetic root
    pub categories: usize,
    /// Unique products discovered
    pub products: usize,
}

/// Whole-run crawl counts, summed across dimensions
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub categories: usize,
    pub items: usize,
    pub dimensions: Vec<DimensionReport>,
}

/// Crawl engine for one site
///
/// Created per run; holds no state between runs. Re-invoking repeats the
/// full traversal.
pub struct CrawlEngine<'a> {
    site: &'a SiteModel,
    fetcher: &'a Fetcher,
    cancel: CancellationToken,
}

impl<'a> CrawlEngine<'a> {
    pub fn new(site: &'a SiteModel, fetcher: &'a Fetcher, cancel: CancellationToken) -> Self {
        CrawlEngine {
            site,
            fetcher,
            cancel,
        }
    }

    /// Crawls every configured (language, brand) dimension and streams the
    /// discovered items, in order, into `tx`
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlReport)` - Counts per dimension and in total
    /// * `Err(ScoutError)` - A dimension could not be resolved, or the item
    ///   channel closed early
    pub async fn crawl(&self, tx: mpsc::Sender<Item>) -> Result<CrawlReport, ScoutError> {
        let mut report = CrawlReport::default();

        for (lang, brand) in self.site.dimensions() {
            if self.cancel.is_cancelled() {
                tracing::info!("Crawl cancelled, stopping before lang={} dimension", lang);
                break;
            }

            let (categories, products) = self.walk_dimension(lang, brand.as_deref()).await?;
            tracing::info!(
                "[Lang {}, Brand {}] {} categories, {} products",
                lang,
                brand.as_deref().unwrap_or("-"),
                categories.len(),
                products.len()
            );

            report.dimensions.push(DimensionReport {
                lang,
                brand: brand.clone(),
                categories: categories.len(),
                products: products.len(),
            });
            report.categories += categories.len();
            report.items += products.len();

            for product in products {
                let item = Item::from_product(self.site.name(), lang, brand.as_deref(), &product);
                if tx.send(item).await.is_err() {
                    return Err(ScoutError::CrawlTask(
                        "item channel closed before the crawl finished".to_string(),
                    ));
                }
            }
        }

        Ok(report)
    }

    /// Walks the category graph for one dimension
    ///
    /// Explicit worklist traversal: categories are visited at most once,
    /// keyed on id, so cycles and deep graphs cannot blow the call stack.
    /// Returns the visited category ids and the deduplicated products,
    /// sorted by id so the item stream has a stable order.
    async fn walk_dimension(
        &self,
        lang: Lang,
        brand: Option<&str>,
    ) -> Result<(HashSet<String>, Vec<Product>), ScoutError> {
        let base_url = self.site.resolve_base_url(lang, brand)?;
        let root = Category {
            id: ROOT_CATEGORY_ID.to_string(),
            url: base_url.clone(),
            slug: Some("base-category".to_string()),
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut products: HashMap<String, Product> = HashMap::new();
        let mut worklist = vec![root];

        while let Some(category) = worklist.pop() {
            if self.cancel.is_cancelled() {
                tracing::info!("Crawl cancelled, abandoning worklist");
                break;
            }
            if !visited.insert(category.id.clone()) {
                continue;
            }

            let discovered = self
                .scrape_category(&category, &base_url, lang, brand, &mut products)
                .await?;

            for child in discovered {
                if !visited.contains(&child.id) {
                    worklist.push(child);
                }
            }
        }

        let mut products: Vec<Product> = products.into_values().collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));
        Ok((visited, products))
    }

    /// Paginates one category until the fixed point
    ///
    /// After each page, if the page's categories are all already known to
    /// this category and its products are all already known to the walk,
    /// the page is redundant and pagination stops. The subset test matters:
    /// a page that only re-surfaces previously seen entries still counts as
    /// nothing new. The configured page range bounds the loop as a safety
    /// ceiling.
    ///
    /// A failed fetch yields an empty page: logged, never fatal.
    async fn scrape_category(
        &self,
        category: &Category,
        base_url: &str,
        lang: Lang,
        brand: Option<&str>,
        products: &mut HashMap<String, Product>,
    ) -> SiteResult<HashSet<Category>> {
        let mut categories: HashSet<Category> = HashSet::new();
        let mut first = true;

        for request in self.site.paginate(category, brand)? {
            if self.cancel.is_cancelled() {
                break;
            }
            if !first {
                self.site.apply_delay().await;
            }
            first = false;

            let page = match self.fetcher.fetch(&request, lang).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!("Failed to fetch page, treating as empty: {}", e);
                    String::new()
                }
            };

            let (new_categories, new_products) = self.site.extract(base_url, &page);

            let no_new_categories = new_categories.is_subset(&categories);
            let no_new_products = new_products.iter().all(|p| products.contains_key(&p.id));
            if no_new_categories && no_new_products {
                tracing::debug!(
                    "Category {} reached fixed point at {}",
                    category.id,
                    request.url
                );
                break;
            }

            categories.extend(new_categories);
            for product in new_products {
                products.entry(product.id.clone()).or_insert(product);
            }
        }

        Ok(categories)
    }
}
