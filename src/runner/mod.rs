//! Run orchestration
//!
//! A [`RunContext`] wires one crawl to one publish channel: the crawl task
//! streams items into a bounded queue, preserving publish order, and the
//! publish channel drains it. Everything is constructed per run and
//! discarded at run end; there are no process-wide singletons.

use crate::config::BrokerParams;
use crate::crawler::{CrawlEngine, DimensionReport, Fetcher};
use crate::publish::{PublishChannel, PublishSummary};
use crate::site::SiteModel;
use crate::{Result, ScoutError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bounded handoff between the crawl task and the publish channel
///
/// Backpressure: the crawl stalls when the publisher falls behind instead
/// of piling items up in memory.
const ITEM_CHANNEL_CAPACITY: usize = 64;

/// Counts reported at the end of one run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub source: String,
    /// Categories visited across all dimensions, synthetic roots included
    pub categories: usize,
    /// Items produced by the crawl
    pub items: usize,
    /// Per-dimension crawl counts
    pub dimensions: Vec<DimensionReport>,
    /// Delivery accounting from the publish channel
    pub publish: PublishSummary,
}

/// Everything one run needs, created per run
pub struct RunContext {
    site: SiteModel,
    broker: Option<BrokerParams>,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(site: SiteModel, broker: BrokerParams) -> Self {
        RunContext {
            site,
            broker: Some(broker),
            cancel: CancellationToken::new(),
        }
    }

    /// A context that crawls without publishing
    pub fn crawl_only(site: SiteModel) -> Self {
        RunContext {
            site,
            broker: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a handle that cancels this run when triggered
    ///
    /// Both the crawl loop and the publish loop observe it: the crawl
    /// checks between page fetches, the publisher between publishes and
    /// during reconnect backoff.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Crawls the site and publishes every discovered item
    ///
    /// The crawl runs on its own task feeding a bounded queue; the publish
    /// channel consumes it here. Item order on the queue is the publish
    /// order.
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - Crawl and delivery counts
    /// * `Err(ScoutError)` - The run failed; partial publishes may have
    ///   happened
    pub async fn run(self) -> Result<RunSummary> {
        let broker = self.broker.clone().ok_or_else(|| {
            crate::ConfigError::Validation(
                "run() requires broker parameters; use run_without_publishing() instead"
                    .to_string(),
            )
        })?;

        let source = self.site.name().to_string();
        tracing::info!("Starting run for source {}", source);

        let fetcher = Fetcher::new()?;
        let (tx, rx) = mpsc::channel(ITEM_CHANNEL_CAPACITY);

        let site = self.site;
        let crawl_cancel = self.cancel.clone();
        let crawl = tokio::spawn(async move {
            let engine = CrawlEngine::new(&site, &fetcher, crawl_cancel);
            engine.crawl(tx).await
        });

        let publisher = PublishChannel::new(broker);
        let publish = publisher.run(rx, self.cancel.clone()).await?;

        let report = crawl
            .await
            .map_err(|e| ScoutError::CrawlTask(e.to_string()))??;

        tracing::info!(
            "Run complete for {}: {} categories, {} items, {} published ({} acked, {} nacked, {} dropped)",
            source,
            report.categories,
            report.items,
            publish.published,
            publish.acked,
            publish.nacked,
            publish.dropped,
        );

        Ok(RunSummary {
            source,
            categories: report.categories,
            items: report.items,
            dimensions: report.dimensions,
            publish,
        })
    }

    /// Crawls the site without publishing anything
    ///
    /// Items are drained and counted; useful for verifying a configuration
    /// against the live site.
    pub async fn run_without_publishing(self) -> Result<RunSummary> {
        let source = self.site.name().to_string();
        let fetcher = Fetcher::new()?;
        let (tx, mut rx) = mpsc::channel(ITEM_CHANNEL_CAPACITY);

        let site = self.site;
        let crawl_cancel = self.cancel.clone();
        let crawl = tokio::spawn(async move {
            let engine = CrawlEngine::new(&site, &fetcher, crawl_cancel);
            engine.crawl(tx).await
        });

        while rx.recv().await.is_some() {}

        let report = crawl
            .await
            .map_err(|e| ScoutError::CrawlTask(e.to_string()))??;

        Ok(RunSummary {
            source,
            categories: report.categories,
            items: report.items,
            dimensions: report.dimensions,
            publish: PublishSummary::default(),
        })
    }
}
