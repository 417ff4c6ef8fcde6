//! Item-Scout main entry point
//!
//! Command-line interface for crawling a configured catalog source and
//! publishing the discovered items.

use clap::Parser;
use item_scout::config::BrokerParams;
use item_scout::runner::RunContext;
use item_scout::site::{SiteModel, SiteRegistry};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Item-Scout: catalog item discovery and publishing
///
/// Crawls a category-organized catalog site, extracts product references,
/// and publishes each discovered item to an AMQP broker. Broker parameters
/// come from the environment (RABBITMQ_* and PUBLISHER_* variables).
#[derive(Parser, Debug)]
#[command(name = "item-scout")]
#[command(version = "1.0.0")]
#[command(about = "Catalog item discovery and publishing", long_about = None)]
struct Cli {
    /// Directory containing site configuration files (one TOML per source)
    #[arg(value_name = "SOURCES")]
    sources: PathBuf,

    /// Name of the source to crawl
    #[arg(short, long)]
    source: Option<String>,

    /// List the configured sources and exit
    #[arg(long, conflicts_with = "source")]
    list: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate the configuration and show what would be crawled
    #[arg(long, conflicts_with = "no_publish")]
    dry_run: bool,

    /// Crawl and count items without publishing anything
    #[arg(long)]
    no_publish: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading sources from: {}", cli.sources.display());
    let registry = SiteRegistry::load(&cli.sources)?;

    if cli.list {
        for name in registry.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let source = cli
        .source
        .ok_or_else(|| anyhow::anyhow!("--source is required unless --list is given"))?;
    let site = registry.get(&source)?;

    if cli.dry_run {
        handle_dry_run(site);
        return Ok(());
    }

    if cli.no_publish {
        let context = RunContext::crawl_only(site.clone());
        install_ctrl_c(&context);
        let summary = context.run_without_publishing().await?;
        print_summary(&summary);
        return Ok(());
    }

    // Publish parameters are fatal when missing; resolve them before any
    // network traffic happens
    let broker = BrokerParams::from_env()?;
    let context = RunContext::new(site.clone(), broker);
    install_ctrl_c(&context);

    let summary = context.run().await?;
    print_summary(&summary);

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("item_scout=info,warn"),
            1 => EnvFilter::new("item_scout=debug,info"),
            2 => EnvFilter::new("item_scout=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Cancels the run on Ctrl-C; a second Ctrl-C kills the process outright
fn install_ctrl_c(context: &RunContext) {
    let cancel = context.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping run");
            cancel.cancel();
        }
    });
}

/// Handles the --dry-run mode: shows what would be crawled
fn handle_dry_run(site: &SiteModel) {
    let config = site.config();

    println!("=== Item-Scout Dry Run ===\n");
    println!("Source: {}", site.name());
    println!("Base URL: {}", config.base_url);
    if let Some(delay) = config.delay_ms {
        println!("Delay between pages: {}ms", delay);
    }

    println!("\nDimensions ({}):", site.dimensions().len());
    for (lang, brand) in site.dimensions() {
        println!("  - lang={} brand={}", lang, brand.as_deref().unwrap_or("-"));
    }

    let pagination = &config.categories.pagination;
    println!(
        "\nPagination: pages {}..{} step {}",
        pagination.start, pagination.end, pagination.step
    );

    println!("\n\u{2713} Configuration is valid");
}

fn print_summary(summary: &item_scout::runner::RunSummary) {
    println!("=== Run Summary: {} ===", summary.source);
    for dim in &summary.dimensions {
        println!(
            "  [lang {}, brand {}] {} categories, {} products",
            dim.lang,
            dim.brand.as_deref().unwrap_or("-"),
            dim.categories,
            dim.products
        );
    }
    println!("Categories visited: {}", summary.categories);
    println!("Items discovered:   {}", summary.items);
    println!("Published:          {}", summary.publish.published);
    println!("Acked:              {}", summary.publish.acked);
    println!("Nacked:             {}", summary.publish.nacked);
    println!("Dropped:            {}", summary.publish.dropped);
    println!("Unconfirmed:        {}", summary.publish.unconfirmed);
}
