//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use pricewatch_core::{ProductTracker, ProgressReporter, RefreshOutcome, RefreshPolicy};
use pricewatch_extract::HttpFetcher;
use pricewatch_shared::{AppConfig, FetchOptions, ProductId, init_config, load_config};
use pricewatch_storage::Storage;

use crate::server::{self, AppState};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PriceWatch: track product prices from store pages.
#[derive(Parser)]
#[command(
    name = "pricewatch",
    version,
    about = "Track e-commerce product prices and their history.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Register a product page and record its current price.
    Add {
        /// Product page URL.
        url: String,
    },

    /// Re-scrape products that are due (or every product with --all).
    Refresh {
        /// Refresh every stored product instead of the due window.
        #[arg(long)]
        all: bool,
    },

    /// List tracked products.
    List {
        /// Rows to skip.
        #[arg(long, default_value = "0")]
        offset: u32,

        /// Rows to show.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show one product with its images and price history.
    Show {
        /// Product id.
        id: ProductId,

        /// Number of history points to show.
        #[arg(long, default_value = "10")]
        history: u32,
    },

    /// Serve the JSON web API (and the refresh scheduler).
    Serve {
        /// Listen host (defaults to config).
        #[arg(long)]
        host: Option<String>,

        /// Listen port (defaults to config / PORT).
        #[arg(long)]
        port: Option<u16>,

        /// Do not run the refresh scheduler alongside the server.
        #[arg(long)]
        no_refresh: bool,
    },

    /// Run only the refresh scheduler.
    Cron,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pricewatch=info",
        1 => "pricewatch=debug",
        _ => "pricewatch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Add { url } => cmd_add(&url).await,
        Command::Refresh { all } => cmd_refresh(all).await,
        Command::List { offset, limit } => cmd_list(offset, limit).await,
        Command::Show { id, history } => cmd_show(id, history).await,
        Command::Serve {
            host,
            port,
            no_refresh,
        } => cmd_serve(host, port, no_refresh).await,
        Command::Cron => cmd_cron().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Open the store and build the tracker from config.
async fn open_tracker(config: &AppConfig) -> Result<Arc<ProductTracker>> {
    let db_path = config.database.resolved_path()?;
    info!(db = %db_path.display(), "opening product store");

    let storage = Storage::open(&db_path).await?;
    let fetcher = HttpFetcher::new(&FetchOptions::from(config))?;
    Ok(Arc::new(ProductTracker::new(Arc::new(storage), fetcher)))
}

/// A token cancelled on Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        trigger.cancel();
    });
    token
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_add(url: &str) -> Result<()> {
    let config = load_config()?;
    let parsed_url = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;

    let tracker = open_tracker(&config).await?;
    let cancel = ctrl_c_token();

    info!(url, "registering product");

    let reporter = CliProgress::new();
    let result = tracker
        .register_product_with_progress(&parsed_url, &cancel, &reporter)
        .await;
    reporter.finish();
    let id = result?;

    let product = tracker.product_detail(id).await?;

    println!();
    println!("  Product tracked!");
    println!("  ID:       {}", product.id);
    println!("  Name:     {}", product.name);
    println!("  Price:    {}", product.current_price);
    println!("  Original: {}", product.original_price);
    println!("  Images:   {}", product.images.len());
    println!();

    Ok(())
}

async fn cmd_refresh(all: bool) -> Result<()> {
    let config = load_config()?;
    let tracker = open_tracker(&config).await?;
    let policy = RefreshPolicy::from(&config.refresh);
    let cancel = ctrl_c_token();

    let reporter = CliProgress::new();
    let result = if all {
        tracker.refresh_all(policy, &cancel, &reporter).await
    } else {
        tracker
            .refresh_due_at(chrono::Utc::now(), policy, &cancel, &reporter)
            .await
    };
    reporter.finish();

    print_outcome(&result?);
    Ok(())
}

fn print_outcome(outcome: &RefreshOutcome) {
    println!();
    println!("  Attempted: {}", outcome.attempted);
    println!("  Refreshed: {}", outcome.refreshed);
    println!("  Failed:    {}", outcome.failures.len());
    for failure in &outcome.failures {
        println!("    #{} {}: {}", failure.product_id, failure.url, failure.error);
    }
    println!();
}

async fn cmd_list(offset: u32, limit: u32) -> Result<()> {
    let config = load_config()?;
    let tracker = open_tracker(&config).await?;

    let page = tracker.list_products(offset, limit).await?;
    if page.products.is_empty() {
        println!("No products tracked.");
        return Ok(());
    }

    println!("{:>6}  {:>12}  {:>12}  NAME", "ID", "PRICE", "ORIGINAL");
    for product in &page.products {
        println!(
            "{:>6}  {:>12}  {:>12}  {}",
            product.id, product.current_price, product.original_price, product.name
        );
    }
    println!("\n{}", page_footer(offset, page.products.len(), page.total));
    Ok(())
}

/// "first-last of total" for a listed page, 1-based.
fn page_footer(offset: u32, shown: usize, total: u64) -> String {
    let first = u64::from(offset) + 1;
    let last = u64::from(offset) + shown as u64;
    format!("{first}-{last} of {total}")
}

async fn cmd_show(id: ProductId, history: u32) -> Result<()> {
    let config = load_config()?;
    let tracker = open_tracker(&config).await?;

    let product = tracker.product_detail(id).await?;
    println!();
    println!("  ID:       {}", product.id);
    println!("  Name:     {}", product.name);
    println!("  Price:    {}", product.current_price);
    println!("  Original: {}", product.original_price);
    println!("  URL:      {}", product.source_url);
    println!("  Updated:  {}", product.updated_at.to_rfc3339());
    for image in &product.images {
        println!("  Image:    {image}");
    }

    let points = tracker.price_history(id, history).await?;
    if !points.is_empty() {
        println!();
        println!("  History:");
        for point in &points {
            println!(
                "    {}  {:>12}  {:>12}",
                point.recorded_at.to_rfc3339(),
                point.current_price,
                point.original_price
            );
        }
    }
    println!();
    Ok(())
}

async fn cmd_serve(host: Option<String>, port: Option<u16>, no_refresh: bool) -> Result<()> {
    let config = load_config()?;
    let tracker = open_tracker(&config).await?;
    let shutdown = ctrl_c_token();

    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    let scheduler = if no_refresh {
        None
    } else {
        let tracker = Arc::clone(&tracker);
        let interval = Duration::from_secs(config.refresh.interval_secs);
        let policy = RefreshPolicy::from(&config.refresh);
        let cancel = shutdown.clone();
        Some(tokio::spawn(async move {
            tracker.run_scheduler(interval, policy, cancel).await;
        }))
    };

    let state = AppState {
        tracker,
        page_size: config.server.page_size,
        history_limit: config.server.history_limit,
        shutdown: shutdown.clone(),
    };
    let served = server::serve(state, &host, port).await;

    // Stop the scheduler whether the server exited cleanly or not.
    shutdown.cancel();
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            warn!(error = %e, "refresh scheduler task failed");
        }
    }
    served
}

async fn cmd_cron() -> Result<()> {
    let config = load_config()?;
    let tracker = open_tracker(&config).await?;
    let cancel = ctrl_c_token();

    tracker
        .run_scheduler(
            Duration::from_secs(config.refresh.interval_secs),
            RefreshPolicy::from(&config.refresh),
            cancel,
        )
        .await;
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn product_refreshed(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Refreshing [{current}/{total}] {url}"));
    }
}
