use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use headless_client::HeadlessClient;
use placescout_common::Config;
use placescout_engine::{
    CsvSink, Deduper, ExitMonitor, InMemoryDeduper, JsonlSink, ResultSink, Scheduler,
    SchedulerConfig, SqliteDeduper,
};
use placescout_gmaps::preflight::PreflightConfig;
use placescout_runner::{create_seed_jobs, create_tiled_seed_jobs, SeedOptions, TilingOptions};

#[derive(Parser)]
#[command(name = "placescout", about = "Extract business records from map listings")]
struct Cli {
    /// Newline-separated keyword file; `query #!# id` attaches an input id.
    input: PathBuf,

    /// Output file for results.
    #[arg(short, long, default_value = "results.csv")]
    output: PathBuf,

    /// Output format: csv or jsonl.
    #[arg(long, default_value = "csv")]
    format: String,

    /// Two-letter language code propagated as `hl` on outbound URLs.
    #[arg(long, default_value = "en")]
    lang: String,

    /// Listing scroll depth for browser-mode searches.
    #[arg(long, default_value_t = 10)]
    depth: usize,

    /// Enable the email enrichment chain.
    #[arg(long)]
    email: bool,

    /// Also pull extended review pages when available.
    #[arg(long)]
    extra_reviews: bool,

    /// "lat,lon" search center (required with --fast).
    #[arg(long, default_value = "")]
    coords: String,

    /// Zoom level, 1–21.
    #[arg(long, default_value_t = 15)]
    zoom: u8,

    /// Radius filter in meters (0 disables).
    #[arg(long, default_value_t = 10_000.0)]
    radius: f64,

    /// Fast mode: static listing probe instead of browser scrolling.
    #[arg(long)]
    fast: bool,

    // Bounding-box tiling: all four or none.
    #[arg(long)]
    bbox_min_lat: Option<String>,
    #[arg(long)]
    bbox_min_lon: Option<String>,
    #[arg(long)]
    bbox_max_lat: Option<String>,
    #[arg(long)]
    bbox_max_lon: Option<String>,

    /// Entry count at which a tile subdivides.
    #[arg(long, default_value_t = 90)]
    split_threshold: usize,

    /// Cap on initial grid tiles per keyword.
    #[arg(long, default_value_t = 250_000)]
    max_tiles: usize,

    /// Additional zoom levels available to runtime subdivision.
    #[arg(long, default_value_t = 3)]
    subdivide_levels: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("placescout=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let keywords = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read keyword file {}", cli.input.display()))?;

    let deduper: Option<Arc<dyn Deduper>> = Some(match &config.dedup_db_path {
        Some(path) => Arc::new(
            SqliteDeduper::open(path)
                .await
                .with_context(|| format!("failed to open dedup store at {path}"))?,
        ),
        None => Arc::new(InMemoryDeduper::new()),
    });

    let exiter = Arc::new(ExitMonitor::new());

    let preflight = PreflightConfig {
        enabled: config.preflight_enabled,
        dns_timeout_ms: config.preflight_dns_timeout_ms,
        tcp_timeout_ms: config.preflight_tcp_timeout_ms,
        head_timeout_ms: config.preflight_head_timeout_ms,
        enable_head: config.preflight_enable_head,
    };

    let opts = SeedOptions {
        lang: cli.lang.clone(),
        email: cli.email,
        max_depth: cli.depth,
        extra_reviews: cli.extra_reviews,
        preflight,
        deduper,
        exit_monitor: Some(exiter.clone()),
    };

    let bbox = [&cli.bbox_min_lat, &cli.bbox_min_lon, &cli.bbox_max_lat, &cli.bbox_max_lon];
    let bbox_set = bbox.iter().filter(|b| b.is_some()).count();
    let seeds = if bbox_set == 4 {
        let tiling = TilingOptions {
            min_zoom: cli.zoom,
            max_zoom: cli.zoom.saturating_add(cli.subdivide_levels).min(21),
            split_threshold: cli.split_threshold,
            max_tiles: cli.max_tiles,
            static_first: true,
            radius: cli.radius,
        };
        create_tiled_seed_jobs(
            &keywords,
            cli.bbox_min_lat.as_deref().unwrap_or(""),
            cli.bbox_min_lon.as_deref().unwrap_or(""),
            cli.bbox_max_lat.as_deref().unwrap_or(""),
            cli.bbox_max_lon.as_deref().unwrap_or(""),
            tiling,
            &opts,
        )?
    } else if bbox_set == 0 {
        create_seed_jobs(cli.fast, &keywords, &cli.coords, cli.zoom, cli.radius, &opts)?
    } else {
        anyhow::bail!("bounding box requires all four of --bbox-min-lat/--bbox-min-lon/--bbox-max-lat/--bbox-max-lon");
    };

    if seeds.is_empty() {
        info!("No seeds to run (empty keyword list)");
        return Ok(());
    }
    info!(seeds = seeds.len(), "Seed jobs created");

    let output = std::fs::File::create(&cli.output)
        .with_context(|| format!("failed to create output file {}", cli.output.display()))?;
    let sink: Box<dyn ResultSink> = match cli.format.as_str() {
        "csv" => Box::new(CsvSink::new(output)),
        "jsonl" => Box::new(JsonlSink::new(output)),
        other => anyhow::bail!("unknown output format: {other}"),
    };

    let driver: Arc<dyn headless_client::BrowserDriver> = Arc::new(HeadlessClient::new(
        &config.browser_url,
        config.browser_token.as_deref(),
    ));

    let scheduler_config = SchedulerConfig {
        browser_workers: config.concurrency,
        compute_workers: config.concurrency.max(2),
        inactivity_timeout: std::time::Duration::from_secs(config.inactivity_timeout_secs),
        ..SchedulerConfig::default()
    }
    .with_max_time_secs(config.max_time_secs);

    let scheduler = Scheduler::new(scheduler_config, Some(driver), vec![sink], exiter.clone());

    let stats = scheduler.run(seeds).await?;
    let exit_stats = exiter.snapshot();
    info!(
        %stats,
        seeds_completed = exit_stats.seed_completed,
        places_found = exit_stats.places_found,
        places_completed = exit_stats.places_completed,
        output = %cli.output.display(),
        "Run complete"
    );

    Ok(())
}
