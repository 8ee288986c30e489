//! Command-line interface.

pub mod progress;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use console::style;
use tokio::sync::mpsc;
use tracing::{info, warn};

use pahe_dl::browser::{BrowserPool, BrowserPoolConfig, ChromeLauncher};
use pahe_dl::config::Settings;
use pahe_dl::http_client::HttpClient;
use pahe_dl::orchestrator::{BatchRequest, EpisodeOrchestrator};
use pahe_dl::rate_limit::Throttler;
use pahe_dl::resolver::Catalog;

use progress::EpisodeProgress;

#[derive(Parser, Debug)]
#[command(name = "pahe-dl")]
#[command(about = "Download anime episodes from animepahe")]
#[command(version)]
pub struct Cli {
    /// Anime title to search for
    #[arg(short = 'n', long)]
    pub name: String,

    /// First episode number
    #[arg(short, long, default_value_t = 1)]
    pub start: u32,

    /// Last episode number (defaults to all available)
    #[arg(short, long)]
    pub end: Option<u32>,

    /// Preferred resolution, e.g. 720 or 1080
    #[arg(short, long)]
    pub quality: Option<u32>,

    /// Output directory
    #[arg(short = 'd', long = "dir")]
    pub dir: Option<PathBuf>,

    /// Prefer dubbed audio
    #[arg(long)]
    pub dub: bool,

    /// Parallel workers (1 = serial)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Maximum requests per minute
    #[arg(short, long)]
    pub rate: Option<u32>,

    /// Print search results as JSON and exit
    #[arg(long)]
    pub search_only: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Settings file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub no_headless: bool,
}

impl Cli {
    /// Settings from file and environment with this invocation's flags on top.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(dir) = &self.dir {
            settings.output_dir = dir.clone();
        }
        if let Some(quality) = self.quality {
            settings.quality = quality;
        }
        if self.dub {
            settings.prefer_dub = true;
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(rate) = self.rate {
            settings.requests_per_minute = rate;
        }
        if self.no_headless {
            settings.browser.headless = false;
        }
        settings.validate()?;
        Ok(settings)
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Arc::new(cli.settings()?);

    let throttler = Throttler::new(settings.throttle_config());
    let client = HttpClient::from_settings(&settings, throttler)
        .context("failed to set up HTTP client")?;
    let launcher = Arc::new(ChromeLauncher::new(
        settings.browser.clone(),
        settings.user_agents.clone(),
    ));
    let pool = Arc::new(BrowserPool::new(
        launcher,
        BrowserPoolConfig {
            max_size: settings.workers,
            root_dir: settings.output_dir.clone(),
        },
    ));

    let outcome = execute(&cli, settings, client, pool.clone()).await;
    pool.shutdown().await;
    outcome
}

async fn execute(
    cli: &Cli,
    settings: Arc<Settings>,
    client: HttpClient,
    pool: Arc<BrowserPool>,
) -> anyhow::Result<()> {
    let catalog = Catalog::new(client.clone(), settings.clone()).with_browser_pool(pool.clone());

    if cli.search_only {
        let json = match catalog.search(&cli.name).await {
            Ok(results) => results.to_json(),
            Err(e) => {
                warn!("Search failed: {}", e);
                serde_json::json!({})
            }
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    let results = catalog
        .search(&cli.name)
        .await
        .with_context(|| format!("search for '{}' failed", cli.name))?;
    let Some(selected) = results.select(&cli.name).cloned() else {
        anyhow::bail!("No results found for '{}'", cli.name);
    };
    info!("Selected: {}", selected.title);
    eprintln!(
        "{} {}",
        style("Selected:").bold(),
        style(&selected.title).cyan()
    );

    let request = BatchRequest {
        title: selected.title.clone(),
        anime_session: selected.session.clone(),
        start: cli.start,
        end: cli.end,
        quality: settings.quality,
        prefer_dub: settings.prefer_dub,
    };
    let orchestrator = EpisodeOrchestrator::new(catalog, client, pool, settings.clone());

    let stop = orchestrator.stop_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight episodes");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let (tx, mut rx) = mpsc::channel(256);
    let workers = settings.workers;
    let renderer = tokio::spawn(async move {
        let mut progress = EpisodeProgress::new(workers);
        while let Some(event) = rx.recv().await {
            progress.handle(&event);
        }
        progress.finish();
    });

    let result = orchestrator.run(&request, tx).await;
    let _ = renderer.await;
    interrupt.abort();

    let summary = result.context("episode batch failed")?;
    eprintln!(
        "{} {}/{} episodes downloaded ({} new, {} already present, {} failed{})",
        style("Completed:").bold().green(),
        summary.available(),
        summary.total,
        summary.succeeded,
        summary.skipped,
        summary.failed,
        if summary.not_started > 0 {
            format!(", {} not started", summary.not_started)
        } else {
            String::new()
        }
    );
    Ok(())
}
