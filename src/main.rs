use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use drift_harvester::config::AppConfig;
use drift_harvester::fetch::{BrowserFetcher, Fetcher, HttpFetcher, SnapshotFetcher};
use drift_harvester::links::{append_links, extract_product_links, fetch_product_links, read_links};
use drift_harvester::pipeline::{BatchPipeline, ItemStatus, PipelineOptions};
use drift_harvester::repair::ConfigRepair;
use drift_harvester::selectors::{SelectorConfig, SelectorStore};
use drift_harvester::store::RecordStore;
use drift_harvester::utils::logging;
use drift_harvester::{Extractor, Ledger};

#[derive(Parser)]
#[command(name = "drift-harvester", version, about = "Product page harvester with selector self-repair")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default selector config and create data directories
    Init {
        /// Overwrite an existing selector config
        #[arg(long)]
        force: bool,
    },
    /// Extract one saved product page and print the record as JSON
    Parse {
        html: PathBuf,
        #[arg(long)]
        source: Option<String>,
    },
    /// Fetch, extract and persist every identity in the links file
    Batch {
        #[arg(long)]
        links: Option<PathBuf>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, value_enum, default_value_t = FetcherKind::Http)]
        fetcher: FetcherKind,
    },
    /// Fetch, extract and persist one identity, even if already processed
    Process {
        identity: String,
        #[arg(long, value_enum, default_value_t = FetcherKind::Http)]
        fetcher: FetcherKind,
    },
    /// Diff a fresh page against the reference and repair drifted selectors
    Repair {
        /// Saved candidate page
        #[arg(required_unless_present = "url", conflicts_with = "url")]
        candidate: Option<PathBuf>,
        /// Fetch the candidate page instead of reading a file
        #[arg(long)]
        url: Option<String>,
        #[arg(long, value_enum, default_value_t = FetcherKind::Http)]
        fetcher: FetcherKind,
    },
    /// Store a page as the reference without diffing
    Baseline { html: PathBuf },
    /// Collect product links from a listing page
    Links {
        /// Saved listing page
        #[arg(required_unless_present = "url", conflicts_with = "url")]
        listing: Option<PathBuf>,
        /// Fetch the listing page instead of reading a file
        #[arg(long)]
        url: Option<String>,
        #[arg(long, value_enum, default_value_t = FetcherKind::Http)]
        fetcher: FetcherKind,
        /// Append to the configured links file instead of printing
        #[arg(long)]
        append: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FetcherKind {
    Http,
    Browser,
    Snapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let _guard = logging::init(&config.logging, &config.paths)?;

    match cli.command {
        Command::Init { force } => init(&config, force),
        Command::Parse { html, source } => parse(&config, html, source),
        Command::Batch { links, limit, fetcher } => batch(&config, links, limit, fetcher).await,
        Command::Process { identity, fetcher } => process(&config, &identity, fetcher).await,
        Command::Repair { candidate, url, fetcher } => repair(&config, candidate, url, fetcher).await,
        Command::Baseline { html } => baseline(&config, html).await,
        Command::Links {
            listing,
            url,
            fetcher,
            append,
        } => collect_links(&config, listing, url, fetcher, append).await,
    }
}

fn init(config: &AppConfig, force: bool) -> Result<()> {
    for dir in [&config.paths.output_dir, &config.paths.snapshot_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    if config.paths.selectors.exists() && !force {
        warn!(path = %config.paths.selectors.display(), "selector config exists, use --force to overwrite");
        return Ok(());
    }
    SelectorConfig::default_template().save(&config.paths.selectors)?;
    info!(path = %config.paths.selectors.display(), "default selector config written");
    Ok(())
}

fn parse(config: &AppConfig, html: PathBuf, source: Option<String>) -> Result<()> {
    let text = std::fs::read_to_string(&html).with_context(|| format!("Failed to read {}", html.display()))?;
    let selectors = SelectorConfig::load(&config.paths.selectors).unwrap_or_else(|e| {
        warn!(error = %e, "continuing with empty selector rules");
        SelectorConfig::default()
    });

    let source = source.unwrap_or_else(|| html.display().to_string());
    let record = Extractor::parse(&text, &source, &selectors)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn batch(config: &AppConfig, links: Option<PathBuf>, limit: Option<usize>, kind: FetcherKind) -> Result<()> {
    let links_file = links.unwrap_or_else(|| config.paths.links_file.clone());
    let identities = read_links(&links_file)?;
    if identities.is_empty() {
        warn!(path = %links_file.display(), "no identities to process");
    }

    let pipeline = build_pipeline(config, kind)?;
    let summary = pipeline
        .process(&identities, limit.or(config.pipeline.default_limit))
        .await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.success {
        anyhow::bail!("{} of {} items failed", summary.errors, summary.attempted);
    }
    Ok(())
}

async fn process(config: &AppConfig, identity: &str, kind: FetcherKind) -> Result<()> {
    let pipeline = build_pipeline(config, kind)?;
    let outcome = pipeline.process_one(identity).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let ItemStatus::Failed { stage, error } = &outcome.status {
        anyhow::bail!("{:?} stage failed for {}: {}", stage, outcome.identity, error);
    }
    Ok(())
}

async fn repair(config: &AppConfig, candidate: Option<PathBuf>, url: Option<String>, kind: FetcherKind) -> Result<()> {
    let store = Arc::new(SelectorStore::open(&config.paths.selectors));
    let repair = ConfigRepair::new(store, &config.paths.reference).with_audit_log(&config.paths.audit_log);

    let outcome = match (url, candidate) {
        (Some(url), _) => {
            let fetcher = build_fetcher(config, kind)?;
            repair.repair_from(fetcher.as_ref(), &url).await?
        }
        (None, Some(candidate)) => {
            let html = tokio::fs::read_to_string(&candidate)
                .await
                .with_context(|| format!("Failed to read {}", candidate.display()))?;
            repair.run(&html).await?
        }
        (None, None) => anyhow::bail!("either a candidate file or --url is required"),
    };
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn baseline(config: &AppConfig, html: PathBuf) -> Result<()> {
    let text = tokio::fs::read_to_string(&html)
        .await
        .with_context(|| format!("Failed to read {}", html.display()))?;

    let store = Arc::new(SelectorStore::open(&config.paths.selectors));
    ConfigRepair::new(store, &config.paths.reference)
        .set_baseline(&text)
        .await?;
    Ok(())
}

async fn collect_links(
    config: &AppConfig,
    listing: Option<PathBuf>,
    url: Option<String>,
    kind: FetcherKind,
    append: bool,
) -> Result<()> {
    let base = Url::parse(&config.scraper.base_url)?;
    let marker = &config.scraper.link_marker;
    let links = match (url, listing) {
        (Some(url), _) => {
            let fetcher = build_fetcher(config, kind)?;
            fetch_product_links(fetcher.as_ref(), &url, &base, marker).await?
        }
        (None, Some(listing)) => {
            let html = tokio::fs::read_to_string(&listing)
                .await
                .with_context(|| format!("Failed to read {}", listing.display()))?;
            extract_product_links(&html, &base, marker)
        }
        (None, None) => anyhow::bail!("either a listing file or --url is required"),
    };
    info!(found = links.len(), "product links collected");

    if append {
        append_links(&config.paths.links_file, &links)?;
        info!(path = %config.paths.links_file.display(), "links appended");
    } else {
        for link in &links {
            println!("{}", link);
        }
    }
    Ok(())
}

fn build_fetcher(config: &AppConfig, kind: FetcherKind) -> Result<Arc<dyn Fetcher>> {
    let fetcher: Arc<dyn Fetcher> = match kind {
        FetcherKind::Http => Arc::new(HttpFetcher::new(&config.scraper)?),
        FetcherKind::Browser => Arc::new(BrowserFetcher::new(&config.scraper)?),
        FetcherKind::Snapshot => Arc::new(SnapshotFetcher::new(&config.paths.snapshot_dir)),
    };
    Ok(fetcher)
}

fn build_pipeline(config: &AppConfig, kind: FetcherKind) -> Result<BatchPipeline> {
    Ok(BatchPipeline::new(
        build_fetcher(config, kind)?,
        Arc::new(SelectorStore::open(&config.paths.selectors)),
        RecordStore::new(&config.paths.output_dir),
        Ledger::open(&config.paths.ledger)?,
        PipelineOptions::from(&config.pipeline),
    ))
}
