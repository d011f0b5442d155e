//! Apartment tracker — binary entrypoint.
//!
//! One invocation is one run; an external scheduler (cron, CI) provides the
//! cadence. Runs must not overlap: the seen store is load-mutate-persist
//! per run with no cross-process locking.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use apartment_tracker::config::{AppConfig, ENV_WEBHOOK};
use apartment_tracker::ingest::aliases::AliasTable;
use apartment_tracker::ingest::fetch::{FetchController, HttpFetcher, RetryPolicy};
use apartment_tracker::ingest::parse::StreetEasyParser;
use apartment_tracker::notify::{DiscordNotifier, ListingNotifier};
use apartment_tracker::run::run_once;
use apartment_tracker::seen::SeenStore;

#[derive(Parser)]
#[command(
    name = "apartment-tracker",
    about = "StreetEasy rental tracker with Discord alerts"
)]
struct Cli {
    /// Path to the config file (TOML or JSON)
    #[arg(long, default_value = "config/config.toml")]
    config: PathBuf,

    /// Path to the seen-listings store
    #[arg(long, default_value = "seen_listings.json")]
    seen: PathBuf,

    /// Fetch and filter, but deliver nothing and persist nothing
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op where the environment is real.
    let _ = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config)?;

    let webhook = std::env::var(ENV_WEBHOOK).unwrap_or_default();
    if webhook.is_empty() && !cli.dry_run {
        bail!("{ENV_WEBHOOK} is not set; set it or pass --dry-run");
    }

    let aliases = AliasTable::builtin().with_overrides(&cfg.aliases);
    for slug in &cfg.search.neighborhoods {
        if !aliases.has_entry(slug) {
            // Acceptable: the slug still gets listings, just without
            // sponsored suppression.
            tracing::warn!(neighborhood = %slug, "no alias entry; sponsored filtering disabled");
        }
    }

    let mut seen = SeenStore::open(&cli.seen)?;
    tracing::info!(
        tracked = seen.len(),
        neighborhoods = cfg.search.neighborhoods.len(),
        dry_run = cli.dry_run,
        "starting run"
    );

    let fetcher = HttpFetcher::new(Duration::from_secs(cfg.scraper.fetch_timeout_seconds))?;
    let policy = RetryPolicy::new(
        cfg.scraper.max_fetch_attempts,
        Duration::from_secs(cfg.scraper.request_delay_seconds),
    );
    let mut controller = FetchController::new(Box::new(fetcher), policy);

    let parser = StreetEasyParser;
    let notifier = (!webhook.is_empty()).then(|| {
        DiscordNotifier::new(webhook).with_identity(&cfg.notify.username, &cfg.notify.avatar_url)
    });
    let notifier_ref = notifier.as_ref().map(|n| n as &dyn ListingNotifier);

    let summary = run_once(
        &cfg,
        &aliases,
        &mut seen,
        &mut controller,
        &parser,
        notifier_ref,
        cli.dry_run,
    )
    .await?;
    summary.log();

    // Individual failed neighborhoods do not fail the process; the run
    // completed its orchestration.
    Ok(())
}
