// src/run.rs
//! One full tracker run: neighborhoods → fetch → parse → normalize →
//! criteria → filter → notify → persist. A failed neighborhood is recorded
//! and skipped; the run always carries on to a summary.

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;

use crate::config::AppConfig;
use crate::ingest::aliases::AliasTable;
use crate::ingest::fetch::{FetchController, FetchError};
use crate::ingest::parse::ListingParser;
use crate::ingest;
use crate::ingest::types::ListingRecord;
use crate::notify::ListingNotifier;
use crate::seen::SeenStore;

/// One-time metrics registration.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("parse_candidates_total", "Candidates parsed from pages.");
        describe_counter!("ingest_rejected_total", "Candidates that failed normalization.");
        describe_counter!(
            "ingest_sponsored_total",
            "Records dropped as sponsored/out-of-neighborhood."
        );
        describe_counter!("ingest_duplicate_total", "Records dropped as already seen.");
        describe_counter!("ingest_new_total", "New qualifying records.");
        describe_counter!("notify_sent_total", "Notifications delivered.");
        describe_counter!("notify_failures_total", "Notification deliveries that failed.");
        describe_counter!("fetch_retries_total", "Transient fetch errors retried.");
        describe_counter!("fetch_failures_total", "Neighborhoods skipped after fetch failure.");
        describe_histogram!("parse_page_ms", "Page parse time in milliseconds.");
        describe_gauge!("tracker_last_run_ts", "Unix ts when the last run finished.");
    });
}

#[derive(Debug, Default, Clone)]
pub struct NeighborhoodSummary {
    pub slug: String,
    pub pages_fetched: u32,
    /// Candidates the parser produced across all pages.
    pub candidates: usize,
    pub rejected: usize,
    pub out_of_criteria: usize,
    /// Within-run repeats (featured listings resurfacing across pages).
    pub page_duplicates: usize,
    pub sponsored: usize,
    pub duplicates: usize,
    pub new_qualifying: usize,
    pub notify_failures: usize,
    pub fetch_failed: bool,
}

#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub neighborhoods: Vec<NeighborhoodSummary>,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn total_new(&self) -> usize {
        self.neighborhoods.iter().map(|n| n.new_qualifying).sum()
    }

    pub fn total_sponsored(&self) -> usize {
        self.neighborhoods.iter().map(|n| n.sponsored).sum()
    }

    pub fn total_duplicates(&self) -> usize {
        self.neighborhoods.iter().map(|n| n.duplicates).sum()
    }

    pub fn total_notify_failures(&self) -> usize {
        self.neighborhoods.iter().map(|n| n.notify_failures).sum()
    }

    pub fn failed_neighborhoods(&self) -> usize {
        self.neighborhoods.iter().filter(|n| n.fetch_failed).count()
    }

    /// Emit the per-neighborhood and total lines. Always called, even when
    /// every neighborhood failed.
    pub fn log(&self) {
        for n in &self.neighborhoods {
            if n.fetch_failed {
                tracing::warn!(neighborhood = %n.slug, "fetch failed, neighborhood skipped");
                continue;
            }
            tracing::info!(
                neighborhood = %n.slug,
                pages = n.pages_fetched,
                candidates = n.candidates,
                new = n.new_qualifying,
                sponsored = n.sponsored,
                duplicates = n.duplicates,
                rejected = n.rejected,
                out_of_criteria = n.out_of_criteria,
                notify_failures = n.notify_failures,
                "neighborhood processed"
            );
        }
        tracing::info!(
            new = self.total_new(),
            sponsored = self.total_sponsored(),
            duplicates = self.total_duplicates(),
            notify_failures = self.total_notify_failures(),
            failed_neighborhoods = self.failed_neighborhoods(),
            dry_run = self.dry_run,
            "run complete"
        );
    }
}

/// Execute one run. The SeenSet is owned by this function for the duration:
/// it is mutated only here and persisted atomically at the end. In dry-run
/// mode nothing is delivered and nothing is mutated or persisted.
pub async fn run_once(
    cfg: &AppConfig,
    aliases: &AliasTable,
    seen: &mut SeenStore,
    controller: &mut FetchController,
    parser: &dyn ListingParser,
    notifier: Option<&dyn ListingNotifier>,
    dry_run: bool,
) -> Result<RunSummary> {
    ensure_metrics_described();
    let mut summary = RunSummary {
        dry_run,
        ..Default::default()
    };

    for slug in &cfg.search.neighborhoods {
        let mut ns = NeighborhoodSummary {
            slug: slug.clone(),
            ..Default::default()
        };

        let records = match collect_neighborhood(cfg, slug, controller, parser, &mut ns).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(neighborhood = %slug, error = %err, "skipping neighborhood");
                counter!("fetch_failures_total").increment(1);
                ns.fetch_failed = true;
                summary.neighborhoods.push(ns);
                continue;
            }
        };

        let before = records.len();
        let records: Vec<ListingRecord> = records
            .into_iter()
            .filter(|r| ingest::matches_criteria(r, &cfg.search))
            .collect();
        ns.out_of_criteria = before - records.len();

        let outcome = ingest::partition(records, seen, aliases);
        ns.sponsored = outcome.sponsored.len();
        ns.duplicates = outcome.duplicates.len();
        ns.new_qualifying = outcome.new_records.len();
        counter!("ingest_sponsored_total").increment(ns.sponsored as u64);
        counter!("ingest_duplicate_total").increment(ns.duplicates as u64);
        counter!("ingest_new_total").increment(ns.new_qualifying as u64);

        let now = Utc::now();
        if !dry_run {
            for dup in &outcome.duplicates {
                seen.touch(dup, now);
            }
        }

        for record in &outcome.new_records {
            tracing::info!(
                price = record.price,
                address = %record.address,
                neighborhood = %record.neighborhood_raw,
                "new listing"
            );
            if dry_run {
                continue;
            }
            let Some(notifier) = notifier else {
                // No transport configured: leave the record unseen so a
                // later live run still alerts on it.
                continue;
            };
            match notifier.deliver(record).await {
                Ok(()) => {
                    seen.record(record, now);
                    counter!("notify_sent_total").increment(1);
                }
                Err(err) => {
                    ns.notify_failures += 1;
                    counter!("notify_failures_total").increment(1);
                    tracing::warn!(
                        address = %record.address,
                        notifier = notifier.name(),
                        error = %format!("{err:#}"),
                        "delivery failed, will retry next run"
                    );
                }
            }
        }

        summary.neighborhoods.push(ns);
    }

    if !dry_run {
        seen.persist().context("persisting seen store")?;
    }
    gauge!("tracker_last_run_ts").set(Utc::now().timestamp() as f64);
    Ok(summary)
}

/// Fetch and normalize every page of one neighborhood. A failure on page 1
/// fails the neighborhood; deeper pages are best-effort.
async fn collect_neighborhood(
    cfg: &AppConfig,
    slug: &str,
    controller: &mut FetchController,
    parser: &dyn ListingParser,
    ns: &mut NeighborhoodSummary,
) -> Result<Vec<ListingRecord>, FetchError> {
    let base = cfg.search.search_url(slug);
    tracing::info!(neighborhood = %slug, url = %base, "scraping");

    let mut records = Vec::new();
    for page in 1..=cfg.scraper.max_pages.max(1) {
        let url = if page == 1 {
            base.clone()
        } else {
            format!("{base}?page={page}")
        };
        let body = match controller.get(&url).await {
            Ok(body) => body,
            Err(err) if page == 1 => return Err(err),
            Err(err) => {
                tracing::warn!(
                    neighborhood = %slug,
                    page,
                    error = %err,
                    "page fetch failed, keeping earlier pages"
                );
                break;
            }
        };
        ns.pages_fetched += 1;

        let candidates = parser.parse(&body);
        if candidates.is_empty() {
            // Ran off the end of the results.
            break;
        }
        ns.candidates += candidates.len();

        for candidate in &candidates {
            match ingest::normalize(candidate, slug) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    ns.rejected += 1;
                    counter!("ingest_rejected_total").increment(1);
                    tracing::debug!(neighborhood = %slug, %reason, "rejected candidate");
                }
            }
        }
    }

    let (unique, dropped) = ingest::dedup_within_run(records);
    ns.page_duplicates = dropped;
    Ok(unique)
}
