// tests/pipeline_e2e.rs
// Full-run scenarios with scripted fetch/parse/notify collaborators.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use apartment_tracker::config::{AppConfig, NotifyConfig, ScraperConfig, SearchConfig};
use apartment_tracker::ingest::fetch::{FetchController, FetchError, PageFetcher, RetryPolicy};
use apartment_tracker::ingest::parse::StreetEasyParser;
use apartment_tracker::ingest::types::ListingRecord;
use apartment_tracker::notify::ListingNotifier;
use apartment_tracker::run::run_once;
use apartment_tracker::seen::SeenStore;
use apartment_tracker::AliasTable;

struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<String, FetchError>>>,
}

impl ScriptedFetcher {
    fn new(responses: Vec<Result<String, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::permanent("script exhausted")))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    delivered: Mutex<Vec<String>>,
    fail_addresses: Vec<String>,
}

#[async_trait]
impl ListingNotifier for RecordingNotifier {
    async fn deliver(&self, record: &ListingRecord) -> anyhow::Result<()> {
        if self.fail_addresses.contains(&record.address) {
            anyhow::bail!("simulated delivery outage");
        }
        self.delivered.lock().unwrap().push(record.address.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Recording"
    }
}

fn les_config() -> AppConfig {
    AppConfig {
        search: SearchConfig {
            neighborhoods: vec!["les".to_string()],
            max_price: 3000,
            min_price: 0,
            bed_rooms: vec!["studio".to_string()],
            no_fee: false,
        },
        scraper: ScraperConfig {
            request_delay_seconds: 0,
            max_fetch_attempts: 3,
            max_pages: 1,
            fetch_timeout_seconds: 5,
        },
        notify: NotifyConfig::default(),
        aliases: BTreeMap::new(),
    }
}

fn les_aliases() -> AliasTable {
    let mut map = BTreeMap::new();
    map.insert("les".to_string(), vec!["Lower East Side".to_string()]);
    AliasTable::from_map(map)
}

fn quick_controller(fetcher: ScriptedFetcher, max_attempts: u32) -> FetchController {
    let policy =
        RetryPolicy::new(max_attempts, Duration::ZERO).with_base_delay(Duration::from_millis(1));
    FetchController::new(Box::new(fetcher), policy)
}

/// Page with one studio in the true neighborhood and one sponsored studio
/// labeled Chinatown, both within budget.
fn les_page() -> String {
    serde_json::json!([
        {
            "url": "https://streeteasy.com/building/100-orchard/2a",
            "address": "100 Orchard Street #2A",
            "price": "$2,800",
            "beds": "studio",
            "baths": 1,
            "neighborhood": "Lower East Side",
            "imageUrl": "https://photos.example/orchard.jpg"
        },
        {
            "url": "https://streeteasy.com/building/88-bowery/5c",
            "address": "88 Bowery #5C",
            "price": 2800,
            "beds": "studio",
            "baths": 1,
            "neighborhood": "Chinatown"
        }
    ])
    .to_string()
}

#[tokio::test]
async fn sponsored_listing_is_suppressed_and_true_one_notified() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = les_config();
    let aliases = les_aliases();
    let mut seen = SeenStore::open(dir.path().join("seen.json")).unwrap();
    let mut controller = quick_controller(ScriptedFetcher::new(vec![Ok(les_page())]), 3);
    let notifier = RecordingNotifier::default();

    let summary = run_once(
        &cfg,
        &aliases,
        &mut seen,
        &mut controller,
        &StreetEasyParser,
        Some(&notifier),
        false,
    )
    .await
    .unwrap();

    assert_eq!(
        *notifier.delivered.lock().unwrap(),
        vec!["100 Orchard Street #2A".to_string()]
    );
    let ns = &summary.neighborhoods[0];
    assert_eq!(ns.new_qualifying, 1);
    assert_eq!(ns.sponsored, 1);
    assert_eq!(ns.duplicates, 0);

    // Persisted store holds exactly the notified id; the sponsored record
    // was not consumed as seen.
    let reopened = SeenStore::open(dir.path().join("seen.json")).unwrap();
    assert_eq!(reopened.len(), 1);
    assert!(reopened.contains("building/100-orchard/2a"));
    assert!(!reopened.contains("building/88-bowery/5c"));
}

#[tokio::test]
async fn rate_limited_neighborhood_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = les_config();
    let aliases = les_aliases();
    let mut seen = SeenStore::open(dir.path().join("seen.json")).unwrap();
    let mut controller = quick_controller(
        ScriptedFetcher::new(vec![
            Err(FetchError::transient("HTTP 429")),
            Err(FetchError::transient("HTTP 429")),
            Err(FetchError::transient("HTTP 429")),
        ]),
        3,
    );
    let notifier = RecordingNotifier::default();

    let summary = run_once(
        &cfg,
        &aliases,
        &mut seen,
        &mut controller,
        &StreetEasyParser,
        Some(&notifier),
        false,
    )
    .await
    .unwrap();

    assert!(notifier.delivered.lock().unwrap().is_empty());
    assert_eq!(summary.failed_neighborhoods(), 1);
    assert!(summary.neighborhoods[0].fetch_failed);
    assert_eq!(summary.total_new(), 0);
}

#[tokio::test]
async fn refetched_listing_is_a_duplicate_with_no_second_alert() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = les_config();
    let aliases = les_aliases();

    let mut seen = SeenStore::open(dir.path().join("seen.json")).unwrap();
    let notifier = RecordingNotifier::default();
    let mut controller = quick_controller(ScriptedFetcher::new(vec![Ok(les_page())]), 3);
    run_once(
        &cfg,
        &aliases,
        &mut seen,
        &mut controller,
        &StreetEasyParser,
        Some(&notifier),
        false,
    )
    .await
    .unwrap();

    // Next run re-fetches the identical page.
    let mut seen = SeenStore::open(dir.path().join("seen.json")).unwrap();
    let notifier = RecordingNotifier::default();
    let mut controller = quick_controller(ScriptedFetcher::new(vec![Ok(les_page())]), 3);
    let summary = run_once(
        &cfg,
        &aliases,
        &mut seen,
        &mut controller,
        &StreetEasyParser,
        Some(&notifier),
        false,
    )
    .await
    .unwrap();

    assert!(notifier.delivered.lock().unwrap().is_empty());
    let ns = &summary.neighborhoods[0];
    assert_eq!(ns.duplicates, 1);
    assert_eq!(ns.new_qualifying, 0);
    // Still sponsored on every sighting, never a duplicate.
    assert_eq!(ns.sponsored, 1);
}

#[tokio::test]
async fn dry_run_leaves_the_store_byte_identical_and_delivers_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.json");

    // Seed a persisted store from a real run.
    let cfg = les_config();
    let aliases = les_aliases();
    let mut seen = SeenStore::open(&path).unwrap();
    let notifier = RecordingNotifier::default();
    let mut controller = quick_controller(ScriptedFetcher::new(vec![Ok(les_page())]), 3);
    run_once(
        &cfg,
        &aliases,
        &mut seen,
        &mut controller,
        &StreetEasyParser,
        Some(&notifier),
        false,
    )
    .await
    .unwrap();
    let before = std::fs::read(&path).unwrap();

    // Dry run over a page with a brand-new qualifying listing.
    let page = serde_json::json!([{
        "url": "https://streeteasy.com/building/200-broome/9k",
        "address": "200 Broome Street #9K",
        "price": 2650,
        "beds": "studio",
        "neighborhood": "Lower East Side"
    }])
    .to_string();
    let mut seen = SeenStore::open(&path).unwrap();
    let notifier = RecordingNotifier::default();
    let mut controller = quick_controller(ScriptedFetcher::new(vec![Ok(page)]), 3);
    let summary = run_once(
        &cfg,
        &aliases,
        &mut seen,
        &mut controller,
        &StreetEasyParser,
        Some(&notifier),
        true,
    )
    .await
    .unwrap();

    assert_eq!(summary.total_new(), 1);
    assert!(notifier.delivered.lock().unwrap().is_empty());
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[tokio::test]
async fn delivery_failure_skips_seen_update_but_not_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = les_config();
    let aliases = les_aliases();
    let mut seen = SeenStore::open(dir.path().join("seen.json")).unwrap();

    let page = serde_json::json!([
        {
            "url": "https://streeteasy.com/building/100-orchard/2a",
            "address": "100 Orchard Street #2A",
            "price": 2800,
            "beds": "studio",
            "neighborhood": "Lower East Side"
        },
        {
            "url": "https://streeteasy.com/building/200-broome/9k",
            "address": "200 Broome Street #9K",
            "price": 2650,
            "beds": "studio",
            "neighborhood": "Lower East Side"
        }
    ])
    .to_string();
    let mut controller = quick_controller(ScriptedFetcher::new(vec![Ok(page)]), 3);
    let notifier = RecordingNotifier {
        fail_addresses: vec!["100 Orchard Street #2A".to_string()],
        ..Default::default()
    };

    let summary = run_once(
        &cfg,
        &aliases,
        &mut seen,
        &mut controller,
        &StreetEasyParser,
        Some(&notifier),
        false,
    )
    .await
    .unwrap();

    // The second record was still attempted and delivered.
    assert_eq!(
        *notifier.delivered.lock().unwrap(),
        vec!["200 Broome Street #9K".to_string()]
    );
    assert_eq!(summary.total_notify_failures(), 1);

    // Only the delivered record is marked seen; the failed one retries
    // next run.
    let reopened = SeenStore::open(dir.path().join("seen.json")).unwrap();
    assert!(reopened.contains("building/200-broome/9k"));
    assert!(!reopened.contains("building/100-orchard/2a"));
}

#[tokio::test]
async fn out_of_budget_listings_drop_before_dedup_counts() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = les_config();
    let aliases = les_aliases();
    let mut seen = SeenStore::open(dir.path().join("seen.json")).unwrap();

    let page = serde_json::json!([{
        "url": "https://streeteasy.com/building/1-luxury/ph",
        "address": "1 Luxury Place PH",
        "price": "$9,500",
        "beds": "studio",
        "neighborhood": "Lower East Side"
    }])
    .to_string();
    let mut controller = quick_controller(ScriptedFetcher::new(vec![Ok(page)]), 3);
    let notifier = RecordingNotifier::default();

    let summary = run_once(
        &cfg,
        &aliases,
        &mut seen,
        &mut controller,
        &StreetEasyParser,
        Some(&notifier),
        false,
    )
    .await
    .unwrap();

    let ns = &summary.neighborhoods[0];
    assert_eq!(ns.out_of_criteria, 1);
    assert_eq!(ns.new_qualifying, 0);
    assert_eq!(ns.sponsored, 0);
    assert_eq!(ns.duplicates, 0);
    assert!(notifier.delivered.lock().unwrap().is_empty());
}
