pub mod discord;

use anyhow::Result;
use async_trait::async_trait;

use crate::ingest::types::ListingRecord;

pub use discord::DiscordNotifier;

/// Outbound delivery collaborator. One call per record; the orchestrator
/// counts a failure and moves on rather than aborting the batch.
#[async_trait]
pub trait ListingNotifier: Send + Sync {
    async fn deliver(&self, record: &ListingRecord) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Google Maps search link included with every alert.
pub fn maps_url(address: &str) -> String {
    let query = format!("{address}, New York, NY");
    match reqwest::Url::parse_with_params(
        "https://www.google.com/maps/search/",
        [("api", "1"), ("query", query.as_str())],
    ) {
        Ok(url) => url.to_string(),
        Err(_) => String::new(),
    }
}
