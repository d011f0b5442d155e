use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;

use super::{maps_url, ListingNotifier};
use crate::ingest::types::ListingRecord;

const EMBED_COLOR: u32 = 0x00B4D8;

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    username: String,
    avatar_url: String,
    client: Client,
    timeout: Duration,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            username: "Apartment Tracker".to_string(),
            avatar_url: String::new(),
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_identity(mut self, username: &str, avatar_url: &str) -> Self {
        if !username.is_empty() {
            self.username = username.to_string();
        }
        self.avatar_url = avatar_url.to_string();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    fn payload_for(&self, record: &ListingRecord) -> WebhookPayload {
        let beds = record
            .beds
            .map(|b| b.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let baths = record
            .baths
            .map(|b| format!("{b}"))
            .unwrap_or_else(|| "N/A".to_string());
        let sqft = record
            .sqft
            .map(|s| format!("{} ft²", thousands(s)))
            .unwrap_or_else(|| "N/A".to_string());

        let fields = vec![
            Field::inline("Price", format!("${}/mo", thousands(record.price))),
            Field::inline("Beds", beds),
            Field::inline("Baths", baths),
            Field::inline("Size", sqft),
            Field::inline("Neighborhood", record.neighborhood_raw.clone()),
            Field::inline(
                "Map",
                format!("[View on Google Maps]({})", maps_url(&record.address)),
            ),
        ];

        WebhookPayload {
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
            embeds: vec![Embed {
                title: record.address.clone(),
                url: record.url.clone(),
                color: EMBED_COLOR,
                fields,
                timestamp: Utc::now().to_rfc3339(),
                footer: Footer {
                    text: "Apartment Tracker • StreetEasy".to_string(),
                },
                image: record
                    .image_url
                    .clone()
                    .map(|url| Image { url }),
            }],
        }
    }
}

#[async_trait]
impl ListingNotifier for DiscordNotifier {
    /// One delivery attempt. Discord's own rate limit is honored once via
    /// `retry_after`; anything else fails the record and the orchestrator
    /// retries it on the next run.
    async fn deliver(&self, record: &ListingRecord) -> Result<()> {
        let payload = self.payload_for(record);
        let mut rsp = self
            .client
            .post(&self.webhook)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;

        if rsp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let wait = rsp
                .json::<RateLimited>()
                .await
                .ok()
                .and_then(|r| r.retry_after)
                .unwrap_or(5.0)
                .clamp(0.5, 60.0);
            tracing::warn!(wait_secs = wait, "discord rate limit hit, pausing once");
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            rsp = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await?;
        }

        rsp.error_for_status()
            .map(|_| ())
            .map_err(|err| anyhow!("discord webhook: {err}"))
    }

    fn name(&self) -> &'static str {
        "Discord"
    }
}

#[derive(Serialize)]
struct WebhookPayload {
    username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    avatar_url: String,
    embeds: Vec<Embed>,
}

#[derive(Serialize)]
struct Embed {
    title: String,
    url: String,
    color: u32,
    fields: Vec<Field>,
    timestamp: String,
    footer: Footer,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<Image>,
}

#[derive(Serialize)]
struct Field {
    name: String,
    value: String,
    inline: bool,
}

impl Field {
    fn inline(name: &str, value: String) -> Self {
        Self {
            name: name.to_string(),
            value,
            inline: true,
        }
    }
}

#[derive(Serialize)]
struct Footer {
    text: String,
}

#[derive(Serialize)]
struct Image {
    url: String,
}

#[derive(serde::Deserialize)]
struct RateLimited {
    retry_after: Option<f64>,
}

fn thousands(n: u32) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
