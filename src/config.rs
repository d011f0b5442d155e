// src/config.rs
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const ENV_WEBHOOK: &str = "DISCORD_WEBHOOK_URL";
pub const STREETEASY_BASE: &str = "https://streeteasy.com";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub search: SearchConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Per-slug overrides for the built-in sponsored-alias table.
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Slugs to iterate, in the given order.
    pub neighborhoods: Vec<String>,
    pub max_price: u32,
    #[serde(default)]
    pub min_price: u32,
    /// Accepted bedroom tokens, e.g. ["studio", "1"]. Empty accepts all.
    #[serde(default)]
    pub bed_rooms: Vec<String>,
    #[serde(default)]
    pub no_fee: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Hard floor between any two requests of a run, in seconds.
    pub request_delay_seconds: u64,
    pub max_fetch_attempts: u32,
    /// Result pages fetched per neighborhood, capped to keep request volume
    /// predictable.
    pub max_pages: u32,
    pub fetch_timeout_seconds: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            request_delay_seconds: 2,
            max_fetch_attempts: 3,
            max_pages: 3,
            fetch_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub username: String,
    pub avatar_url: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            username: "Apartment Tracker".to_string(),
            avatar_url: String::new(),
        }
    }
}

impl AppConfig {
    /// TOML first, JSON fallback; the config file predates the TOML move in
    /// some deployments.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: AppConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw).context("parsing JSON config")?,
            _ => match toml::from_str(&raw) {
                Ok(cfg) => cfg,
                Err(toml_err) => serde_json::from_str(&raw)
                    .map_err(|_| toml_err)
                    .context("parsing config")?,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.search.neighborhoods.is_empty() {
            bail!("search.neighborhoods must list at least one slug");
        }
        for slug in &self.search.neighborhoods {
            let ok = !slug.is_empty()
                && slug
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
            if !ok {
                bail!("invalid neighborhood slug {slug:?} (expected lowercase-with-dashes)");
            }
        }
        if self.search.max_price == 0 {
            bail!("search.max_price must be positive");
        }
        if self.search.min_price > self.search.max_price {
            bail!("search.min_price exceeds search.max_price");
        }
        if self.scraper.max_fetch_attempts == 0 {
            bail!("scraper.max_fetch_attempts must be at least 1");
        }
        Ok(())
    }
}

impl SearchConfig {
    /// StreetEasy search URL: `/for-rent/{slug}/price:{min}-{max}|beds:{a}-{b}`,
    /// with `|no_fee:1` appended when asked. The filter segment's `:`, `|`
    /// and `-` are served literally.
    pub fn search_url(&self, slug: &str) -> String {
        let mut filters = if self.min_price > 0 {
            format!("price:{}-{}", self.min_price, self.max_price)
        } else {
            format!("price:-{}", self.max_price)
        };
        if !self.bed_rooms.is_empty() {
            let beds = if self.bed_rooms.len() == 1 {
                self.bed_rooms[0].clone()
            } else {
                format!(
                    "{}-{}",
                    self.bed_rooms[0],
                    self.bed_rooms[self.bed_rooms.len() - 1]
                )
            };
            filters.push_str(&format!("|beds:{beds}"));
        }
        if self.no_fee {
            filters.push_str("|no_fee:1");
        }
        format!("{STREETEASY_BASE}/for-rent/{slug}/{filters}")
    }
}
