// src/ingest/parse.rs
//! Page-to-candidates extraction collaborator. A card that fails to parse
//! is skipped with a debug log; a page never fails as a whole.

use std::borrow::Cow;

use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::ingest::types::ListingCandidate;

pub trait ListingParser: Send + Sync {
    fn parse(&self, body: &str) -> Vec<ListingCandidate>;
    fn name(&self) -> &'static str;
}

/// Lifts listing candidates out of the JSON state StreetEasy embeds in its
/// search pages (the `__NEXT_DATA__` script). A bare JSON array body is
/// accepted too, which is what fixtures and tests feed in.
pub struct StreetEasyParser;

impl StreetEasyParser {
    fn embedded_state(body: &str) -> Option<&str> {
        static RE_STATE: OnceCell<Regex> = OnceCell::new();
        let re = RE_STATE.get_or_init(|| {
            Regex::new(r#"(?s)<script[^>]+id="__NEXT_DATA__"[^>]*>(.*?)</script>"#).unwrap()
        });
        re.captures(body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    fn candidates_from_value(value: &serde_json::Value) -> Vec<ListingCandidate> {
        let listings = if value.is_array() {
            value
        } else {
            value
                .pointer("/props/pageProps/searchResults/listings")
                .or_else(|| value.pointer("/searchResults/listings"))
                .unwrap_or(&serde_json::Value::Null)
        };
        let Some(items) = listings.as_array() else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<ListingCandidate>(item.clone()) {
                Ok(candidate) => out.push(candidate),
                Err(err) => tracing::debug!(error = %err, "skipping unparseable listing card"),
            }
        }
        out
    }
}

impl ListingParser for StreetEasyParser {
    fn parse(&self, body: &str) -> Vec<ListingCandidate> {
        let t0 = std::time::Instant::now();

        let trimmed = body.trim_start();
        let json_src: Cow<'_, str> = if trimmed.starts_with('[') || trimmed.starts_with('{') {
            Cow::Borrowed(trimmed)
        } else {
            match Self::embedded_state(body) {
                Some(state) => Cow::Borrowed(state),
                None => {
                    tracing::warn!("no embedded listing state found on page");
                    return Vec::new();
                }
            }
        };

        let value: serde_json::Value = match serde_json::from_str(&json_src) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "page state is not valid JSON");
                return Vec::new();
            }
        };
        let out = Self::candidates_from_value(&value);

        histogram!("parse_page_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("parse_candidates_total").increment(out.len() as u64);
        out
    }

    fn name(&self) -> &'static str {
        "StreetEasy"
    }
}
