// src/ingest/types.rs
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Loose field as emitted by the page parser. Listing sites interleave
/// display strings and numbers for the same attribute ("$3,200" vs 3200,
/// "1.5 baths" vs 1.5).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Digits-only integer reading: "$3,200" -> 3200, "N/A" -> None.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Scalar::Int(i) => u32::try_from(*i).ok(),
            Scalar::Float(f) if *f >= 0.0 && *f <= u32::MAX as f64 => Some(*f as u32),
            Scalar::Float(_) => None,
            Scalar::Text(s) => {
                let digits: String = s.chars().filter(char::is_ascii_digit).collect();
                digits.parse().ok()
            }
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Scalar::Int(i) => Some(*i as f32),
            Scalar::Float(f) => Some(*f as f32),
            Scalar::Text(s) => {
                let cleaned: String = s
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                cleaned.parse().ok()
            }
        }
    }
}

/// Bedroom count. StreetEasy labels studios both "studio" and "0 bed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beds {
    Studio,
    Count(u32),
}

impl Beds {
    pub fn from_scalar(raw: &Scalar) -> Option<Beds> {
        match raw {
            Scalar::Int(i) => u32::try_from(*i).ok().map(Beds::from_count),
            Scalar::Float(f) if *f >= 0.0 => Some(Beds::from_count(*f as u32)),
            Scalar::Float(_) => None,
            Scalar::Text(s) => Beds::parse(s),
        }
    }

    pub fn parse(raw: &str) -> Option<Beds> {
        let t = raw.trim().to_ascii_lowercase();
        if t.contains("studio") {
            return Some(Beds::Studio);
        }
        let digits: String = t
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse::<u32>().ok().map(Beds::from_count)
    }

    fn from_count(n: u32) -> Beds {
        if n == 0 {
            Beds::Studio
        } else {
            Beds::Count(n)
        }
    }

    /// Token matched against the configured `bed_rooms` whitelist.
    pub fn filter_token(&self) -> String {
        match self {
            Beds::Studio => "studio".to_string(),
            Beds::Count(n) => n.to_string(),
        }
    }
}

impl std::fmt::Display for Beds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Beds::Studio => write!(f, "studio"),
            Beds::Count(n) => write!(f, "{n}"),
        }
    }
}

/// Raw listing card as the page parser hands it over. Everything beyond
/// url/address is best-effort; the normalizer decides what is usable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingCandidate {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub price: Option<Scalar>,
    #[serde(default)]
    pub beds: Option<Scalar>,
    #[serde(default)]
    pub baths: Option<Scalar>,
    #[serde(default)]
    pub sqft: Option<Scalar>,
    #[serde(default)]
    pub neighborhood: String,
    #[serde(default, alias = "imageUrl")]
    pub image_url: Option<String>,
}

/// Canonical listing record with a run-stable identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRecord {
    pub id: String,
    pub address: String,
    pub price: u32,
    pub beds: Option<Beds>,
    pub baths: Option<f32>,
    pub sqft: Option<u32>,
    /// Slug this record was fetched under.
    pub neighborhood_searched: String,
    /// Neighborhood label as printed on the card.
    pub neighborhood_raw: String,
    pub url: String,
    pub image_url: Option<String>,
}

/// Why a candidate could not be normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("candidate has no url")]
    MissingUrl,
    #[error("candidate has no address")]
    MissingAddress,
    #[error("candidate price is missing or unparseable")]
    BadPrice,
}

/// Strip query and fragment. Featured listings resurface with tracking
/// params (`?featured=1`) and must collapse to the same identity.
pub fn clean_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Identity is a pure function of immutable fields: the listing path
/// segment of the url when present, otherwise a digest of (address, url).
/// Price never participates, so price changes keep the same identity.
pub fn listing_id(address: &str, url: &str) -> String {
    let clean = clean_url(url);
    if let Some(rest) = clean
        .strip_prefix("https://")
        .or_else(|| clean.strip_prefix("http://"))
    {
        if let Some(slash) = rest.find('/') {
            let path = rest[slash + 1..].trim_matches('/');
            if !path.is_empty() {
                return path.to_ascii_lowercase();
            }
        }
    }
    short_digest(address, url)
}

fn short_digest(address: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(address.as_bytes());
    hasher.update(b"|");
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
