// src/ingest/mod.rs
pub mod aliases;
pub mod fetch;
pub mod parse;
pub mod types;

use std::collections::HashSet;

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::config::{SearchConfig, STREETEASY_BASE};
use crate::ingest::aliases::AliasTable;
use crate::ingest::types::{Beds, ListingCandidate, ListingRecord, Rejection, Scalar};
use crate::seen::SeenStore;

/// Clean a text field from the parser: decode HTML entities, collapse
/// whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    re_ws.replace_all(decoded.as_ref(), " ").trim().to_string()
}

/// Canonicalize a candidate fetched under `searched_slug`. Rejects when
/// address, url, or a usable price is missing; everything else degrades to
/// None. Normalizing the same candidate twice yields the identical record,
/// id included.
pub fn normalize(
    candidate: &ListingCandidate,
    searched_slug: &str,
) -> Result<ListingRecord, Rejection> {
    let mut url = candidate.url.trim().to_string();
    if url.is_empty() {
        return Err(Rejection::MissingUrl);
    }
    if url.starts_with('/') {
        url = format!("{STREETEASY_BASE}{url}");
    }
    let url = types::clean_url(&url).to_string();

    let address = normalize_text(&candidate.address);
    if address.is_empty() {
        return Err(Rejection::MissingAddress);
    }

    let price = candidate
        .price
        .as_ref()
        .and_then(Scalar::as_u32)
        .filter(|p| *p > 0)
        .ok_or(Rejection::BadPrice)?;

    Ok(ListingRecord {
        id: types::listing_id(&address, &url),
        address,
        price,
        beds: candidate.beds.as_ref().and_then(Beds::from_scalar),
        baths: candidate.baths.as_ref().and_then(Scalar::as_f32),
        sqft: candidate
            .sqft
            .as_ref()
            .and_then(Scalar::as_u32)
            .filter(|s| *s > 0),
        neighborhood_searched: searched_slug.to_string(),
        neighborhood_raw: normalize_text(&candidate.neighborhood),
        url,
        image_url: candidate
            .image_url
            .clone()
            .filter(|u| u.starts_with("http")),
    })
}

/// Inclusive price bounds and the bedroom whitelist, applied before any
/// dedup bookkeeping. A record failing here is neither a duplicate nor
/// sponsored; it was simply never asked for.
pub fn matches_criteria(record: &ListingRecord, search: &SearchConfig) -> bool {
    if record.price > search.max_price || record.price < search.min_price {
        return false;
    }
    if !search.bed_rooms.is_empty() {
        let Some(beds) = &record.beds else {
            return false;
        };
        let token = beds.filter_token();
        if !search
            .bed_rooms
            .iter()
            .any(|wanted| wanted.eq_ignore_ascii_case(&token))
        {
            return false;
        }
    }
    true
}

/// Within-run dedup: featured listings repeat across pages of the same
/// search. First sighting wins, order preserved.
pub fn dedup_within_run(records: Vec<ListingRecord>) -> (Vec<ListingRecord>, usize) {
    let mut seen_ids: HashSet<String> = HashSet::with_capacity(records.len());
    let mut kept = Vec::with_capacity(records.len());
    let mut dropped = 0usize;
    for record in records {
        if seen_ids.insert(record.id.clone()) {
            kept.push(record);
        } else {
            dropped += 1;
        }
    }
    (kept, dropped)
}

#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub new_records: Vec<ListingRecord>,
    pub sponsored: Vec<ListingRecord>,
    pub duplicates: Vec<ListingRecord>,
}

/// Split a batch into new / sponsored / already-seen, preserving input
/// order within each bucket. Sponsorship is tested first so a sponsored
/// record is never consumed as seen; if it later shows up under its true
/// neighborhood it is still eligible there.
pub fn partition(
    records: Vec<ListingRecord>,
    seen: &SeenStore,
    aliases: &AliasTable,
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for record in records {
        if aliases.is_sponsored(&record.neighborhood_searched, &record.neighborhood_raw) {
            outcome.sponsored.push(record);
        } else if seen.contains(&record.id) {
            outcome.duplicates.push(record);
        } else {
            outcome.new_records.push(record);
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn candidate(url: &str, address: &str, price: i64, neighborhood: &str) -> ListingCandidate {
        ListingCandidate {
            url: url.to_string(),
            address: address.to_string(),
            price: Some(Scalar::Int(price)),
            beds: Some(Scalar::Text("studio".to_string())),
            baths: Some(Scalar::Int(1)),
            sqft: None,
            neighborhood: neighborhood.to_string(),
            image_url: None,
        }
    }

    fn search(max_price: u32, bed_rooms: &[&str]) -> SearchConfig {
        SearchConfig {
            neighborhoods: vec!["les".to_string()],
            max_price,
            min_price: 0,
            bed_rooms: bed_rooms.iter().map(|s| (*s).to_string()).collect(),
            no_fee: false,
        }
    }

    #[test]
    fn normalize_is_idempotent_on_id() {
        let cand = candidate(
            "https://streeteasy.com/building/100-orchard/2a?featured=1",
            "100  Orchard Street #2A",
            2800,
            "Lower East Side",
        );
        let first = normalize(&cand, "les").unwrap();
        let second = normalize(&cand, "les").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.id, "building/100-orchard/2a");
        assert_eq!(first.address, "100 Orchard Street #2A");
    }

    #[test]
    fn normalize_rejects_incomplete_candidates() {
        let mut no_url = candidate("", "1 A St", 2500, "SoHo");
        no_url.url.clear();
        assert_eq!(normalize(&no_url, "soho"), Err(Rejection::MissingUrl));

        let no_addr = candidate("https://streeteasy.com/building/a/1", "  ", 2500, "SoHo");
        assert_eq!(normalize(&no_addr, "soho"), Err(Rejection::MissingAddress));

        let mut bad_price = candidate("https://streeteasy.com/building/a/1", "1 A St", 0, "SoHo");
        bad_price.price = Some(Scalar::Text("N/A".to_string()));
        assert_eq!(normalize(&bad_price, "soho"), Err(Rejection::BadPrice));
    }

    #[test]
    fn relative_urls_are_absolutized() {
        let cand = candidate("/building/a/1", "1 A St", 2500, "SoHo");
        let record = normalize(&cand, "soho").unwrap();
        assert_eq!(record.url, "https://streeteasy.com/building/a/1");
        assert_eq!(record.id, "building/a/1");
    }

    #[test]
    fn criteria_bounds_are_inclusive() {
        let record = normalize(
            &candidate("https://streeteasy.com/building/a/1", "1 A St", 3000, "SoHo"),
            "soho",
        )
        .unwrap();
        assert!(matches_criteria(&record, &search(3000, &[])));
        assert!(!matches_criteria(&record, &search(2999, &[])));
    }

    #[test]
    fn bed_whitelist_filters_and_empty_whitelist_accepts_all() {
        let record = normalize(
            &candidate("https://streeteasy.com/building/a/1", "1 A St", 2500, "SoHo"),
            "soho",
        )
        .unwrap();
        assert!(matches_criteria(&record, &search(3000, &["studio"])));
        assert!(matches_criteria(&record, &search(3000, &["Studio", "1"])));
        assert!(!matches_criteria(&record, &search(3000, &["2"])));
        assert!(matches_criteria(&record, &search(3000, &[])));
    }

    #[test]
    fn within_run_dedup_keeps_first_sighting() {
        let a = normalize(
            &candidate("https://streeteasy.com/building/a/1", "1 A St", 2500, "SoHo"),
            "soho",
        )
        .unwrap();
        let a_again = normalize(
            &candidate(
                "https://streeteasy.com/building/a/1?featured=1",
                "1 A St",
                2500,
                "SoHo",
            ),
            "soho",
        )
        .unwrap();
        let (kept, dropped) = dedup_within_run(vec![a.clone(), a_again]);
        assert_eq!(kept, vec![a]);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn sponsorship_wins_over_dedup_and_order_is_stable() {
        let mut aliases = BTreeMap::new();
        aliases.insert("les".to_string(), vec!["Lower East Side".to_string()]);
        let aliases = AliasTable::from_map(aliases);

        let true_hood = normalize(
            &candidate(
                "https://streeteasy.com/building/a/1",
                "1 A St",
                2500,
                "Lower East Side",
            ),
            "les",
        )
        .unwrap();
        // Same id is already seen AND carries a sponsored label; it must land
        // in sponsored, not duplicates.
        let sponsored_and_seen = normalize(
            &candidate(
                "https://streeteasy.com/building/b/2",
                "2 B St",
                2600,
                "Chinatown",
            ),
            "les",
        )
        .unwrap();
        let later = normalize(
            &candidate(
                "https://streeteasy.com/building/c/3",
                "3 C St",
                2700,
                "Lower East Side",
            ),
            "les",
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut store = SeenStore::open(dir.path().join("seen.json")).unwrap();
        store.record(&sponsored_and_seen, chrono::Utc::now());

        let outcome = partition(
            vec![true_hood.clone(), sponsored_and_seen, later.clone()],
            &store,
            &aliases,
        );
        assert_eq!(outcome.new_records, vec![true_hood, later]);
        assert_eq!(outcome.sponsored.len(), 1);
        assert!(outcome.duplicates.is_empty());
    }
}
