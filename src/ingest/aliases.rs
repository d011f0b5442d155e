// src/ingest/aliases.rs
//! Sponsored-listing recognition. StreetEasy mixes promoted listings from
//! unrelated areas into a neighborhood's results page; the alias table maps
//! each searched slug to the raw neighborhood labels that legitimately
//! belong there (sub-neighborhoods included).

use std::collections::BTreeMap;

/// Search slugs and the card labels StreetEasy returns for them.
const BUILTIN: &[(&str, &[&str])] = &[
    ("east-village", &["East Village"]),
    ("west-village", &["West Village"]),
    (
        "upper-west-side",
        &["Upper West Side", "Manhattan Valley", "Lincoln Square"],
    ),
    ("chelsea", &["Chelsea", "West Chelsea"]),
    ("les", &["Lower East Side", "Two Bridges", "Chinatown"]),
    (
        "upper-east-side",
        &["Upper East Side", "Yorkville", "Carnegie Hill", "Lenox Hill"],
    ),
    ("hells-kitchen", &["Hell's Kitchen", "Midtown West"]),
    ("murray-hill", &["Murray Hill", "Kips Bay"]),
    ("gramercy-park", &["Gramercy Park", "Gramercy", "Kips Bay"]),
    ("flatiron", &["Flatiron", "NoMad"]),
    ("kips-bay", &["Kips Bay"]),
    ("greenwich-village", &["Greenwich Village"]),
    ("soho", &["SoHo"]),
    ("tribeca", &["Tribeca"]),
    ("financial-district", &["Financial District", "FiDi"]),
    ("williamsburg", &["Williamsburg", "East Williamsburg"]),
    ("greenpoint", &["Greenpoint"]),
    ("park-slope", &["Park Slope"]),
    ("bushwick", &["Bushwick"]),
    ("bed-stuy", &["Bedford-Stuyvesant", "Bed-Stuy"]),
    ("astoria", &["Astoria"]),
    ("long-island-city", &["Long Island City"]),
];

/// Slugs whose display name is not recoverable by title-casing.
const IRREGULAR_DISPLAY: &[(&str, &str)] = &[
    ("les", "Lower East Side"),
    ("bed-stuy", "Bedford-Stuyvesant"),
    ("soho", "SoHo"),
    ("noho", "NoHo"),
    ("nomad", "NoMad"),
    ("dumbo", "DUMBO"),
    ("hells-kitchen", "Hell's Kitchen"),
];

#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: BTreeMap<String, Vec<String>>,
}

impl AliasTable {
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|(slug, names)| {
                (
                    (*slug).to_string(),
                    names.iter().map(|n| (*n).to_string()).collect(),
                )
            })
            .collect();
        Self { entries }
    }

    pub fn from_map(entries: BTreeMap<String, Vec<String>>) -> Self {
        Self { entries }
    }

    /// Replace per-slug accepted sets from configuration.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, Vec<String>>) -> Self {
        for (slug, names) in overrides {
            self.entries.insert(slug.clone(), names.clone());
        }
        self
    }

    pub fn has_entry(&self, slug: &str) -> bool {
        self.entries.contains_key(slug)
    }

    /// A record is sponsored only when an entry exists for the searched slug
    /// and the card's label is neither an accepted name nor the slug's own
    /// display name. No entry means no filtering: unconfigured neighborhoods
    /// keep every listing rather than risking false suppression.
    ///
    /// An empty label under a configured slug counts as sponsored; cards
    /// without the standard neighborhood line are promotional placements.
    pub fn is_sponsored(&self, slug: &str, raw: &str) -> bool {
        let Some(accepted) = self.entries.get(slug) else {
            return false;
        };
        let raw_folded = fold(raw);
        if accepted.iter().any(|name| fold(name) == raw_folded) {
            return false;
        }
        if raw_folded == fold(&display_name(slug)) {
            return false;
        }
        true
    }
}

/// Case- and whitespace-insensitive comparison form.
pub(crate) fn fold(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Canonical display name for a slug: known irregulars, else
/// dash-to-space title case ("east-village" -> "East Village").
pub fn display_name(slug: &str) -> String {
    if let Some((_, display)) = IRREGULAR_DISPLAY.iter().find(|(s, _)| *s == slug) {
        return (*display).to_string();
    }
    slug.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
