// src/seen.rs
//! Durable record of already-notified listings. Load-mutate-persist is
//! bounded to one run; overlapping runs are a caller obligation to avoid.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::ingest::types::ListingRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenEntry {
    pub first_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub price: u32,
    #[serde(default)]
    pub neighborhood: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub price_history: Vec<PricePoint>,
}

impl SeenEntry {
    fn bare(first_seen: DateTime<Utc>) -> Self {
        Self {
            first_seen,
            last_seen: None,
            address: String::new(),
            price: 0,
            neighborhood: String::new(),
            price_history: Vec::new(),
        }
    }
}

/// On-disk layouts: the current map form, or the legacy bare id array.
#[derive(Deserialize)]
#[serde(untagged)]
enum SeenFile {
    Map(BTreeMap<String, SeenEntry>),
    Legacy(Vec<String>),
}

#[derive(Debug, Default)]
pub struct SeenStore {
    path: PathBuf,
    entries: BTreeMap<String, SeenEntry>,
}

impl SeenStore {
    /// An absent file is an empty store. Malformed content degrades to an
    /// empty set with a warning (re-notifying beats crashing); an existing
    /// file we cannot read is fatal.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    path,
                    entries: BTreeMap::new(),
                });
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading seen store {}", path.display()));
            }
        };
        let entries = match serde_json::from_str::<SeenFile>(&raw) {
            Ok(SeenFile::Map(map)) => map,
            Ok(SeenFile::Legacy(ids)) => {
                tracing::warn!(
                    count = ids.len(),
                    "migrating legacy seen store (id array) to map form"
                );
                let now = Utc::now();
                ids.into_iter()
                    .map(|id| (id, SeenEntry::bare(now)))
                    .collect()
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    path = %path.display(),
                    "seen store is malformed, starting from an empty set"
                );
                BTreeMap::new()
            }
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&SeenEntry> {
        self.entries.get(id)
    }

    /// Record a freshly notified listing.
    pub fn record(&mut self, record: &ListingRecord, now: DateTime<Utc>) {
        self.entries.insert(
            record.id.clone(),
            SeenEntry {
                first_seen: now,
                last_seen: Some(now),
                address: record.address.clone(),
                price: record.price,
                neighborhood: record.neighborhood_raw.clone(),
                price_history: Vec::new(),
            },
        );
    }

    /// Refresh an entry on re-sighting. A moved price is appended to the
    /// history but never re-notified: identity excludes price.
    pub fn touch(&mut self, record: &ListingRecord, now: DateTime<Utc>) {
        let Some(entry) = self.entries.get_mut(&record.id) else {
            return;
        };
        entry.last_seen = Some(now);
        if entry.price != 0 && entry.price != record.price {
            tracing::info!(
                address = %record.address,
                old = entry.price,
                new = record.price,
                "price change on tracked listing"
            );
            entry.price_history.push(PricePoint {
                price: record.price,
                at: now,
            });
        }
        entry.price = record.price;
        if entry.address.is_empty() {
            // Backfill for entries migrated from the legacy id-array format.
            entry.address = record.address.clone();
            entry.neighborhood = record.neighborhood_raw.clone();
        }
    }

    /// Write-to-temp-then-rename in the store's own directory, so a process
    /// killed mid-persist never leaves a torn file behind.
    pub fn persist(&self) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
        let mut tmp = NamedTempFile::new_in(parent).context("creating temp seen store")?;
        let json = serde_json::to_string_pretty(&self.entries).context("serializing seen store")?;
        tmp.write_all(json.as_bytes())
            .context("writing temp seen store")?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}
