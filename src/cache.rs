//! In-memory release cache shared between the refresh scheduler (single
//! writer) and the HTTP handlers (many readers).
//!
//! A failed refresh must never clear or replace a previously cached
//! release: failures only update the error and fetch-time bookkeeping.

use crate::fetch::{FetchError, FetchErrorKind};
use crate::product::ProductRegistry;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Normalized release metadata from one successful fetch.
///
/// Immutable once constructed; a newer successful fetch for the same
/// product supersedes the whole record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub product_name: String,
    /// Upstream-defined version string; no particular format guaranteed.
    pub version: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Link to the release notes.
    pub url: String,
    /// Feed item title.
    pub title: String,
    /// Feed item description (may contain HTML).
    pub summary: String,
}

/// Per-product cache state.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    /// Release from the most recent successful fetch, if any.
    pub latest_release: Option<ReleaseRecord>,
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_error: Option<FetchErrorKind>,
}

/// Process-wide map from product name to its cache entry.
///
/// Entries are seeded empty for every registered product at startup and
/// live for the process lifetime; there is no eviction.
pub struct ReleaseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ReleaseCache {
    pub fn new(registry: &ProductRegistry) -> Self {
        let entries = registry
            .products()
            .iter()
            .map(|p| (p.name.clone(), CacheEntry::default()))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Consistent point-in-time copy of the whole cache.
    ///
    /// Readers never observe a partially applied entry: `apply_result`
    /// swaps each entry under the write lock.
    pub fn snapshot(&self) -> HashMap<String, CacheEntry> {
        self.entries.read().clone()
    }

    /// Record one fetch outcome. Called only by the refresh scheduler.
    ///
    /// Success replaces the cached release and clears the error; failure
    /// records the error kind but leaves `latest_release` and
    /// `last_success_time` untouched.
    pub fn apply_result(
        &self,
        name: &str,
        result: Result<ReleaseRecord, FetchError>,
        timestamp: DateTime<Utc>,
    ) {
        let mut entries = self.entries.write();
        let entry = entries.entry(name.to_string()).or_default();
        entry.last_fetch_time = Some(timestamp);
        match result {
            Ok(release) => {
                entry.latest_release = Some(release);
                entry.last_success_time = Some(timestamp);
                entry.last_error = None;
            }
            Err(error) => {
                entry.last_error = Some(error.kind());
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
