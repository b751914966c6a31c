//! Prometheus metrics for the refresh loop and cache state.
//!
//! The registry is owned by `AppMetrics` and injected where needed rather
//! than registered globally, so tests can construct an isolated instance
//! per case. Counters are updated by the scheduler as it records fetch
//! outcomes; the cache-age gauge is derived from the snapshot at scrape
//! time.

use crate::cache::CacheEntry;
use crate::fetch::FetchErrorKind;
use chrono::{DateTime, Utc};
use prometheus::{GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;

pub struct AppMetrics {
    registry: Registry,
    fetch_attempts: IntCounterVec,
    fetch_successes: IntCounterVec,
    fetch_failures: IntCounterVec,
    last_success_age: GaugeVec,
}

impl AppMetrics {
    pub fn new(version: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let fetch_attempts = IntCounterVec::new(
            Opts::new(
                "release_feed_fetch_attempts_total",
                "Release fetch attempts per product",
            ),
            &["product"],
        )?;
        let fetch_successes = IntCounterVec::new(
            Opts::new(
                "release_feed_fetch_successes_total",
                "Successful release fetches per product",
            ),
            &["product"],
        )?;
        let fetch_failures = IntCounterVec::new(
            Opts::new(
                "release_feed_fetch_failures_total",
                "Failed release fetches per product and error kind",
            ),
            &["product", "kind"],
        )?;
        let last_success_age = GaugeVec::new(
            Opts::new(
                "release_feed_last_success_age_seconds",
                "Seconds since the last successful fetch per product",
            ),
            &["product"],
        )?;
        let build_info = IntGaugeVec::new(
            Opts::new("release_feed_build_info", "Application build information"),
            &["version"],
        )?;

        registry.register(Box::new(fetch_attempts.clone()))?;
        registry.register(Box::new(fetch_successes.clone()))?;
        registry.register(Box::new(fetch_failures.clone()))?;
        registry.register(Box::new(last_success_age.clone()))?;
        registry.register(Box::new(build_info.clone()))?;

        build_info.with_label_values(&[version]).set(1);

        Ok(Self {
            registry,
            fetch_attempts,
            fetch_successes,
            fetch_failures,
            last_success_age,
        })
    }

    pub fn record_attempt(&self, product: &str) {
        self.fetch_attempts.with_label_values(&[product]).inc();
    }

    pub fn record_success(&self, product: &str) {
        self.fetch_successes.with_label_values(&[product]).inc();
    }

    pub fn record_failure(&self, product: &str, kind: FetchErrorKind) {
        self.fetch_failures
            .with_label_values(&[product, kind.as_str()])
            .inc();
    }

    /// Refresh the cache-age gauges from the snapshot and encode the whole
    /// registry in Prometheus text exposition format.
    pub fn render(
        &self,
        snapshot: &HashMap<String, CacheEntry>,
        now: DateTime<Utc>,
    ) -> Result<String, prometheus::Error> {
        for (product, entry) in snapshot {
            if let Some(last_success) = entry.last_success_time {
                let age = (now - last_success).num_milliseconds() as f64 / 1000.0;
                self.last_success_age
                    .with_label_values(&[product.as_str()])
                    .set(age.max(0.0));
            }
        }

        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

// ============================================================================
// Tests
// ============================================================================
