//! Background refresh scheduler.
//!
//! A single spawned task owns the refresh loop, which makes it the sole
//! cache writer: passes can never overlap, and a tick that fires while a
//! pass is still running is skipped.

use crate::cache::ReleaseCache;
use crate::fetch::Fetcher;
use crate::metrics::AppMetrics;
use crate::product::{ProductDescriptor, ProductRegistry};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Everything a refresh pass needs, injected at startup.
#[derive(Clone)]
pub struct RefreshContext {
    pub registry: Arc<ProductRegistry>,
    pub cache: Arc<ReleaseCache>,
    pub fetcher: Arc<Fetcher>,
    pub metrics: Arc<AppMetrics>,
    /// 1 = strictly sequential in registry order (the default; upstream
    /// rate limits make unconstrained parallelism risky).
    pub max_concurrent_fetches: usize,
}

enum SchedulerMessage {
    Shutdown,
}

/// Handle for stopping the scheduler task.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerMessage>,
}

impl SchedulerHandle {
    /// Signal the scheduler to stop. A pass in progress is abandoned;
    /// results already written to the cache are kept.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(SchedulerMessage::Shutdown).await;
    }
}

/// Spawn the refresh loop: an immediate pass when `refresh_on_startup` is
/// set, then one pass per interval tick.
pub fn spawn_scheduler(
    ctx: RefreshContext,
    interval: Duration,
    refresh_on_startup: bool,
) -> SchedulerHandle {
    let (sender, mut receiver) = mpsc::channel(8);

    tokio::spawn(async move {
        if refresh_on_startup {
            tokio::select! {
                _ = run_refresh_pass(&ctx) => {}
                _ = receiver.recv() => {
                    tracing::info!("Refresh scheduler stopped during startup pass");
                    return;
                }
            }
        }

        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; the startup pass already covered it.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    tokio::select! {
                        _ = run_refresh_pass(&ctx) => {}
                        _ = receiver.recv() => {
                            tracing::info!("Refresh scheduler stopped, abandoning in-flight pass");
                            return;
                        }
                    }
                }
                _ = receiver.recv() => {
                    tracing::info!("Refresh scheduler stopped");
                    return;
                }
            }
        }
    });

    SchedulerHandle { sender }
}

/// One complete iteration over the registry.
///
/// A product's fetch failure never aborts the pass; the outcome is recorded
/// in that product's cache entry and the pass moves on.
pub async fn run_refresh_pass(ctx: &RefreshContext) {
    let products = ctx.registry.products();
    if products.is_empty() {
        tracing::debug!("No products registered, skipping refresh pass");
        return;
    }

    tracing::info!(products = products.len(), "Starting refresh pass");

    if ctx.max_concurrent_fetches <= 1 {
        for product in products {
            refresh_product(ctx, product).await;
        }
    } else {
        // `buffered` starts fetches in registry order and bounds how many
        // are in flight at once.
        let fetches: Vec<_> = products
            .iter()
            .map(|product| refresh_product(ctx, product))
            .collect();
        stream::iter(fetches)
            .buffered(ctx.max_concurrent_fetches)
            .collect::<Vec<()>>()
            .await;
    }

    tracing::info!("Refresh pass complete");
}

async fn refresh_product(ctx: &RefreshContext, product: &ProductDescriptor) {
    ctx.metrics.record_attempt(&product.name);

    let result = ctx.fetcher.fetch(product).await;
    match &result {
        Ok(release) => {
            tracing::info!(
                product = %product.name,
                version = %release.version,
                "Fetched latest release"
            );
            ctx.metrics.record_success(&product.name);
        }
        Err(error) => {
            tracing::warn!(
                product = %product.name,
                kind = error.kind().as_str(),
                error = %error,
                "Release fetch failed"
            );
            ctx.metrics.record_failure(&product.name, error.kind());
        }
    }

    ctx.cache.apply_result(&product.name, result, Utc::now());
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchErrorKind;
    use crate::product::SourceKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn product(name: &str, repo: &str) -> ProductDescriptor {
        ProductDescriptor {
            name: name.to_string(),
            display_name: None,
            kind: SourceKind::GithubReleases,
            locator: format!("example/{}", repo),
            registry: None,
            channel: None,
            component: None,
            branch: None,
            link_template: None,
        }
    }

    fn context(products: Vec<ProductDescriptor>, github_api: &str) -> RefreshContext {
        let registry = Arc::new(ProductRegistry::new(products).unwrap());
        RefreshContext {
            cache: Arc::new(ReleaseCache::new(&registry)),
            registry,
            fetcher: Arc::new(
                Fetcher::new(reqwest::Client::new(), Duration::from_secs(5))
                    .with_github_api(github_api),
            ),
            metrics: Arc::new(AppMetrics::new("test").unwrap()),
            max_concurrent_fetches: 1,
        }
    }

    fn release_body(version: &str) -> serde_json::Value {
        serde_json::json!([
            {"tag_name": version, "published_at": "2024-01-01T00:00:00Z"}
        ])
    }

    #[tokio::test]
    async fn test_partial_failure_pass_updates_other_products() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/example/one/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(release_body("1.0.0")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/example/two/releases"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/example/three/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(release_body("3.0.0")))
            .mount(&server)
            .await;

        let ctx = context(
            vec![
                product("one", "one"),
                product("two", "two"),
                product("three", "three"),
            ],
            &server.uri(),
        );
        run_refresh_pass(&ctx).await;

        let snapshot = ctx.cache.snapshot();
        assert_eq!(
            snapshot["one"].latest_release.as_ref().unwrap().version,
            "1.0.0"
        );
        assert!(snapshot["two"].latest_release.is_none());
        assert_eq!(
            snapshot["two"].last_error,
            Some(FetchErrorKind::NetworkFailure)
        );
        assert_eq!(
            snapshot["three"].latest_release.as_ref().unwrap().version,
            "3.0.0"
        );
    }

    #[tokio::test]
    async fn test_pass_records_metrics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/example/one/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(release_body("1.0.0")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/example/two/releases"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let ctx = context(
            vec![product("one", "one"), product("two", "two")],
            &server.uri(),
        );
        run_refresh_pass(&ctx).await;

        let output = ctx
            .metrics
            .render(&ctx.cache.snapshot(), Utc::now())
            .unwrap();
        assert!(output.contains("release_feed_fetch_attempts_total{product=\"one\"} 1"));
        assert!(output.contains("release_feed_fetch_successes_total{product=\"one\"} 1"));
        assert!(output
            .contains("release_feed_fetch_failures_total{kind=\"not_found\",product=\"two\"} 1"));
    }

    #[tokio::test]
    async fn test_passes_never_overlap() {
        // Each fetch takes ~200ms while the tick interval is 20ms. With a
        // single pass in flight at a time, only one request can have been
        // made by the time we stop ~100ms in.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(release_body("1.0.0"))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let ctx = context(vec![product("one", "one")], &server.uri());
        let handle = spawn_scheduler(ctx, Duration::from_millis(20), true);

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_in_flight_pass() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(release_body("1.0.0"))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let ctx = context(vec![product("one", "one")], &server.uri());
        let handle = spawn_scheduler(ctx.clone(), Duration::from_secs(3600), true);

        tokio::time::sleep(Duration::from_millis(50)).await;
        // Shutdown must not wait for the 30s upstream.
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("shutdown should return promptly");

        assert!(ctx.cache.snapshot()["one"].latest_release.is_none());
    }

    #[tokio::test]
    async fn test_no_startup_pass_when_disabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(release_body("1.0.0")))
            .mount(&server)
            .await;

        let ctx = context(vec![product("one", "one")], &server.uri());
        let handle = spawn_scheduler(ctx, Duration::from_secs(3600), false);

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        let requests = server.received_requests().await.unwrap();
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn test_bounded_parallel_pass_fetches_everything() {
        let server = MockServer::start().await;
        for repo in ["one", "two", "three", "four"] {
            Mock::given(method("GET"))
                .and(path(format!("/repos/example/{}/releases", repo)))
                .respond_with(ResponseTemplate::new(200).set_body_json(release_body("2.0.0")))
                .mount(&server)
                .await;
        }

        let mut ctx = context(
            vec![
                product("one", "one"),
                product("two", "two"),
                product("three", "three"),
                product("four", "four"),
            ],
            &server.uri(),
        );
        ctx.max_concurrent_fetches = 2;
        run_refresh_pass(&ctx).await;

        let snapshot = ctx.cache.snapshot();
        for name in ["one", "two", "three", "four"] {
            assert_eq!(
                snapshot[name].latest_release.as_ref().unwrap().version,
                "2.0.0",
                "product {} should be refreshed",
                name
            );
        }
    }
}
