//! Upstream release fetching.
//!
//! One `fetch` call performs one bounded network exchange against the
//! product's source and normalizes the payload into a [`ReleaseRecord`].
//! There are no retries here and no cache access: failures are returned as
//! typed errors for the scheduler to record.

use crate::cache::ReleaseRecord;
use crate::product::{major_minor, ProductDescriptor, SourceKind};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use reqwest::{header, StatusCode};
use semver::Version;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors from a single fetch attempt.
///
/// Each error is contained within one product's refresh step; it is
/// recorded in that product's cache entry and surfaced via metrics, never
/// via HTTP error codes on the feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Upstream has no (matching) published releases.
    #[error("no releases found")]
    NotFound,
    /// Upstream refused the request due to rate limiting.
    #[error("rate limited by upstream")]
    RateLimited,
    /// Credentials missing or rejected.
    #[error("unauthorized (status {0})")]
    Unauthorized(u16),
    /// Connection, TLS, timeout, or unexpected upstream status.
    #[error("network failure: {0}")]
    NetworkFailure(String),
    /// Upstream responded but the payload could not be parsed.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Payload-free classification of a [`FetchError`], stored in cache entries
/// and used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    NotFound,
    RateLimited,
    Unauthorized,
    NetworkFailure,
    MalformedResponse,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::NotFound => FetchErrorKind::NotFound,
            FetchError::RateLimited => FetchErrorKind::RateLimited,
            FetchError::Unauthorized(_) => FetchErrorKind::Unauthorized,
            FetchError::NetworkFailure(_) => FetchErrorKind::NetworkFailure,
            FetchError::MalformedResponse(_) => FetchErrorKind::MalformedResponse,
        }
    }
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::NotFound => "not_found",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::Unauthorized => "unauthorized",
            FetchErrorKind::NetworkFailure => "network_failure",
            FetchErrorKind::MalformedResponse => "malformed_response",
        }
    }
}

pub const GITHUB_API: &str = "https://api.github.com";

/// Fetches the latest release for a product, dispatching on its
/// [`SourceKind`].
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    github_api: String,
    github_token: Option<String>,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            github_api: GITHUB_API.to_string(),
            github_token: None,
        }
    }

    /// Override the GitHub API base URL (GitHub Enterprise, tests).
    pub fn with_github_api(mut self, base: impl Into<String>) -> Self {
        self.github_api = base.into();
        self
    }

    pub fn with_github_token(mut self, token: Option<String>) -> Self {
        self.github_token = token;
        self
    }

    /// Fetch and normalize the latest release for one product.
    ///
    /// Performs a single request with the configured timeout. When a source
    /// yields several candidate releases, the branch series filter is
    /// applied first and the maximum by version ordering wins.
    pub async fn fetch(&self, product: &ProductDescriptor) -> Result<ReleaseRecord, FetchError> {
        match product.kind {
            SourceKind::GithubReleases => self.fetch_github(product).await,
            SourceKind::DockerHubTags => self.fetch_docker_tags(product).await,
            SourceKind::StaticListing => self.fetch_static_listing(product).await,
        }
    }

    async fn fetch_github(&self, product: &ProductDescriptor) -> Result<ReleaseRecord, FetchError> {
        let url = format!(
            "{}/repos/{}/releases?per_page=30",
            self.github_api.trim_end_matches('/'),
            product.locator
        );
        let mut request = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.github_token {
            request = request.bearer_auth(token);
        }

        let body = self.send(request).await?;
        let releases: Vec<GithubRelease> =
            serde_json::from_str(&body).map_err(|e| FetchError::MalformedResponse(e.to_string()))?;

        let candidates = releases
            .into_iter()
            .filter(|r| !r.draft && !r.prerelease)
            .map(|r| {
                let version = r
                    .tag_name
                    .trim_start_matches(['v', 'V'])
                    .to_string();
                Candidate {
                    semver: Version::parse(&version).ok(),
                    published_at: r
                        .published_at
                        .as_deref()
                        .and_then(parse_rfc3339),
                    url: r.html_url,
                    version,
                }
            })
            .collect();

        let candidate = select_latest(candidates, product.branch.as_deref())
            .ok_or(FetchError::NotFound)?;
        let source_url = format!("https://github.com/{}/releases", product.locator);
        Ok(build_record(product, candidate, &source_url))
    }

    async fn fetch_docker_tags(
        &self,
        product: &ProductDescriptor,
    ) -> Result<ReleaseRecord, FetchError> {
        let base = format!(
            "{}/v2/repositories/{}/tags",
            product.registry_base().trim_end_matches('/'),
            product.locator
        );
        let url = format!("{}?page_size=100", base);

        let body = self.send(self.client.get(&url)).await?;
        let page: DockerTagPage =
            serde_json::from_str(&body).map_err(|e| FetchError::MalformedResponse(e.to_string()))?;

        // Keep only plain x.y.z tags; skip "latest", channel aliases, and
        // pre-release tags.
        let candidates = page
            .results
            .into_iter()
            .filter_map(|tag| {
                let name = tag.name?;
                let semver = plain_version(&name)?;
                Some(Candidate {
                    semver: Some(semver),
                    published_at: tag.tag_last_pushed.as_deref().and_then(parse_rfc3339),
                    url: None,
                    version: name,
                })
            })
            .collect();

        let candidate = select_latest(candidates, product.branch.as_deref())
            .ok_or(FetchError::NotFound)?;
        Ok(build_record(product, candidate, &base))
    }

    async fn fetch_static_listing(
        &self,
        product: &ProductDescriptor,
    ) -> Result<ReleaseRecord, FetchError> {
        // channel/component presence is enforced by registry validation.
        let channel = product.channel.as_deref().unwrap_or_default();
        let component = product.component.as_deref().unwrap_or_default();
        let url = format!(
            "{}/win/static/{}/x86_64/",
            product.locator.trim_end_matches('/'),
            channel
        );

        let body = self.send(self.client.get(&url)).await?;

        let pattern = format!(
            r"{}-([0-9]+\.[0-9]+\.[0-9]+)\.zip\s+([0-9]{{4}}-[0-9]{{2}}-[0-9]{{2}})\s+([0-9]{{2}}:[0-9]{{2}}:[0-9]{{2}})",
            regex::escape(component)
        );
        let pattern =
            Regex::new(&pattern).map_err(|e| FetchError::MalformedResponse(e.to_string()))?;

        let candidates = pattern
            .captures_iter(&body)
            .map(|caps| {
                let version = caps[1].to_string();
                let published_at =
                    NaiveDateTime::parse_from_str(&format!("{} {}", &caps[2], &caps[3]), "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|dt| dt.and_utc());
                Candidate {
                    semver: Version::parse(&version).ok(),
                    published_at,
                    url: None,
                    version,
                }
            })
            .collect();

        let candidate = select_latest(candidates, product.branch.as_deref())
            .ok_or(FetchError::NotFound)?;
        Ok(build_record(product, candidate, &url))
    }

    /// Send one request with the configured timeout and return the response
    /// body. Status errors are mapped to the fetch taxonomy before the body
    /// is read.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, FetchError> {
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| {
                FetchError::NetworkFailure(format!(
                    "request timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| FetchError::NetworkFailure(e.to_string()))?;

        check_status(&response)?;

        tokio::time::timeout(self.timeout, response.text())
            .await
            .map_err(|_| {
                FetchError::NetworkFailure(format!(
                    "response body timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| FetchError::NetworkFailure(e.to_string()))
    }
}

fn check_status(response: &reqwest::Response) -> Result<(), FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::NOT_FOUND => Err(FetchError::NotFound),
        StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited),
        StatusCode::UNAUTHORIZED => Err(FetchError::Unauthorized(status.as_u16())),
        StatusCode::FORBIDDEN => {
            // GitHub reports an exhausted rate limit as 403 with
            // x-ratelimit-remaining: 0.
            let exhausted = response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                == Some("0");
            if exhausted {
                Err(FetchError::RateLimited)
            } else {
                Err(FetchError::Unauthorized(status.as_u16()))
            }
        }
        _ => Err(FetchError::NetworkFailure(format!(
            "upstream returned status {}",
            status
        ))),
    }
}

/// One normalized release candidate before the latest-version selection.
#[derive(Debug, Clone)]
struct Candidate {
    version: String,
    semver: Option<Version>,
    published_at: Option<DateTime<Utc>>,
    url: Option<String>,
}

/// Pick the latest candidate: branch series filter first, then the maximum
/// by semver among parseable versions. When no version parses, upstream
/// listing order is trusted (sources return newest first).
fn select_latest(mut candidates: Vec<Candidate>, branch: Option<&str>) -> Option<Candidate> {
    if let Some(branch) = branch {
        candidates.retain(|c| major_minor(&c.version) == branch);
    }

    let best = candidates
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.semver.as_ref().map(|v| (i, v.clone())))
        .max_by(|(ia, va), (ib, vb)| va.cmp(vb).then(ib.cmp(ia)));

    match best {
        Some((index, _)) => Some(candidates.swap_remove(index)),
        None if candidates.is_empty() => None,
        None => Some(candidates.remove(0)),
    }
}

/// Parse a tag as a bare `x.y.z` version; anything with a `v` prefix,
/// pre-release, or build suffix is rejected.
fn plain_version(raw: &str) -> Option<Version> {
    let version = Version::parse(raw).ok()?;
    (version.pre.is_empty() && version.build.is_empty()).then_some(version)
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn build_record(
    product: &ProductDescriptor,
    candidate: Candidate,
    source_url: &str,
) -> ReleaseRecord {
    let label = product.label();
    let url = product
        .release_notes_link(&candidate.version)
        .or(candidate.url)
        .unwrap_or_else(|| source_url.to_string());
    ReleaseRecord {
        product_name: product.name.clone(),
        title: format!("{} {}", label, candidate.version),
        summary: format!(
            r#"<a href="{}">Release notes for {} {}</a>"#,
            url, label, candidate.version
        ),
        url,
        published_at: candidate.published_at,
        version: candidate.version,
    }
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
}

#[derive(Debug, Deserialize)]
struct DockerTagPage {
    #[serde(default)]
    results: Vec<DockerTag>,
}

#[derive(Debug, Deserialize)]
struct DockerTag {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tag_last_pushed: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
