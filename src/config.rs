//! Configuration file parser.
//!
//! Unlike a desktop tool, a missing config file is fatal here: the product
//! registry lives in it, and the service must not start serving without
//! one. All scalar fields have defaults so a minimal file only needs its
//! `[[products]]` entries.

use crate::feed::FeedOptions;
use crate::product::ProductDescriptor;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    Missing(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. The custom Debug impl masks `github_token` to keep the
/// credential out of logs and error messages.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP bind address, e.g. "0.0.0.0:4000".
    pub listen_addr: String,

    /// Scheduler tick period in seconds.
    pub refresh_interval_seconds: u64,

    /// Per-fetch request timeout in seconds.
    pub fetch_timeout_seconds: u64,

    /// Run one refresh pass immediately at startup.
    pub refresh_on_startup: bool,

    /// Fetches in flight at once during a pass. 1 = sequential in registry
    /// order; raise with care, upstreams rate-limit aggressively.
    pub max_concurrent_fetches: usize,

    /// Optional GitHub bearer token for the releases API.
    pub github_token: Option<String>,

    /// GitHub API base URL (override for GitHub Enterprise).
    pub github_api: String,

    /// Feed-level metadata for the rendered channel.
    pub feed: FeedSection,

    /// The product registry.
    pub products: Vec<ProductDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSection {
    pub title: String,
    pub link: String,
    pub description: String,
}

impl Default for FeedSection {
    fn default() -> Self {
        let defaults = FeedOptions::default();
        Self {
            title: defaults.title,
            link: defaults.link,
            description: defaults.description,
        }
    }
}

impl From<FeedSection> for FeedOptions {
    fn from(section: FeedSection) -> Self {
        Self {
            title: section.title,
            link: section.link,
            description: section.description,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4000".to_string(),
            refresh_interval_seconds: 86_400,
            fetch_timeout_seconds: 5,
            refresh_on_startup: true,
            max_concurrent_fetches: 1,
            github_token: None,
            github_api: "https://api.github.com".to_string(),
            feed: FeedSection::default(),
            products: Vec::new(),
        }
    }
}

/// Mask github_token in Debug output to prevent credential leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("listen_addr", &self.listen_addr)
            .field("refresh_interval_seconds", &self.refresh_interval_seconds)
            .field("fetch_timeout_seconds", &self.fetch_timeout_seconds)
            .field("refresh_on_startup", &self.refresh_on_startup)
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .field(
                "github_token",
                &self.github_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("github_api", &self.github_api)
            .field("feed", &self.feed)
            .field("products", &self.products)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Err(ConfigError::Missing)` (fatal at startup)
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, logged as a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(path.display().to_string()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;

        // Parse as a raw table first to flag potential typos.
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "listen_addr",
                "refresh_interval_seconds",
                "fetch_timeout_seconds",
                "refresh_on_startup",
                "max_concurrent_fetches",
                "github_token",
                "github_api",
                "feed",
                "products",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            products = config.products.len(),
            refresh_interval_seconds = config.refresh_interval_seconds,
            "Loaded configuration"
        );
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
