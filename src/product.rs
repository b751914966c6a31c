//! Product registry: the static set of tracked products and their upstream
//! sources.
//!
//! The registry is built once at startup from configuration and never
//! mutated afterwards. Validation failures here are fatal — the service
//! must not start serving with a malformed registry.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Where a product publishes its releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// GitHub releases API for an `owner/repo` slug.
    GithubReleases,
    /// Docker registry v2 tag listing (`/v2/repositories/{repo}/tags`).
    DockerHubTags,
    /// A plain directory listing of versioned archives, scraped by pattern.
    StaticListing,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::GithubReleases => "github_releases",
            SourceKind::DockerHubTags => "docker_hub_tags",
            SourceKind::StaticListing => "static_listing",
        }
    }
}

/// One tracked product and the upstream source its releases come from.
///
/// Deserialized from `[[products]]` entries in the config file. Which of
/// the optional fields are required depends on `kind`; `ProductRegistry::new`
/// enforces that.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductDescriptor {
    /// Unique key for this product, also used as the metrics label.
    pub name: String,
    /// Human-readable name used in feed item titles. Falls back to `name`.
    #[serde(default)]
    pub display_name: Option<String>,
    pub kind: SourceKind,
    /// Source identifier: a repo slug for `github_releases` and
    /// `docker_hub_tags`, a base URL for `static_listing`.
    pub locator: String,
    /// Registry base URL for `docker_hub_tags` (default Docker Hub).
    #[serde(default)]
    pub registry: Option<String>,
    /// Release channel path segment for `static_listing` (e.g. "stable").
    #[serde(default)]
    pub channel: Option<String>,
    /// Archive name prefix for `static_listing` (e.g. "docker").
    #[serde(default)]
    pub component: Option<String>,
    /// Restrict results to a `major.minor` series (e.g. "3.1").
    #[serde(default)]
    pub branch: Option<String>,
    /// Release-notes URL template. `{version}` expands to the full version,
    /// `{major_minor}` to its first two components with dots kept, and
    /// `{version_dashed}` to the full version with dots replaced by dashes.
    #[serde(default)]
    pub link_template: Option<String>,
}

pub const DEFAULT_DOCKER_REGISTRY: &str = "https://hub.docker.com";

impl ProductDescriptor {
    /// Name shown in feed items.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Registry base for `docker_hub_tags` sources.
    pub fn registry_base(&self) -> &str {
        self.registry.as_deref().unwrap_or(DEFAULT_DOCKER_REGISTRY)
    }

    /// Expand `link_template` for a concrete version, if a template is set.
    pub fn release_notes_link(&self, version: &str) -> Option<String> {
        let template = self.link_template.as_deref()?;
        Some(
            template
                .replace("{version}", version)
                .replace("{major_minor}", &major_minor(version))
                .replace("{version_dashed}", &version.replace('.', "-")),
        )
    }
}

/// First two dot-separated components of a version string ("25.0.3" → "25.0").
/// Versions with fewer than two components are returned unchanged.
pub fn major_minor(version: &str) -> String {
    let mut parts = version.splitn(3, '.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("{}.{}", major, minor),
        _ => version.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Product with empty name in registry")]
    EmptyName,

    #[error("Duplicate product name: {0}")]
    DuplicateName(String),

    #[error("Product '{product}': missing required field '{field}' for {kind} source")]
    MissingField {
        product: String,
        field: &'static str,
        kind: &'static str,
    },

    #[error("Product '{product}': invalid locator '{locator}': {reason}")]
    InvalidLocator {
        product: String,
        locator: String,
        reason: String,
    },

    #[error("Product '{product}': branch '{branch}' is not a major.minor pair")]
    InvalidBranch { product: String, branch: String },
}

/// Validated, read-only list of tracked products.
#[derive(Debug, Clone)]
pub struct ProductRegistry {
    products: Vec<ProductDescriptor>,
}

impl ProductRegistry {
    /// Validate descriptors and build the registry.
    ///
    /// Enforces unique non-empty names, per-kind required fields, URL-shaped
    /// locators where a URL is expected, and well-formed branch filters.
    pub fn new(products: Vec<ProductDescriptor>) -> Result<Self, RegistryError> {
        let mut seen = std::collections::HashSet::new();
        for product in &products {
            if product.name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if !seen.insert(product.name.clone()) {
                return Err(RegistryError::DuplicateName(product.name.clone()));
            }
            validate_descriptor(product)?;
        }
        Ok(Self { products })
    }

    pub fn products(&self) -> &[ProductDescriptor] {
        &self.products
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

fn validate_descriptor(product: &ProductDescriptor) -> Result<(), RegistryError> {
    if product.locator.trim().is_empty() {
        return Err(RegistryError::InvalidLocator {
            product: product.name.clone(),
            locator: product.locator.clone(),
            reason: "locator is empty".into(),
        });
    }

    match product.kind {
        SourceKind::GithubReleases | SourceKind::DockerHubTags => {
            // Repo slugs look like "owner/repo".
            if !product.locator.contains('/') || product.locator.starts_with("http") {
                return Err(RegistryError::InvalidLocator {
                    product: product.name.clone(),
                    locator: product.locator.clone(),
                    reason: "expected an 'owner/repo' slug".into(),
                });
            }
            if let Some(registry) = &product.registry {
                check_url(&product.name, registry)?;
            }
        }
        SourceKind::StaticListing => {
            check_url(&product.name, &product.locator)?;
            for (field, value) in [("channel", &product.channel), ("component", &product.component)]
            {
                if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                    return Err(RegistryError::MissingField {
                        product: product.name.clone(),
                        field,
                        kind: SourceKind::StaticListing.as_str(),
                    });
                }
            }
        }
    }

    if let Some(branch) = &product.branch {
        let mut parts = branch.split('.');
        let valid = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(major), Some(minor), None)
                if major.parse::<u64>().is_ok() && minor.parse::<u64>().is_ok()
        );
        if !valid {
            return Err(RegistryError::InvalidBranch {
                product: product.name.clone(),
                branch: branch.clone(),
            });
        }
    }

    Ok(())
}

fn check_url(product: &str, value: &str) -> Result<(), RegistryError> {
    Url::parse(value).map_err(|e| RegistryError::InvalidLocator {
        product: product.to_string(),
        locator: value.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
