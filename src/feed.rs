//! RSS rendering: a pure function from a cache snapshot to an RSS 2.0
//! channel. No I/O and no caching of the XML — the feed is rebuilt on
//! every request from whatever the cache currently holds.

use crate::cache::CacheEntry;
use chrono::{DateTime, Utc};
use rss::{Channel, ChannelBuilder, Guid, Item, ItemBuilder};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Feed-level metadata, taken from configuration.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub title: String,
    pub link: String,
    pub description: String,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            title: "Software Releases".to_string(),
            link: "http://localhost:4000/".to_string(),
            description: "Latest software releases".to_string(),
        }
    }
}

/// Render the snapshot into an RSS channel.
///
/// Products without a successful fetch are omitted rather than rendered as
/// empty items. Items are ordered by publish date descending; items with
/// no publish date sort after all dated ones, tie-broken by product name so
/// repeated renders of the same snapshot are deterministic. `now` supplies
/// the channel build date and the pubdate fallback for undated releases.
pub fn render(
    snapshot: &HashMap<String, CacheEntry>,
    options: &FeedOptions,
    now: DateTime<Utc>,
) -> Channel {
    let mut releases: Vec<_> = snapshot
        .values()
        .filter_map(|entry| entry.latest_release.as_ref())
        .collect();

    releases.sort_by(|a, b| match (&a.published_at, &b.published_at) {
        (Some(a_time), Some(b_time)) => b_time
            .cmp(a_time)
            .then_with(|| a.product_name.cmp(&b.product_name)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.product_name.cmp(&b.product_name),
    });

    let items: Vec<Item> = releases
        .into_iter()
        .map(|release| {
            ItemBuilder::default()
                .title(Some(release.title.clone()))
                .link(Some(release.url.clone()))
                .description(Some(release.summary.clone()))
                .guid(Some(Guid {
                    value: format!("{}-{}", release.product_name, release.version),
                    permalink: false,
                }))
                .pub_date(Some(release.published_at.unwrap_or(now).to_rfc2822()))
                .build()
        })
        .collect();

    ChannelBuilder::default()
        .title(options.title.clone())
        .link(options.link.clone())
        .description(options.description.clone())
        .language(Some("en".to_string()))
        .last_build_date(Some(now.to_rfc2822()))
        .items(items)
        .build()
}

// ============================================================================
// Tests
// ============================================================================
