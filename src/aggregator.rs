use crate::fetcher::FeedFetcher;
use crate::types::NewsItem;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Source-fetching seam for the content pipeline.
#[async_trait]
pub trait Aggregator: Send + Sync {
    /// Fetch all sources. A failed or empty source is only recorded in the
    /// log, never surfaced as an error.
    async fn aggregate(&self, urls: &[String]) -> Vec<NewsItem>;
}

/// Fans out over the sources of one generation unit, drops failures, and
/// returns a deduplicated, newest-first document set.
pub struct SourceAggregator {
    fetcher: Arc<FeedFetcher>,
    concurrency: usize,
}

impl SourceAggregator {
    pub fn new(fetcher: Arc<FeedFetcher>, concurrency: usize) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl Aggregator for SourceAggregator {
    async fn aggregate(&self, urls: &[String]) -> Vec<NewsItem> {
        let per_source: Vec<(String, Vec<NewsItem>)> = stream::iter(urls.to_vec())
            .map(|url| {
                let fetcher = self.fetcher.clone();
                async move {
                    let items = fetcher.fetch(&url).await;
                    (url, items)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let empty_sources: Vec<&str> = per_source
            .iter()
            .filter(|(_, items)| items.is_empty())
            .map(|(url, _)| url.as_str())
            .collect();
        if !empty_sources.is_empty() {
            warn!(
                "{}/{} sources yielded nothing: {:?}",
                empty_sources.len(),
                urls.len(),
                empty_sources
            );
        }

        let items: Vec<NewsItem> = per_source.into_iter().flat_map(|(_, items)| items).collect();
        let total = items.len();

        let mut deduped = dedupe_by_title(items);
        deduped.sort_by(|a, b| b.published.cmp(&a.published));

        info!(
            "Aggregated {} documents ({} before dedupe) from {} sources",
            deduped.len(),
            total,
            urls.len()
        );
        deduped
    }
}

/// Deduplicate by normalized title; a collision keeps the longer body.
pub fn dedupe_by_title(items: Vec<NewsItem>) -> Vec<NewsItem> {
    let mut by_key: HashMap<String, NewsItem> = HashMap::new();

    for item in items {
        let key = normalize_title(&item.title);
        match by_key.get(&key) {
            Some(existing) if existing.body.len() >= item.body.len() => {}
            _ => {
                by_key.insert(key, item);
            }
        }
    }

    by_key.into_values().collect()
}

/// Lower-cased, alphanumeric-only title key.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}
