use crate::config::FetchConfig;
use crate::types::{Error, NewsItem, Result};
use chrono::{Duration, Utc};
use feed_rs::parser;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

/// Content containers tried in priority order before falling back to the
/// full page text.
const CONTENT_SELECTORS: [&str; 5] = [
    "article",
    ".article-body",
    "#article-body",
    ".story-body",
    ".content-body",
];

const BOILERPLATE_SELECTORS: [&str; 7] =
    ["script", "style", "noscript", "iframe", "nav", "footer", "header"];

/// Fetches one external feed and extracts fresh entries as plain-text items.
///
/// A failure anywhere for a single source yields an empty result for that
/// source, never an error for the caller.
pub struct FeedFetcher {
    client: Client,
    config: FetchConfig,
}

impl FeedFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(StdDuration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Fetch and extract one feed. Absorbs all failures.
    pub async fn fetch(&self, url: &str) -> Vec<NewsItem> {
        match self.fetch_inner(url).await {
            Ok(items) => {
                debug!("Fetched {} fresh items from {}", items.len(), url);
                items
            }
            Err(e) => {
                warn!("Dropping source {}: {}", url, e);
                Vec::new()
            }
        }
    }

    async fn fetch_inner(&self, url: &str) -> Result<Vec<NewsItem>> {
        let feed_url = url::Url::parse(url)?;
        let response = self.client.get(feed_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::General(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let content = response.text().await?;
        let feed = parser::parse(content.as_bytes())
            .map_err(|e| Error::General(format!("failed to parse feed {}: {}", url, e)))?;

        let cutoff = Utc::now() - Duration::hours(self.config.freshness_window_hours);
        let mut items = Vec::new();

        for entry in feed.entries {
            let link = match entry.links.first() {
                Some(link) => link.href.clone(),
                None => continue,
            };
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .unwrap_or_else(|| "Untitled".to_string());

            // Entries without a parseable date default to "now" and therefore
            // always pass the freshness filter. Permissive on purpose.
            let published = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);

            if published < cutoff {
                continue;
            }

            let inline = entry
                .content
                .and_then(|c| c.body)
                .or(entry.summary.map(|s| s.content))
                .unwrap_or_default();
            let body = self.resolve_body(&link, strip_html(&inline)).await;

            items.push(NewsItem {
                title,
                link,
                body,
                published,
                source_feed: url.to_string(),
            });
        }

        Ok(items)
    }

    /// When the inline summary is too short, fetch the entry page and extract
    /// its article text. The inline text remains the fallback on any failure.
    async fn resolve_body(&self, link: &str, inline: String) -> String {
        if inline.len() >= self.config.min_summary_length {
            return inline;
        }

        match self.fetch_page_text(link).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => inline,
            Err(e) => {
                debug!("Full-page fetch failed for {}: {}", link, e);
                inline
            }
        }
    }

    async fn fetch_page_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::General(format!("HTTP {}", response.status())));
        }
        let html = response.text().await?;
        Ok(extract_article_text(&html))
    }
}

/// Extract the main article text from a page: boilerplate removed first, then
/// the prioritized content containers, then the whole page as a last resort.
pub fn extract_article_text(html: &str) -> String {
    let cleaned = remove_boilerplate(html);
    let document = Html::parse_document(&cleaned);

    for selector_str in CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(node) = document.select(&selector).next() {
                let text = collapse_whitespace(node.text());
                if !text.is_empty() {
                    return text;
                }
            }
        }
    }

    collapse_whitespace(document.root_element().text())
}

/// Strip markup down to whitespace-normalized plain text.
pub fn strip_html(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let cleaned = remove_boilerplate(html);
    let document = Html::parse_document(&cleaned);
    collapse_whitespace(document.root_element().text())
}

fn remove_boilerplate(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut result = html.to_string();

    for selector_str in BOILERPLATE_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            for element in document.select(&selector) {
                result = result.replace(&element.html(), "");
            }
        }
    }

    result
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
