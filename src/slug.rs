use crate::store::Store;
use crate::types::Result;
use chrono::{DateTime, Utc};

/// Lower-cased, hyphen-separated slug fragment. Punctuation is dropped,
/// whitespace and underscores become single hyphens.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut pending_separator = false;

    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_separator = true;
        }
    }

    slug
}

/// Base article slug: `owner/date/title`.
pub fn article_slug(title: &str, owner: &str, date: DateTime<Utc>) -> String {
    format!(
        "{}/{}/{}",
        slugify(owner),
        date.format("%Y-%m-%d"),
        slugify(title)
    )
}

/// Resolve the base slug to a globally unique one, appending `-1`, `-2`, ...
/// until no stored article claims it.
pub async fn unique_slug(store: &dyn Store, base: &str) -> Result<String> {
    if !store.slug_exists(base).await? {
        return Ok(base.to_string());
    }

    let mut counter = 1u32;
    loop {
        let candidate = format!("{}-{}", base, counter);
        if !store.slug_exists(&candidate).await? {
            return Ok(candidate);
        }
        counter += 1;
    }
}
