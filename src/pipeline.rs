use crate::aggregator::Aggregator;
use crate::config::GenerationConfig;
use crate::generate::{generate_with_retry, ImageGenerator, TextGenerator};
use crate::notify::NotificationSink;
use crate::response::{fallback_parse, parse_sections, ParsedResponse};
use crate::slug::{article_slug, unique_slug};
use crate::store::Store;
use crate::types::{Article, Error, GenerationUnit, NewsItem, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Formatting contract the response parser depends on. Changing the headers
/// here requires changing `response::SECTIONS` in lockstep.
const SYSTEM_MESSAGE: &str = "You are an expert journalist and news analyst. Your response MUST follow this exact format:\n\n\
=== Title ===\n\
<Write the headline here>\n\n\
=== Content ===\n\
<Write the main content here>\n\n\
=== Summary ===\n\
<Write a one-paragraph summary here>\n\n\
=== Image Prompt ===\n\
<Write the image generation prompt here>\n\n\
Rules:\n\
1. Include ALL four sections with exact headers as shown above\n\
2. Each section must be non-empty\n\
3. The Title must be clear and engaging\n\
4. The Content must use bullet points for clarity\n\
5. The Summary must be exactly one paragraph\n\
6. The Image Prompt must describe a specific image";

/// End-to-end content generation for one unit: aggregate sources, prompt the
/// model, parse, slug, illustrate, persist, announce.
pub struct ContentPipeline {
    store: Arc<dyn Store>,
    aggregator: Arc<dyn Aggregator>,
    text: Arc<dyn TextGenerator>,
    image: Arc<dyn ImageGenerator>,
    sink: Arc<dyn NotificationSink>,
    config: GenerationConfig,
}

impl ContentPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        aggregator: Arc<dyn Aggregator>,
        text: Arc<dyn TextGenerator>,
        image: Arc<dyn ImageGenerator>,
        sink: Arc<dyn NotificationSink>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            store,
            aggregator,
            text,
            image,
            sink,
            config,
        }
    }

    /// Run the pipeline once for `unit`. Any error short-circuits the run;
    /// only the image step is allowed to fail without aborting.
    pub async fn execute(&self, unit: &GenerationUnit, task_id: Option<Uuid>) -> Result<Article> {
        if unit.template.trim().is_empty() {
            return Err(Error::Config(format!(
                "generation unit {} has no template",
                unit.id
            )));
        }

        let items = self.aggregator.aggregate(&unit.sources).await;
        if items.is_empty() {
            return Err(Error::NoContent);
        }

        let now = Utc::now();
        let (context, used) = build_context(&items, self.config.max_context_length);
        let prompt = render_template(&unit.template, &context, &unit.instruction, now);
        info!(
            "Prepared context for unit '{}' from {}/{} documents ({} chars)",
            unit.name,
            used,
            items.len(),
            context.len()
        );

        let started = Instant::now();
        let generation = generate_with_retry(
            self.text.as_ref(),
            SYSTEM_MESSAGE,
            &prompt,
            self.config.max_tokens,
            &self.config,
        )
        .await?;
        let generation_ms = started.elapsed().as_millis() as u64;

        let (parsed, fell_back) = self.parse_response(&generation.text)?;

        let mut metadata = generation.metadata;
        if !metadata.is_object() {
            metadata = json!({});
        }
        if let Some(map) = metadata.as_object_mut() {
            map.insert("generation_ms".to_string(), generation_ms.into());
            map.insert("prompt_length".to_string(), prompt.len().into());
            map.insert("article_count".to_string(), items.len().into());
            if let Some(id) = task_id {
                map.insert("task_id".to_string(), json!(id));
            }
            if fell_back {
                map.insert("fallback_parsing".to_string(), true.into());
            }
        }

        let base = article_slug(&parsed.title, &unit.owner, now);
        let slug = unique_slug(self.store.as_ref(), &base).await?;

        // Image failure degrades the article instead of losing the text run.
        let image_url = if unit.generate_image {
            match self.image.generate(&parsed.image_prompt).await {
                Ok(image) => Some(image.url),
                Err(e) => {
                    warn!("Image generation failed for unit '{}': {}", unit.name, e);
                    if let Some(map) = metadata.as_object_mut() {
                        map.insert("image_error".to_string(), json!(e.to_string()));
                    }
                    None
                }
            }
        } else {
            None
        };

        let article = Article {
            id: Uuid::new_v4(),
            title: parsed.title,
            body: parsed.body,
            summary: parsed.summary,
            slug,
            source_links: items.iter().take(used).map(|i| i.link.clone()).collect(),
            image_url,
            metadata,
            published_at: now,
            unit_id: unit.id,
        };

        self.store.persist_article(&article, now).await?;
        info!("Persisted article '{}' as {}", article.title, article.slug);

        self.sink
            .publish(&article, unit.visibility, unit.created_by)
            .await;

        Ok(article)
    }

    fn parse_response(&self, text: &str) -> Result<(ParsedResponse, bool)> {
        match parse_sections(text) {
            Ok(parsed) => Ok((parsed, false)),
            Err(e @ Error::ResponseFormat { .. }) if self.config.allow_fallback_parse => {
                warn!("Model response malformed ({}), using fallback parse", e);
                Ok((fallback_parse(text), true))
            }
            Err(e) => Err(e),
        }
    }
}

/// Pack documents into the prompt context newest-first, stopping at the first
/// one that would push past `max_length`. Whole documents only, never a cut
/// mid-article. Returns the context and how many documents made it in.
fn build_context(items: &[NewsItem], max_length: usize) -> (String, usize) {
    let mut parts: Vec<String> = Vec::new();
    let mut length = 0;

    for item in items {
        let text = format_item(item);
        if length + text.len() > max_length {
            break;
        }
        length += text.len();
        parts.push(text);
    }

    (parts.join("\n\n"), parts.len())
}

fn format_item(item: &NewsItem) -> String {
    format!(
        "Title: {}\nSource: {}\nDate: {}\nContent: {}\n---",
        item.title, item.link, item.published, item.body
    )
}

/// Substitute the three supported placeholders. Unknown placeholders pass
/// through untouched.
fn render_template(
    template: &str,
    context: &str,
    instruction: &str,
    now: DateTime<Utc>,
) -> String {
    template
        .replace("{context}", context)
        .replace("{instruction}", instruction)
        .replace("{current_date}", &now.format("%Y-%m-%d %H:%M UTC").to_string())
}
