use async_trait::async_trait;
use chrono::Utc;
use newsmill::config::GenerationConfig;
use newsmill::generate::{GeneratedImage, Generation, ImageGenerator, TextGenerator};
use newsmill::notify::NotificationSink;
use newsmill::store::MemoryStore;
use newsmill::{
    Aggregator, Article, ContentPipeline, Error, GenerationUnit, NewsItem, Result, Store,
    Visibility,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

const WELL_FORMED: &str = "=== Title ===\nMarkets Rally on Rate Cut\n=== Content ===\n- Stocks rose sharply\n- Bond yields fell\n=== Summary ===\nEquities climbed after the central bank cut rates.\n=== Image Prompt ===\nA rising stock chart on a trading floor screen";

struct StaticAggregator {
    items: Vec<NewsItem>,
}

#[async_trait]
impl Aggregator for StaticAggregator {
    async fn aggregate(&self, _urls: &[String]) -> Vec<NewsItem> {
        self.items.clone()
    }
}

struct StaticText {
    reply: String,
    calls: AtomicU32,
}

impl StaticText {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TextGenerator for StaticText {
    async fn generate(&self, _: &str, _: &str, _: u32) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Generation {
            text: self.reply.clone(),
            metadata: json!({ "provider": "test", "total_tokens": 42 }),
        })
    }
}

struct StaticImage;

#[async_trait]
impl ImageGenerator for StaticImage {
    async fn generate(&self, _: &str) -> Result<GeneratedImage> {
        Ok(GeneratedImage {
            url: "https://images.example.com/generated.png".to_string(),
            metadata: json!({}),
        })
    }
}

struct FailingImage;

#[async_trait]
impl ImageGenerator for FailingImage {
    async fn generate(&self, _: &str) -> Result<GeneratedImage> {
        Err(Error::Generation {
            message: "image provider unavailable".to_string(),
            transient: false,
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<(String, Visibility)>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, article: &Article, scope: Visibility, _owner: Option<Uuid>) {
        self.published
            .lock()
            .await
            .push((article.slug.clone(), scope));
    }
}

fn news_item(title: &str) -> NewsItem {
    NewsItem {
        title: title.to_string(),
        link: format!("https://news.example.com/{}", title.replace(' ', "-")),
        body: "Central bank cut rates by 25 basis points this morning.".to_string(),
        published: Utc::now(),
        source_feed: "https://news.example.com/feed".to_string(),
    }
}

async fn seeded_unit(store: &MemoryStore, generate_image: bool) -> GenerationUnit {
    let unit = GenerationUnit {
        id: Uuid::new_v4(),
        name: "morning-markets".to_string(),
        owner: "Macro Watch".to_string(),
        created_by: Some(Uuid::new_v4()),
        sources: vec!["https://news.example.com/feed".to_string()],
        instruction: "Summarize overnight market moves".to_string(),
        template: "Date: {current_date}\nTask: {instruction}\n\nSources:\n{context}".to_string(),
        generate_image,
        visibility: Visibility::Public,
        is_active: true,
        last_run_at: None,
    };
    store.insert_unit(&unit).await.unwrap();
    unit
}

fn quick_config() -> GenerationConfig {
    GenerationConfig {
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        ..GenerationConfig::default()
    }
}

fn pipeline(
    store: Arc<MemoryStore>,
    items: Vec<NewsItem>,
    text: Arc<dyn TextGenerator>,
    image: Arc<dyn ImageGenerator>,
    sink: Arc<RecordingSink>,
    config: GenerationConfig,
) -> ContentPipeline {
    ContentPipeline::new(
        store,
        Arc::new(StaticAggregator { items }),
        text,
        image,
        sink,
        config,
    )
}

#[tokio::test]
async fn end_to_end_run_persists_one_article_and_publishes_once() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let store = Arc::new(MemoryStore::new());
    let unit = seeded_unit(&store, true).await;
    let sink = Arc::new(RecordingSink::default());
    let task_id = Uuid::new_v4();

    let pipeline = pipeline(
        store.clone(),
        vec![news_item("rate cut")],
        Arc::new(StaticText::new(WELL_FORMED)),
        Arc::new(StaticImage),
        sink.clone(),
        quick_config(),
    );

    let article = pipeline.execute(&unit, Some(task_id)).await.unwrap();

    assert_eq!(article.title, "Markets Rally on Rate Cut");
    assert_eq!(
        article.slug,
        format!(
            "macro-watch/{}/markets-rally-on-rate-cut",
            Utc::now().format("%Y-%m-%d")
        )
    );
    assert_eq!(
        article.image_url.as_deref(),
        Some("https://images.example.com/generated.png")
    );
    assert_eq!(article.source_links.len(), 1);
    assert_eq!(article.metadata["article_count"], 1);
    assert_eq!(article.metadata["task_id"], json!(task_id));
    assert!(article.metadata.get("fallback_parsing").is_none());

    // Persisted and last_run_at advanced together.
    let stored = store.get_article(article.id).await.unwrap();
    assert_eq!(stored.slug, article.slug);
    let unit_after = store.get_unit(unit.id).await.unwrap();
    assert!(unit_after.last_run_at.is_some());

    let published = sink.published.lock().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0], (article.slug.clone(), Visibility::Public));
}

#[tokio::test]
async fn empty_sources_yield_no_content_and_no_side_effects() {
    let store = Arc::new(MemoryStore::new());
    let unit = seeded_unit(&store, false).await;
    let sink = Arc::new(RecordingSink::default());
    let text = Arc::new(StaticText::new(WELL_FORMED));

    let pipeline = pipeline(
        store.clone(),
        vec![],
        text.clone(),
        Arc::new(StaticImage),
        sink.clone(),
        quick_config(),
    );

    let err = pipeline.execute(&unit, None).await.unwrap_err();

    assert!(matches!(err, Error::NoContent));
    assert_eq!(text.calls.load(Ordering::SeqCst), 0);
    assert!(sink.published.lock().await.is_empty());
    let unit_after = store.get_unit(unit.id).await.unwrap();
    assert!(unit_after.last_run_at.is_none());
}

#[tokio::test]
async fn missing_template_fails_before_any_generation() {
    let store = Arc::new(MemoryStore::new());
    let mut unit = seeded_unit(&store, false).await;
    unit.template = "   ".to_string();
    let text = Arc::new(StaticText::new(WELL_FORMED));

    let pipeline = pipeline(
        store.clone(),
        vec![news_item("rate cut")],
        text.clone(),
        Arc::new(StaticImage),
        Arc::new(RecordingSink::default()),
        quick_config(),
    );

    let err = pipeline.execute(&unit, None).await.unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert_eq!(text.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn same_title_same_day_gets_a_numeric_slug_suffix() {
    let store = Arc::new(MemoryStore::new());
    let unit = seeded_unit(&store, false).await;
    let sink = Arc::new(RecordingSink::default());

    let pipeline = pipeline(
        store.clone(),
        vec![news_item("rate cut")],
        Arc::new(StaticText::new(WELL_FORMED)),
        Arc::new(StaticImage),
        sink,
        quick_config(),
    );

    let first = pipeline.execute(&unit, None).await.unwrap();
    let second = pipeline.execute(&unit, None).await.unwrap();

    assert_eq!(second.slug, format!("{}-1", first.slug));
}

#[tokio::test]
async fn image_failure_degrades_the_article_instead_of_failing_the_run() {
    let store = Arc::new(MemoryStore::new());
    let unit = seeded_unit(&store, true).await;

    let pipeline = pipeline(
        store.clone(),
        vec![news_item("rate cut")],
        Arc::new(StaticText::new(WELL_FORMED)),
        Arc::new(FailingImage),
        Arc::new(RecordingSink::default()),
        quick_config(),
    );

    let article = pipeline.execute(&unit, None).await.unwrap();

    assert!(article.image_url.is_none());
    assert!(article.metadata["image_error"]
        .as_str()
        .unwrap()
        .contains("image provider unavailable"));
    assert!(store.get_article(article.id).await.is_ok());
}

#[tokio::test]
async fn malformed_response_is_terminal_without_fallback() {
    let store = Arc::new(MemoryStore::new());
    let unit = seeded_unit(&store, false).await;

    let pipeline = pipeline(
        store.clone(),
        vec![news_item("rate cut")],
        Arc::new(StaticText::new("just some prose, no section markers")),
        Arc::new(StaticImage),
        Arc::new(RecordingSink::default()),
        quick_config(),
    );

    let err = pipeline.execute(&unit, None).await.unwrap_err();
    assert!(matches!(err, Error::ResponseFormat { .. }));
}

#[tokio::test]
async fn fallback_parse_salvages_malformed_output_when_enabled() {
    let store = Arc::new(MemoryStore::new());
    let unit = seeded_unit(&store, false).await;
    let config = GenerationConfig {
        allow_fallback_parse: true,
        ..quick_config()
    };

    let pipeline = pipeline(
        store.clone(),
        vec![news_item("rate cut")],
        Arc::new(StaticText::new(
            "Markets Rally on Rate Cut\nStocks rose sharply across the board today.",
        )),
        Arc::new(StaticImage),
        Arc::new(RecordingSink::default()),
        config,
    );

    let article = pipeline.execute(&unit, None).await.unwrap();

    assert_eq!(article.title, "Markets Rally on Rate Cut");
    assert_eq!(article.metadata["fallback_parsing"], json!(true));
}
