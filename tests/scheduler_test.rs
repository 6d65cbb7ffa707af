use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use newsmill::config::{GenerationConfig, SchedulerConfig};
use newsmill::generate::{GeneratedImage, Generation, ImageGenerator, TextGenerator};
use newsmill::scheduler::next_occurrence;
use newsmill::store::MemoryStore;
use newsmill::{
    Aggregator, ContentGenerationHandler, ContentPipeline, Error, GenerationUnit, LogSink,
    NewsItem, Result, Store, TaskHandler, TaskKind, TaskParams, TaskScheduler, TaskStatus,
    Visibility,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

struct CountingHandler {
    calls: AtomicU32,
    fail_with: Option<String>,
}

impl CountingHandler {
    fn succeeding() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_with: None,
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_with: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl TaskHandler for CountingHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::ContentGeneration
    }

    async fn run(&self, _task: &newsmill::Task) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(message) => Err(Error::General(message.clone())),
            None => Ok(json!({ "ok": true })),
        }
    }
}

fn scheduler_with(
    store: Arc<MemoryStore>,
    handler: Arc<dyn TaskHandler>,
) -> TaskScheduler {
    let mut scheduler = TaskScheduler::new(store, SchedulerConfig::default());
    scheduler.register(handler);
    scheduler
}

fn generation_params() -> TaskParams {
    TaskParams::ContentGeneration {
        unit_id: Uuid::new_v4(),
    }
}

#[tokio::test]
async fn due_task_runs_to_completed_with_result_and_timestamps() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(CountingHandler::succeeding());
    let scheduler = scheduler_with(store.clone(), handler.clone());

    let task = scheduler
        .schedule("morning-run", generation_params(), None, None, None)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.completed_at.is_none());

    scheduler.poll_pending(Utc::now()).await.unwrap();

    let after = store.get_task(task.id).await.unwrap();
    assert_eq!(after.status, TaskStatus::Completed);
    assert_eq!(after.result, Some(json!({ "ok": true })));
    assert!(after.started_at.is_some());
    assert!(after.completed_at.is_some());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handler_failure_is_recorded_verbatim() {
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(CountingHandler::failing("provider returned 401"));
    let scheduler = scheduler_with(store.clone(), handler);

    let task = scheduler
        .schedule("doomed-run", generation_params(), None, None, None)
        .await
        .unwrap();
    scheduler.poll_pending(Utc::now()).await.unwrap();

    let after = store.get_task(task.id).await.unwrap();
    assert_eq!(after.status, TaskStatus::Failed);
    assert_eq!(after.error.as_deref(), Some("provider returned 401"));
    assert!(after.completed_at.is_some());
}

#[tokio::test]
async fn future_tasks_are_left_alone() {
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(CountingHandler::succeeding());
    let scheduler = scheduler_with(store.clone(), handler.clone());

    let task = scheduler
        .schedule(
            "tomorrow",
            generation_params(),
            None,
            Some(Utc::now() + ChronoDuration::hours(24)),
            None,
        )
        .await
        .unwrap();
    scheduler.poll_pending(Utc::now()).await.unwrap();

    let after = store.get_task(task.id).await.unwrap();
    assert_eq!(after.status, TaskStatus::Pending);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_tasks_are_never_dispatched() {
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(CountingHandler::succeeding());
    let scheduler = scheduler_with(store.clone(), handler.clone());

    let task = scheduler
        .schedule("cancelled-run", generation_params(), None, None, None)
        .await
        .unwrap();
    assert!(store.cancel_task(task.id, Utc::now()).await.unwrap());

    scheduler.poll_pending(Utc::now()).await.unwrap();

    let after = store.get_task(task.id).await.unwrap();
    assert_eq!(after.status, TaskStatus::Cancelled);
    assert!(after.completed_at.is_some());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn recurring_task_respawns_even_after_a_failed_run() {
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(CountingHandler::failing("transient outage"));
    let scheduler = scheduler_with(store.clone(), handler);

    let task = scheduler
        .schedule(
            "hourly-run",
            generation_params(),
            Some("0 0 * * * *"),
            None,
            None,
        )
        .await
        .unwrap();
    assert!(task.is_recurring);

    // Make the first occurrence due now.
    let far_future = task.scheduled_at.unwrap() + ChronoDuration::seconds(1);
    scheduler.poll_pending(far_future).await.unwrap();

    let original = store.get_task(task.id).await.unwrap();
    assert_eq!(original.status, TaskStatus::Failed);

    let successors = store.due_tasks(far_future + ChronoDuration::hours(2)).await.unwrap();
    assert_eq!(successors.len(), 1);
    let successor = &successors[0];
    assert_ne!(successor.id, task.id);
    assert_eq!(successor.name, task.name);
    assert_eq!(successor.status, TaskStatus::Pending);
    assert!(successor.scheduled_at.unwrap() > original.completed_at.unwrap());
}

#[tokio::test]
async fn invalid_cron_expressions_are_rejected_at_schedule_time() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler_with(store, Arc::new(CountingHandler::succeeding()));

    let err = scheduler
        .schedule("bad-cron", generation_params(), Some("every tuesday"), None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidSchedule(_)));
}

#[tokio::test]
async fn cron_schedule_sets_the_first_occurrence() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler_with(store, Arc::new(CountingHandler::succeeding()));

    let before = Utc::now();
    let task = scheduler
        .schedule(
            "daily-run",
            generation_params(),
            Some("0 0 9 * * *"),
            None,
            None,
        )
        .await
        .unwrap();

    let first = task.scheduled_at.unwrap();
    assert!(first > before);
    assert_eq!(first, next_occurrence("0 0 9 * * *", before).unwrap());
}

#[tokio::test]
async fn stop_flag_halts_the_run_loop() {
    let store = Arc::new(MemoryStore::new());
    let config = SchedulerConfig {
        poll_interval: std::time::Duration::from_millis(10),
        error_backoff: std::time::Duration::from_millis(10),
        worker_limit: 2,
    };
    let mut scheduler = TaskScheduler::new(store, config);
    scheduler.register(Arc::new(CountingHandler::succeeding()));
    let scheduler = Arc::new(scheduler);

    let handle = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    scheduler.stop().await;

    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("run loop did not observe the stop flag")
        .unwrap()
        .unwrap();
}

// Inactive units skip generation but still complete the task, so the
// recurring schedule keeps ticking while a unit is paused.

struct EmptyAggregator;

#[async_trait]
impl Aggregator for EmptyAggregator {
    async fn aggregate(&self, _urls: &[String]) -> Vec<NewsItem> {
        Vec::new()
    }
}

struct NeverCalledText;

#[async_trait]
impl TextGenerator for NeverCalledText {
    async fn generate(&self, _: &str, _: &str, _: u32) -> Result<Generation> {
        panic!("text generator must not run for an inactive unit");
    }
}

struct NeverCalledImage;

#[async_trait]
impl ImageGenerator for NeverCalledImage {
    async fn generate(&self, _: &str) -> Result<GeneratedImage> {
        panic!("image generator must not run for an inactive unit");
    }
}

#[tokio::test]
async fn inactive_units_complete_without_generating() {
    let store = Arc::new(MemoryStore::new());
    let unit = GenerationUnit {
        id: Uuid::new_v4(),
        name: "paused-unit".to_string(),
        owner: "Macro Watch".to_string(),
        created_by: None,
        sources: vec!["https://news.example.com/feed".to_string()],
        instruction: "Summarize".to_string(),
        template: "{context}".to_string(),
        generate_image: false,
        visibility: Visibility::Public,
        is_active: false,
        last_run_at: None,
    };
    store.insert_unit(&unit).await.unwrap();

    let pipeline = Arc::new(ContentPipeline::new(
        store.clone(),
        Arc::new(EmptyAggregator),
        Arc::new(NeverCalledText),
        Arc::new(NeverCalledImage),
        Arc::new(LogSink),
        GenerationConfig::default(),
    ));
    let handler = Arc::new(ContentGenerationHandler::new(store.clone(), pipeline));
    let scheduler = scheduler_with(store.clone(), handler);

    let task = scheduler
        .schedule(
            "paused-run",
            TaskParams::ContentGeneration { unit_id: unit.id },
            None,
            None,
            None,
        )
        .await
        .unwrap();
    scheduler.poll_pending(Utc::now()).await.unwrap();

    let after = store.get_task(task.id).await.unwrap();
    assert_eq!(after.status, TaskStatus::Completed);
    assert_eq!(after.result, Some(json!({ "skipped": "unit_inactive" })));
}
