use clap::{Parser, Subcommand};
use newsmill::{
    Config, ContentGenerationHandler, ContentPipeline, FeedFetcher, LogSink, MaintenanceHandler,
    OpenAiImageGenerator, OpenAiTextGenerator, PostgresStore, SourceAggregator, Store,
    TaskParams, TaskScheduler,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "newsmill", about = "Scheduled news aggregation and content generation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop until interrupted
    Serve,
    /// Execute the content pipeline once for a unit, bypassing the scheduler
    RunOnce {
        /// Generation unit id
        unit_id: Uuid,
    },
    /// Create a content-generation task
    Schedule {
        /// Task name
        name: String,
        /// Generation unit to run
        #[arg(long)]
        unit: Uuid,
        /// Cron expression for recurring runs (seconds-first dialect)
        #[arg(long)]
        cron: Option<String>,
    },
    /// Create a recurring maintenance task that prunes old terminal tasks
    ScheduleMaintenance {
        /// Cron expression (seconds-first dialect)
        #[arg(long, default_value = "0 0 3 * * *")]
        cron: String,
        /// Terminal tasks older than this many days are deleted
        #[arg(long, default_value_t = 30)]
        retention_days: u32,
    },
    /// Probe the configured text provider
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let store: Arc<dyn Store> = Arc::new(PostgresStore::connect(&config.database_url).await?);

    match cli.command {
        Command::Serve => {
            let pipeline = Arc::new(build_pipeline(store.clone(), &config));
            let mut scheduler = TaskScheduler::new(store.clone(), config.scheduler.clone());
            scheduler.register(Arc::new(ContentGenerationHandler::new(
                store.clone(),
                pipeline,
            )));
            scheduler.register(Arc::new(MaintenanceHandler::new(store)));

            info!("Starting newsmill scheduler");
            scheduler.run().await?;
        }
        Command::RunOnce { unit_id } => {
            let pipeline = build_pipeline(store.clone(), &config);
            let unit = store.get_unit(unit_id).await?;
            let article = pipeline.execute(&unit, None).await?;
            println!("{} -> {}", article.title, article.slug);
        }
        Command::Schedule { name, unit, cron } => {
            let scheduler = TaskScheduler::new(store, config.scheduler.clone());
            let task = scheduler
                .schedule(
                    &name,
                    TaskParams::ContentGeneration { unit_id: unit },
                    cron.as_deref(),
                    None,
                    None,
                )
                .await?;
            println!("scheduled task {} ({:?})", task.id, task.scheduled_at);
        }
        Command::ScheduleMaintenance {
            cron,
            retention_days,
        } => {
            let scheduler = TaskScheduler::new(store, config.scheduler.clone());
            let task = scheduler
                .schedule(
                    "prune-old-tasks",
                    TaskParams::Maintenance { retention_days },
                    Some(&cron),
                    None,
                    None,
                )
                .await?;
            println!("scheduled task {} ({:?})", task.id, task.scheduled_at);
        }
        Command::Validate => {
            let text = OpenAiTextGenerator::new(config.text_provider.clone());
            newsmill::TextGenerator::validate(&text).await?;
            println!("text provider ok ({})", config.text_provider.model);
        }
    }

    Ok(())
}

fn build_pipeline(store: Arc<dyn Store>, config: &Config) -> ContentPipeline {
    let fetcher = Arc::new(FeedFetcher::new(config.fetch.clone()));
    let aggregator = Arc::new(SourceAggregator::new(fetcher, config.fetch.concurrency));
    let text = Arc::new(OpenAiTextGenerator::new(config.text_provider.clone()));
    let image = Arc::new(OpenAiImageGenerator::new(config.image_provider.clone()));

    ContentPipeline::new(
        store,
        aggregator,
        text,
        image,
        Arc::new(LogSink),
        config.generation.clone(),
    )
}
