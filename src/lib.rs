pub mod aggregator;
pub mod config;
pub mod fetcher;
pub mod generate;
pub mod notify;
pub mod pipeline;
pub mod response;
pub mod scheduler;
pub mod slug;
pub mod store;
pub mod types;

pub use aggregator::{Aggregator, SourceAggregator};
pub use config::Config;
pub use fetcher::FeedFetcher;
pub use generate::{ImageGenerator, OpenAiImageGenerator, OpenAiTextGenerator, TextGenerator};
pub use notify::{LogSink, NotificationSink};
pub use pipeline::ContentPipeline;
pub use scheduler::{ContentGenerationHandler, MaintenanceHandler, TaskHandler, TaskScheduler};
pub use store::{MemoryStore, PostgresStore, Store};
pub use types::*;
