pub mod memory;
pub mod postgres;

use crate::types::{Article, GenerationUnit, Result, Task};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Persistence seam for tasks, generation units and articles.
///
/// The scheduler and pipeline only ever talk to this trait; the Postgres
/// implementation backs deployments, the in-memory one backs tests.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_task(&self, task: &Task) -> Result<()>;

    async fn get_task(&self, id: Uuid) -> Result<Task>;

    /// Pending tasks due at `now` (`scheduled_at` null or in the past),
    /// ordered oldest `scheduled_at` first with nulls first.
    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Compare-and-swap claim: Pending -> InProgress, setting `started_at` on
    /// the first claim. Returns false when the task was not Pending, which
    /// callers must treat as "someone else owns this row".
    async fn claim_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn complete_task(
        &self,
        id: Uuid,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn fail_task(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<()>;

    /// Cancel a Pending task. Returns false when the task had already left
    /// Pending; terminal states are final.
    async fn cancel_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Delete terminal tasks that completed before `cutoff`.
    async fn prune_tasks(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn insert_unit(&self, unit: &GenerationUnit) -> Result<()>;

    async fn get_unit(&self, id: Uuid) -> Result<GenerationUnit>;

    async fn slug_exists(&self, slug: &str) -> Result<bool>;

    /// Insert the article and advance its unit's `last_run_at` as one logical
    /// write. Implementations must make this atomic: a crash between the two
    /// must not leave an artifact without the advanced run timestamp.
    async fn persist_article(&self, article: &Article, run_at: DateTime<Utc>) -> Result<()>;

    async fn get_article(&self, id: Uuid) -> Result<Article>;
}
