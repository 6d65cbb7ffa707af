use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ContentGeneration,
    Maintenance,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ContentGeneration => "content_generation",
            TaskKind::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "content_generation" => Ok(TaskKind::ContentGeneration),
            "maintenance" => Ok(TaskKind::Maintenance),
            other => Err(Error::General(format!("unknown task kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again; recurrence spawns a new row.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(Error::General(format!("unknown task status: {}", other))),
        }
    }
}

/// Typed task parameters, one variant per task kind. Stored as tagged JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskParams {
    ContentGeneration { unit_id: Uuid },
    Maintenance { retention_days: u32 },
}

impl TaskParams {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskParams::ContentGeneration { .. } => TaskKind::ContentGeneration,
            TaskParams::Maintenance { .. } => TaskKind::Maintenance,
        }
    }
}

/// A schedulable unit of work with a kind-specific handler.
///
/// Status lifecycle: Pending -> InProgress -> {Completed, Failed}; Pending ->
/// Cancelled externally. `completed_at` is set exactly when the status turns
/// terminal, `started_at` at most once per execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub params: TaskParams,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Next eligible execution time; None means "due at the next poll".
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_recurring: bool,
    pub cron_expression: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        name: String,
        params: TaskParams,
        scheduled_at: Option<DateTime<Utc>>,
        cron_expression: Option<String>,
        created_by: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            kind: params.kind(),
            status: TaskStatus::Pending,
            params,
            result: None,
            error: None,
            scheduled_at,
            started_at: None,
            completed_at: None,
            is_recurring: cron_expression.is_some(),
            cron_expression,
            created_by,
            created_at: Utc::now(),
        }
    }
}

/// One extracted item from an external feed. Transient: lives only for the
/// duration of a pipeline run, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub link: String,
    pub body: String,
    pub published: DateTime<Utc>,
    pub source_feed: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(Error::General(format!("unknown visibility: {}", other))),
        }
    }
}

/// Durable configuration driving one content-generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationUnit {
    pub id: Uuid,
    pub name: String,
    /// Owner display name, used in slug construction.
    pub owner: String,
    pub created_by: Option<Uuid>,
    pub sources: Vec<String>,
    pub instruction: String,
    /// Template with `{context}`, `{instruction}` and `{current_date}` placeholders.
    pub template: String,
    pub generate_image: bool,
    pub visibility: Visibility,
    pub is_active: bool,
    /// Mutated exclusively by the pipeline on successful completion.
    pub last_run_at: Option<DateTime<Utc>>,
}

/// The durable output of one successful pipeline run. Immutable after
/// creation except for metadata enrichment from the image step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub summary: String,
    /// Globally unique, `owner/date/title` with numeric suffixes on collision.
    pub slug: String,
    pub source_links: Vec<String>,
    pub image_url: Option<String>,
    /// Documented keys: provider, total_tokens, generation_ms, task_id,
    /// article_count, prompt_length, fallback_parsing, image_error.
    pub metadata: serde_json::Value,
    pub published_at: DateTime<Utc>,
    pub unit_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing configuration: {0}")]
    Config(String),

    #[error("no recent content available from any source")]
    NoContent,

    #[error("generation failed: {message}")]
    Generation { message: String, transient: bool },

    #[error("malformed model response, missing section(s): {}", .missing.join(", "))]
    ResponseFormat { missing: Vec<String> },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("task not found: {id}")]
    TaskNotFound { id: Uuid },

    #[error("generation unit not found: {id}")]
    UnitNotFound { id: Uuid },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),
}

impl Error {
    /// Retry eligibility: only provider errors flagged transient are retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Generation { transient: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
