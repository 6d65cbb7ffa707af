use crate::config::SchedulerConfig;
use crate::pipeline::ContentPipeline;
use crate::store::Store;
use crate::types::{Error, Result, Task, TaskKind, TaskParams};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A task-kind-specific executor. The scheduler owns the status machine;
/// handlers only produce a result payload or an error.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> TaskKind;

    async fn run(&self, task: &Task) -> Result<serde_json::Value>;
}

/// Runs the content pipeline for the unit named in the task parameters.
pub struct ContentGenerationHandler {
    store: Arc<dyn Store>,
    pipeline: Arc<ContentPipeline>,
}

impl ContentGenerationHandler {
    pub fn new(store: Arc<dyn Store>, pipeline: Arc<ContentPipeline>) -> Self {
        Self { store, pipeline }
    }
}

#[async_trait]
impl TaskHandler for ContentGenerationHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::ContentGeneration
    }

    async fn run(&self, task: &Task) -> Result<serde_json::Value> {
        let unit_id = match task.params {
            TaskParams::ContentGeneration { unit_id } => unit_id,
            _ => {
                return Err(Error::General(format!(
                    "task {} carries parameters for a different kind",
                    task.id
                )))
            }
        };

        let unit = self.store.get_unit(unit_id).await?;
        if !unit.is_active {
            info!("Unit '{}' is inactive, skipping generation", unit.name);
            return Ok(serde_json::json!({ "skipped": "unit_inactive" }));
        }

        let article = self.pipeline.execute(&unit, Some(task.id)).await?;
        Ok(serde_json::json!({
            "article_id": article.id,
            "slug": article.slug,
        }))
    }
}

/// Deletes terminal tasks older than the configured retention window.
pub struct MaintenanceHandler {
    store: Arc<dyn Store>,
}

impl MaintenanceHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskHandler for MaintenanceHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Maintenance
    }

    async fn run(&self, task: &Task) -> Result<serde_json::Value> {
        let retention_days = match task.params {
            TaskParams::Maintenance { retention_days } => retention_days,
            _ => {
                return Err(Error::General(format!(
                    "task {} carries parameters for a different kind",
                    task.id
                )))
            }
        };

        let cutoff = Utc::now() - ChronoDuration::days(retention_days as i64);
        let pruned = self.store.prune_tasks(cutoff).await?;
        info!("Pruned {} terminal tasks older than {} days", pruned, retention_days);
        Ok(serde_json::json!({ "pruned": pruned }))
    }
}

/// Polls for due tasks, claims them, and drives each through its handler.
///
/// Exactly-once dispatch rests on the store's conditional claim: a task leaves
/// Pending only once, so concurrent pollers cannot both execute it.
pub struct TaskScheduler {
    store: Arc<dyn Store>,
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
    config: SchedulerConfig,
    is_running: Arc<RwLock<bool>>,
}

impl TaskScheduler {
    pub fn new(store: Arc<dyn Store>, config: SchedulerConfig) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            config,
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Create a pending task. A cron expression is validated up front and the
    /// first occurrence becomes `scheduled_at`; otherwise `run_at` (or None
    /// for "next poll") is used directly.
    pub async fn schedule(
        &self,
        name: &str,
        params: TaskParams,
        cron_expression: Option<&str>,
        run_at: Option<DateTime<Utc>>,
        created_by: Option<Uuid>,
    ) -> Result<Task> {
        let scheduled_at = match cron_expression {
            Some(expr) => Some(next_occurrence(expr, Utc::now())?),
            None => run_at,
        };

        let task = Task::new(
            name.to_string(),
            params,
            scheduled_at,
            cron_expression.map(|s| s.to_string()),
            created_by,
        );
        self.store.insert_task(&task).await?;

        info!(
            "Scheduled {} task '{}' ({}), first run {:?}",
            task.kind, task.name, task.id, task.scheduled_at
        );
        Ok(task)
    }

    /// One poll cycle: fetch due tasks and dispatch them with bounded
    /// concurrency. Claim losses are silently skipped.
    pub async fn poll_pending(&self, now: DateTime<Utc>) -> Result<()> {
        let due = self.store.due_tasks(now).await?;
        if due.is_empty() {
            return Ok(());
        }
        info!("Dispatching {} due task(s)", due.len());

        stream::iter(due)
            .for_each_concurrent(self.config.worker_limit, |task| async move {
                match self.store.claim_task(task.id, Utc::now()).await {
                    Ok(true) => self.dispatch(&task).await,
                    Ok(false) => {}
                    Err(e) => error!("Failed to claim task {}: {}", task.id, e),
                }
            })
            .await;

        Ok(())
    }

    /// Run one claimed task to a terminal state, then respawn it if recurring.
    async fn dispatch(&self, task: &Task) {
        let outcome = match self.handlers.get(&task.kind) {
            Some(handler) => handler.run(task).await,
            None => Err(Error::General(format!(
                "no handler registered for kind {}",
                task.kind
            ))),
        };

        let finished_at = Utc::now();
        let store_result = match &outcome {
            Ok(result) => {
                info!("Task '{}' ({}) completed", task.name, task.id);
                self.store
                    .complete_task(task.id, result.clone(), finished_at)
                    .await
            }
            Err(e) => {
                warn!("Task '{}' ({}) failed: {}", task.name, task.id, e);
                self.store
                    .fail_task(task.id, &e.to_string(), finished_at)
                    .await
            }
        };
        if let Err(e) = store_result {
            error!("Failed to record outcome of task {}: {}", task.id, e);
        }

        // A recurring task respawns whether this run succeeded or not; one
        // bad cycle must not silence the schedule.
        if task.is_recurring {
            if let Some(expr) = &task.cron_expression {
                if let Err(e) = self.respawn(task, expr, finished_at).await {
                    error!("Failed to respawn recurring task '{}': {}", task.name, e);
                }
            }
        }
    }

    async fn respawn(&self, task: &Task, expr: &str, after: DateTime<Utc>) -> Result<()> {
        let next = next_occurrence(expr, after)?;
        let successor = Task::new(
            task.name.clone(),
            task.params.clone(),
            Some(next),
            task.cron_expression.clone(),
            task.created_by,
        );
        self.store.insert_task(&successor).await?;
        info!(
            "Recurring task '{}' rescheduled as {} for {}",
            task.name, successor.id, next
        );
        Ok(())
    }

    /// Poll loop. Returns immediately if already running; otherwise blocks
    /// until `stop` is observed at the top of a cycle.
    pub async fn run(&self) -> Result<()> {
        {
            let mut is_running = self.is_running.write().await;
            if *is_running {
                return Ok(());
            }
            *is_running = true;
        }
        info!(
            "Scheduler started (poll interval {:?}, worker limit {})",
            self.config.poll_interval, self.config.worker_limit
        );

        while *self.is_running.read().await {
            match self.poll_pending(Utc::now()).await {
                Ok(()) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    error!("Scheduler cycle failed: {}", e);
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        let mut is_running = self.is_running.write().await;
        *is_running = false;
    }
}

/// First occurrence of `expr` strictly after `after`. Expressions use the
/// seconds-first cron dialect (`0 0 9 * * *` is daily at 09:00:00 UTC).
pub fn next_occurrence(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = Schedule::from_str(expr)
        .map_err(|e| Error::InvalidSchedule(format!("{}: {}", expr, e)))?;

    schedule
        .after(&after)
        .next()
        .ok_or_else(|| Error::InvalidSchedule(format!("{}: no future occurrence", expr)))
}
