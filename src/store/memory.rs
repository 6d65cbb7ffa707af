use super::Store;
use crate::types::{Article, Error, GenerationUnit, Result, Task, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory store. Backs the test suite and ad hoc local runs; mirrors the
/// Postgres implementation's claim semantics under a single write lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<Uuid, Task>,
    units: HashMap<Uuid, GenerationUnit>,
    articles: HashMap<Uuid, Article>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_task(&self, task: &Task) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Task> {
        let inner = self.inner.read().await;
        inner
            .tasks
            .get(&id)
            .cloned()
            .ok_or(Error::TaskNotFound { id })
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let inner = self.inner.read().await;
        let mut due: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.scheduled_at.map(|at| at <= now).unwrap_or(true))
            .cloned()
            .collect();

        // Oldest first, never-scheduled ("due now") rows ahead of everything.
        due.sort_by(|a, b| match (a.scheduled_at, b.scheduled_at) {
            (None, None) => a.created_at.cmp(&b.created_at),
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y),
        });
        Ok(due)
    }

    async fn claim_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let task = inner.tasks.get_mut(&id).ok_or(Error::TaskNotFound { id })?;
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }
        task.status = TaskStatus::InProgress;
        if task.started_at.is_none() {
            task.started_at = Some(now);
        }
        Ok(true)
    }

    async fn complete_task(
        &self,
        id: Uuid,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let task = inner.tasks.get_mut(&id).ok_or(Error::TaskNotFound { id })?;
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.completed_at = Some(now);
        Ok(())
    }

    async fn fail_task(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let task = inner.tasks.get_mut(&id).ok_or(Error::TaskNotFound { id })?;
        task.status = TaskStatus::Failed;
        task.error = Some(error.to_string());
        task.completed_at = Some(now);
        Ok(())
    }

    async fn cancel_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let task = inner.tasks.get_mut(&id).ok_or(Error::TaskNotFound { id })?;
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(now);
        Ok(true)
    }

    async fn prune_tasks(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.tasks.len();
        inner.tasks.retain(|_, t| {
            !(t.status.is_terminal() && t.completed_at.map(|at| at < cutoff).unwrap_or(false))
        });
        Ok((before - inner.tasks.len()) as u64)
    }

    async fn insert_unit(&self, unit: &GenerationUnit) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.units.insert(unit.id, unit.clone());
        Ok(())
    }

    async fn get_unit(&self, id: Uuid) -> Result<GenerationUnit> {
        let inner = self.inner.read().await;
        inner
            .units
            .get(&id)
            .cloned()
            .ok_or(Error::UnitNotFound { id })
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.articles.values().any(|a| a.slug == slug))
    }

    async fn persist_article(&self, article: &Article, run_at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let unit = inner
            .units
            .get_mut(&article.unit_id)
            .ok_or(Error::UnitNotFound {
                id: article.unit_id,
            })?;
        unit.last_run_at = Some(run_at);
        inner.articles.insert(article.id, article.clone());
        Ok(())
    }

    async fn get_article(&self, id: Uuid) -> Result<Article> {
        let inner = self.inner.read().await;
        inner
            .articles
            .get(&id)
            .cloned()
            .ok_or(Error::General(format!("article not found: {}", id)))
    }
}
