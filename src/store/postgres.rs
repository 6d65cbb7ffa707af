use super::Store;
use crate::types::{Article, Error, GenerationUnit, Result, Task};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Pool, Postgres, Row};
use uuid::Uuid;

/// Postgres-backed store.
///
/// Schema is expected to be in place before startup (tasks, generation_units
/// and articles tables matching the columns below).
pub struct PostgresStore {
    db: Pool<Postgres>,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = PgPool::connect(database_url).await?;
        Ok(Self { db })
    }
}

fn task_from_row(row: &PgRow) -> Result<Task> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let params: serde_json::Value = row.try_get("params")?;

    Ok(Task {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: kind.parse()?,
        status: status.parse()?,
        params: serde_json::from_value(params)?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        scheduled_at: row.try_get("scheduled_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        is_recurring: row.try_get("is_recurring")?,
        cron_expression: row.try_get("cron_expression")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn unit_from_row(row: &PgRow) -> Result<GenerationUnit> {
    let visibility: String = row.try_get("visibility")?;

    Ok(GenerationUnit {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        owner: row.try_get("owner")?,
        created_by: row.try_get("created_by")?,
        sources: row.try_get("sources")?,
        instruction: row.try_get("instruction")?,
        template: row.try_get("template")?,
        generate_image: row.try_get("generate_image")?,
        visibility: visibility.parse()?,
        is_active: row.try_get("is_active")?,
        last_run_at: row.try_get("last_run_at")?,
    })
}

fn article_from_row(row: &PgRow) -> Result<Article> {
    Ok(Article {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        summary: row.try_get("summary")?,
        slug: row.try_get("slug")?,
        source_links: row.try_get("source_links")?,
        image_url: row.try_get("image_url")?,
        metadata: row.try_get("metadata")?,
        published_at: row.try_get("published_at")?,
        unit_id: row.try_get("unit_id")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn insert_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, name, kind, status, params, result, error,
                               scheduled_at, started_at, completed_at,
                               is_recurring, cron_expression, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(task.id)
        .bind(&task.name)
        .bind(task.kind.as_str())
        .bind(task.status.as_str())
        .bind(serde_json::to_value(&task.params)?)
        .bind(&task.result)
        .bind(&task.error)
        .bind(task.scheduled_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.is_recurring)
        .bind(&task.cron_expression)
        .bind(task.created_by)
        .bind(task.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Task> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => task_from_row(&row),
            None => Err(Error::TaskNotFound { id }),
        }
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM tasks
            WHERE status = 'pending'
              AND (scheduled_at IS NULL OR scheduled_at <= $1)
            ORDER BY scheduled_at ASC NULLS FIRST, created_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn claim_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        // Conditional update doubles as the claim: losing pollers see zero
        // affected rows instead of double-dispatching.
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'in_progress', started_at = COALESCE(started_at, $2)
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_task(
        &self,
        id: Uuid,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET status = 'completed', result = $2, completed_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(result)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn fail_task(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET status = 'failed', error = $2, completed_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn cancel_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET status = 'cancelled', completed_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn prune_tasks(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND completed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_unit(&self, unit: &GenerationUnit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO generation_units (id, name, owner, created_by, sources, instruction,
                                          template, generate_image, visibility, is_active, last_run_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(unit.id)
        .bind(&unit.name)
        .bind(&unit.owner)
        .bind(unit.created_by)
        .bind(&unit.sources)
        .bind(&unit.instruction)
        .bind(&unit.template)
        .bind(unit.generate_image)
        .bind(unit.visibility.as_str())
        .bind(unit.is_active)
        .bind(unit.last_run_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn get_unit(&self, id: Uuid) -> Result<GenerationUnit> {
        let row = sqlx::query("SELECT * FROM generation_units WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => unit_from_row(&row),
            None => Err(Error::UnitNotFound { id }),
        }
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE slug = $1")
            .bind(slug)
            .fetch_one(&self.db)
            .await?;

        Ok(count > 0)
    }

    async fn persist_article(&self, article: &Article, run_at: DateTime<Utc>) -> Result<()> {
        // Article insert and last_run_at advance commit or roll back together;
        // due-ness gating on last_run_at depends on it.
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO articles (id, title, body, summary, slug, source_links,
                                  image_url, metadata, published_at, unit_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(article.id)
        .bind(&article.title)
        .bind(&article.body)
        .bind(&article.summary)
        .bind(&article.slug)
        .bind(&article.source_links)
        .bind(&article.image_url)
        .bind(&article.metadata)
        .bind(article.published_at)
        .bind(article.unit_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE generation_units SET last_run_at = $2 WHERE id = $1")
            .bind(article.unit_id)
            .bind(run_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_article(&self, id: Uuid) -> Result<Article> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => article_from_row(&row),
            None => Err(Error::General(format!("article not found: {}", id))),
        }
    }
}
