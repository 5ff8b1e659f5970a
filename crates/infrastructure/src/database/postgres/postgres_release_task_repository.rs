use async_trait::async_trait;
use chrono::Utc;
use release_core::{ReleaseError, ReleaseResult};
use release_domain::entities::{
    NewReleaseTask, NodeOutcome, ReleaseStatus, ReleaseStrategy, ReleaseTask, TargetType,
};
use release_domain::repositories::ReleaseTaskRepository;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, instrument};

use crate::database::schema::{quoted_list, RELEASE_TASK_COLUMNS};
use crate::error_handling::{RepositoryErrorHelpers, RepositoryOperation};

const ENTITY: &str = "发布任务";

pub struct PostgresReleaseTaskRepository {
    pool: PgPool,
}

impl PostgresReleaseTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn row_to_release_task(row: &PgRow) -> ReleaseResult<ReleaseTask> {
        Ok(ReleaseTask {
            id: row.try_get("id")?,
            target_type: row.try_get("target_type")?,
            target_id: row.try_get("target_id")?,
            line_group_id: row.try_get("line_group_id")?,
            content_hash: row.try_get("content_hash")?,
            strategy: row.try_get("strategy")?,
            status: row.try_get("status")?,
            total_nodes: row.try_get("total_nodes")?,
            success_nodes: row.try_get("success_nodes")?,
            failed_nodes: row.try_get("failed_nodes")?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch_in(conn: &mut PgConnection, id: i64) -> ReleaseResult<Option<ReleaseTask>> {
        let sql = format!("SELECT {RELEASE_TASK_COLUMNS} FROM release_tasks WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
        row.as_ref().map(Self::row_to_release_task).transpose()
    }

    /// 行锁读取发布任务，直到事务结束
    pub(crate) async fn lock_in(conn: &mut PgConnection, id: i64) -> ReleaseResult<ReleaseTask> {
        let sql =
            format!("SELECT {RELEASE_TASK_COLUMNS} FROM release_tasks WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(ReleaseError::ReleaseTaskNotFound { id })?;
        Self::row_to_release_task(&row)
    }

    pub(crate) async fn write_progress_in(
        conn: &mut PgConnection,
        task: &ReleaseTask,
    ) -> ReleaseResult<()> {
        sqlx::query(
            r#"
            UPDATE release_tasks
            SET success_nodes = $1, failed_nodes = $2, status = $3, last_error = $4, updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(task.success_nodes)
        .bind(task.failed_nodes)
        .bind(task.status)
        .bind(&task.last_error)
        .bind(Utc::now())
        .bind(task.id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ReleaseTaskRepository for PostgresReleaseTaskRepository {
    #[instrument(skip(self), fields(release_task_id = %id))]
    async fn find_by_id(&self, id: i64) -> ReleaseResult<Option<ReleaseTask>> {
        let sql = format!("SELECT {RELEASE_TASK_COLUMNS} FROM release_tasks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(RepositoryOperation::Read, ENTITY, Some(id), e)
            })?;
        row.as_ref().map(Self::row_to_release_task).transpose()
    }

    #[instrument(skip(self))]
    async fn find_active(
        &self,
        target_type: TargetType,
        target_id: i64,
        content_hash: &str,
    ) -> ReleaseResult<Option<ReleaseTask>> {
        let sql = format!(
            "SELECT {RELEASE_TASK_COLUMNS} FROM release_tasks \
             WHERE target_type = $1 AND target_id = $2 AND content_hash = $3 \
             AND status IN ('pending', 'running') ORDER BY id ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(target_type)
            .bind(target_id)
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_release_task).transpose()
    }

    #[instrument(skip(self, task), fields(target_id = %task.target_id))]
    async fn try_insert(&self, task: &NewReleaseTask) -> ReleaseResult<Option<ReleaseTask>> {
        let sql = format!(
            "INSERT INTO release_tasks (target_type, target_id, line_group_id, content_hash, strategy, \
             status, total_nodes, success_nodes, failed_nodes, retry_count, payload, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 0, 0, 0, 0, $7, $8, $8) \
             ON CONFLICT DO NOTHING RETURNING {RELEASE_TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(task.target_type)
            .bind(task.target_id)
            .bind(task.line_group_id)
            .bind(&task.content_hash)
            .bind(task.strategy)
            .bind(ReleaseStatus::Pending)
            .bind(&task.payload)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(RepositoryOperation::Create, ENTITY, None, e)
            })?;

        let created = row.as_ref().map(Self::row_to_release_task).transpose()?;
        if let Some(created) = &created {
            debug!("创建{}", created.entity_description());
        }
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn find_active_by_line_groups(
        &self,
        line_group_ids: &[i64],
        strategy: ReleaseStrategy,
    ) -> ReleaseResult<Vec<ReleaseTask>> {
        if line_group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {RELEASE_TASK_COLUMNS} FROM release_tasks \
             WHERE status IN ('pending', 'running') AND strategy = $1 AND line_group_id = ANY($2) \
             ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(strategy)
            .bind(line_group_ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_release_task).collect()
    }

    async fn find_by_strategy_and_status(
        &self,
        strategy: ReleaseStrategy,
        status: ReleaseStatus,
        limit: i64,
    ) -> ReleaseResult<Vec<ReleaseTask>> {
        let sql = format!(
            "SELECT {RELEASE_TASK_COLUMNS} FROM release_tasks \
             WHERE strategy = $1 AND status = $2 ORDER BY id ASC LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(strategy)
            .bind(status)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_release_task).collect()
    }

    #[instrument(skip(self), fields(release_task_id = %id))]
    async fn sync_total_nodes(&self, id: i64) -> ReleaseResult<ReleaseTask> {
        let mut tx = self.pool.begin().await?;
        Self::lock_in(&mut tx, id).await?;

        sqlx::query(
            r#"
            UPDATE release_tasks
            SET total_nodes = (SELECT COUNT(*) FROM agent_tasks WHERE release_task_id = $1),
                updated_at = $2
            WHERE id = $1 AND status NOT IN ('success', 'failed')
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let mut task = Self::fetch_in(&mut tx, id)
            .await?
            .ok_or(ReleaseError::ReleaseTaskNotFound { id })?;

        let next = task.status_after_sync();
        if next != task.status {
            sqlx::query("UPDATE release_tasks SET status = $1, updated_at = $2 WHERE id = $3")
                .bind(next)
                .bind(Utc::now())
                .bind(id)
                .execute(&mut *tx)
                .await?;
            debug!("发布任务 {} 状态 {} -> {}", id, task.status, next);
            task.status = next;
        }

        tx.commit().await?;
        Ok(task)
    }

    async fn set_total_nodes(&self, id: i64, total_nodes: i32) -> ReleaseResult<()> {
        let result =
            sqlx::query("UPDATE release_tasks SET total_nodes = $1, updated_at = $2 WHERE id = $3")
                .bind(total_nodes)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(ReleaseError::ReleaseTaskNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(release_task_id = %id))]
    async fn transition_status(
        &self,
        id: i64,
        from: &[ReleaseStatus],
        to: ReleaseStatus,
    ) -> ReleaseResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let sql = format!(
            "UPDATE release_tasks SET status = $1, updated_at = $2 WHERE id = $3 AND status IN ({})",
            quoted_list(from.iter().map(|s| s.as_str()))
        );
        let result = sqlx::query(&sql)
            .bind(to)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::conflict_or_database(
                    RepositoryOperation::Update,
                    ENTITY,
                    Some(id),
                    e,
                    format!("发布任务 {id} 与同目标同摘要的进行中发布冲突"),
                )
            })?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, error), fields(release_task_id = %id))]
    async fn mark_failed(&self, id: i64, error: &str) -> ReleaseResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE release_tasks SET status = 'failed', last_error = $1, updated_at = $2
            WHERE id = $3 AND status NOT IN ('success', 'failed')
            "#,
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, error), fields(release_task_id = %id))]
    async fn record_node_outcome(
        &self,
        id: i64,
        outcome: NodeOutcome,
        node_label: &str,
        error: Option<&str>,
    ) -> ReleaseResult<ReleaseTask> {
        let mut tx = self.pool.begin().await?;
        let mut task = Self::lock_in(&mut tx, id).await?;
        task.apply_node_outcome(outcome, node_label, error);
        Self::write_progress_in(&mut tx, &task).await?;
        tx.commit().await?;
        Ok(task)
    }

    #[instrument(skip(self), fields(release_task_id = %id))]
    async fn reset_for_retry(&self, id: i64) -> ReleaseResult<ReleaseTask> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_in(&mut tx, id).await?;
        if current.status != ReleaseStatus::Failed {
            return Err(ReleaseError::Conflict(format!(
                "只有失败的发布任务可以重试，当前状态: {}",
                current.status
            )));
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE release_tasks
            SET status = 'pending', retry_count = retry_count + 1, failed_nodes = 0,
                last_error = NULL, updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::conflict_or_database(
                RepositoryOperation::Update,
                ENTITY,
                Some(id),
                e,
                format!("发布任务 {id} 的目标已有相同摘要的进行中发布"),
            )
        })?;

        sqlx::query(
            r#"
            UPDATE agent_tasks SET status = 'retrying', finished_at = NULL, updated_at = $1
            WHERE release_task_id = $2 AND status = 'failed'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let task = Self::fetch_in(&mut tx, id)
            .await?
            .ok_or(ReleaseError::ReleaseTaskNotFound { id })?;
        tx.commit().await?;
        Ok(task)
    }
}
