use async_trait::async_trait;
use chrono::Utc;
use release_core::{ReleaseError, ReleaseResult};
use release_domain::entities::{AgentTask, AgentTaskStatus, NewAgentTask};
use release_domain::repositories::{AgentTaskRepository, CompletionOutcome};
use release_domain::value_objects::{AgentTaskCompletion, AgentTaskSummary};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, instrument};

use super::sqlite_release_task_repository::SqliteReleaseTaskRepository;
use crate::database::schema::{claimable_statuses, AGENT_TASK_COLUMNS};
use crate::error_handling::{RepositoryErrorHelpers, RepositoryOperation};

const ENTITY: &str = "节点任务";

pub struct SqliteAgentTaskRepository {
    pool: SqlitePool,
}

impl SqliteAgentTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_agent_task(row: &SqliteRow) -> ReleaseResult<AgentTask> {
        let id: i64 = row.try_get("id")?;
        let raw_payload: String = row.try_get("payload")?;
        let payload = serde_json::from_str(&raw_payload)
            .map_err(|e| RepositoryErrorHelpers::payload_error(ENTITY, id, e))?;

        Ok(AgentTask {
            id,
            release_task_id: row.try_get("release_task_id")?,
            node_id: row.try_get("node_id")?,
            task_type: row.try_get("task_type")?,
            payload,
            status: row.try_get("status")?,
            last_error: row.try_get("last_error")?,
            claimed_at: row.try_get("claimed_at")?,
            finished_at: row.try_get("finished_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch_in(conn: &mut SqliteConnection, id: i64) -> ReleaseResult<Option<AgentTask>> {
        let sql = format!("SELECT {AGENT_TASK_COLUMNS} FROM agent_tasks WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
        row.as_ref().map(Self::row_to_agent_task).transpose()
    }
}

#[async_trait]
impl AgentTaskRepository for SqliteAgentTaskRepository {
    async fn find_by_id(&self, id: i64) -> ReleaseResult<Option<AgentTask>> {
        let sql = format!("SELECT {AGENT_TASK_COLUMNS} FROM agent_tasks WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_agent_task).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> ReleaseResult<Option<AgentTask>> {
        let sql = format!(
            "SELECT {AGENT_TASK_COLUMNS} FROM agent_tasks WHERE json_extract(payload, '$.idempotency_key') = $1"
        );
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_agent_task).transpose()
    }

    #[instrument(skip(self, task), fields(release_task_id = %task.release_task_id, node_id = %task.node_id))]
    async fn insert_if_absent(&self, task: &NewAgentTask) -> ReleaseResult<Option<AgentTask>> {
        let mut payload = task.payload.clone();
        if let Some(object) = payload.as_object_mut() {
            object.insert(
                "idempotency_key".to_string(),
                serde_json::Value::String(task.idempotency_key.clone()),
            );
        }

        let sql = format!(
            "INSERT INTO agent_tasks (release_task_id, node_id, task_type, payload, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) \
             ON CONFLICT DO NOTHING RETURNING {AGENT_TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(task.release_task_id)
            .bind(task.node_id)
            .bind(task.task_type)
            .bind(serde_json::to_string(&payload)?)
            .bind(AgentTaskStatus::Pending)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(RepositoryOperation::Create, ENTITY, None, e)
            })?;

        if row.is_none() {
            debug!("幂等键 {} 已存在，跳过创建", task.idempotency_key);
        }
        row.as_ref().map(Self::row_to_agent_task).transpose()
    }

    async fn find_by_release(&self, release_task_id: i64) -> ReleaseResult<Vec<AgentTask>> {
        let sql = format!(
            "SELECT {AGENT_TASK_COLUMNS} FROM agent_tasks WHERE release_task_id = $1 ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(release_task_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_agent_task).collect()
    }

    async fn summarize_release(&self, release_task_id: i64) -> ReleaseResult<AgentTaskSummary> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM agent_tasks WHERE release_task_id = $1 GROUP BY status",
        )
        .bind(release_task_id)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = AgentTaskSummary::default();
        for row in rows {
            let status: AgentTaskStatus = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            summary.add(status, count);
        }
        Ok(summary)
    }

    async fn select_claimable_ids(&self, node_id: i64, limit: i64) -> ReleaseResult<Vec<i64>> {
        let sql = format!(
            "SELECT id FROM agent_tasks WHERE node_id = $1 AND status IN ({}) \
             ORDER BY id ASC LIMIT $2",
            claimable_statuses()
        );
        let ids = sqlx::query_scalar::<_, i64>(&sql)
            .bind(node_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    #[instrument(skip(self, ids), fields(node_id = %node_id, candidates = ids.len()))]
    async fn claim(&self, node_id: i64, ids: &[i64]) -> ReleaseResult<Vec<AgentTask>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE agent_tasks SET status = 'running', claimed_at = ");
        builder.push_bind(now);
        builder.push(", updated_at = ");
        builder.push_bind(now);
        builder.push(" WHERE node_id = ");
        builder.push_bind(node_id);
        builder.push(format!(" AND status IN ({}) AND id IN (", claimable_statuses()));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(format!(") RETURNING {AGENT_TASK_COLUMNS}"));

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(RepositoryOperation::Claim, ENTITY, None, e)
            })?;

        let mut claimed = rows
            .iter()
            .map(Self::row_to_agent_task)
            .collect::<ReleaseResult<Vec<_>>>()?;
        claimed.sort_by_key(|t| t.id);
        Ok(claimed)
    }

    #[instrument(skip(self, completion), fields(agent_task_id = %completion.agent_task_id, node_id = %completion.node_id))]
    async fn complete(&self, completion: &AgentTaskCompletion) -> ReleaseResult<CompletionOutcome> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let sql = format!(
            "UPDATE agent_tasks SET status = $1, last_error = $2, finished_at = $3, updated_at = $3 \
             WHERE id = $4 AND node_id = $5 AND status = 'running' RETURNING {AGENT_TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(completion.outcome.agent_task_status())
            .bind(&completion.error)
            .bind(now)
            .bind(completion.agent_task_id)
            .bind(completion.node_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    RepositoryOperation::Complete,
                    ENTITY,
                    Some(completion.agent_task_id),
                    e,
                )
            })?;

        let agent_task = match row {
            Some(row) => Self::row_to_agent_task(&row)?,
            None => {
                let existing = Self::fetch_in(&mut tx, completion.agent_task_id).await?;
                return Err(RepositoryErrorHelpers::rejected_completion(completion, existing));
            }
        };

        let release_task_id = agent_task.payload_release_task_id().ok_or_else(|| {
            ReleaseError::Serialization(format!(
                "节点任务 {} 的负载缺少 release_task_id",
                agent_task.id
            ))
        })?;

        let mut release_task = SqliteReleaseTaskRepository::lock_in(&mut tx, release_task_id).await?;
        let release_finished = release_task.apply_node_outcome(
            completion.outcome,
            &completion.node_label,
            completion.error.as_deref(),
        );
        SqliteReleaseTaskRepository::write_progress_in(&mut tx, &release_task).await?;
        tx.commit().await?;

        Ok(CompletionOutcome {
            agent_task,
            release_task,
            release_finished,
        })
    }
}
