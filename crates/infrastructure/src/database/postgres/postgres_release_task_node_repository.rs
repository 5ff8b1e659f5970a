use async_trait::async_trait;
use chrono::Utc;
use release_core::ReleaseResult;
use release_domain::entities::{NodeRunStatus, ReleaseTaskNode};
use release_domain::repositories::ReleaseTaskNodeRepository;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use crate::database::schema::RELEASE_TASK_NODE_COLUMNS;

pub struct PostgresReleaseTaskNodeRepository {
    pool: PgPool,
}

impl PostgresReleaseTaskNodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_node(row: &PgRow) -> ReleaseResult<ReleaseTaskNode> {
        Ok(ReleaseTaskNode {
            id: row.try_get("id")?,
            release_task_id: row.try_get("release_task_id")?,
            node_id: row.try_get("node_id")?,
            batch: row.try_get("batch")?,
            status: row.try_get("status")?,
            agent_task_ref: row.try_get("agent_task_ref")?,
            error_msg: row.try_get("error_msg")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

#[async_trait]
impl ReleaseTaskNodeRepository for PostgresReleaseTaskNodeRepository {
    #[instrument(skip(self, batches), fields(release_task_id = %release_task_id, batches = batches.len()))]
    async fn allocate(
        &self,
        release_task_id: i64,
        batches: &[Vec<i64>],
    ) -> ReleaseResult<Vec<ReleaseTaskNode>> {
        let mut tx = self.pool.begin().await?;
        for (index, node_ids) in batches.iter().enumerate() {
            let batch = index as i32 + 1;
            sqlx::query(
                r#"
                INSERT INTO release_task_nodes (release_task_id, node_id, batch, status)
                SELECT $1, node_id, $2, $3 FROM UNNEST($4::BIGINT[]) AS node_id
                ON CONFLICT (release_task_id, node_id) DO NOTHING
                "#,
            )
            .bind(release_task_id)
            .bind(batch)
            .bind(NodeRunStatus::Pending)
            .bind(node_ids.clone())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!("发布任务 {} 批次分配完成", release_task_id);

        self.find_by_release(release_task_id).await
    }

    async fn find_by_release(&self, release_task_id: i64) -> ReleaseResult<Vec<ReleaseTaskNode>> {
        let sql = format!(
            "SELECT {RELEASE_TASK_NODE_COLUMNS} FROM release_task_nodes \
             WHERE release_task_id = $1 ORDER BY batch ASC, node_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(release_task_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_node).collect()
    }

    async fn mark_running(&self, id: i64, agent_task_ref: &str) -> ReleaseResult<()> {
        sqlx::query(
            r#"
            UPDATE release_task_nodes SET status = 'running', agent_task_ref = $1, started_at = $2
            WHERE id = $3 AND status = 'pending'
            "#,
        )
        .bind(agent_task_ref)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_finished(
        &self,
        id: i64,
        status: NodeRunStatus,
        error_msg: Option<&str>,
    ) -> ReleaseResult<()> {
        sqlx::query(
            r#"
            UPDATE release_task_nodes SET status = $1, error_msg = $2, finished_at = $3
            WHERE id = $4 AND status IN ('pending', 'running')
            "#,
        )
        .bind(status)
        .bind(error_msg)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn skip_pending_from(&self, release_task_id: i64, batch: i32) -> ReleaseResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE release_task_nodes SET status = 'skipped', finished_at = $1
            WHERE release_task_id = $2 AND batch >= $3 AND status = 'pending'
            "#,
        )
        .bind(Utc::now())
        .bind(release_task_id)
        .bind(batch)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn requeue_unfinished(&self, release_task_id: i64) -> ReleaseResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE release_task_nodes
            SET status = 'pending', agent_task_ref = NULL, error_msg = NULL,
                started_at = NULL, finished_at = NULL
            WHERE release_task_id = $1 AND status IN ('running', 'failed', 'skipped')
            "#,
        )
        .bind(release_task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
