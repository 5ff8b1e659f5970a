use async_trait::async_trait;
use release_core::ReleaseResult;
use release_domain::entities::{LineGroup, Node, NODE_IP_STATUS_ACTIVE, NODE_STATUS_ONLINE};
use release_domain::repositories::TopologyRepository;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

pub struct SqliteTopologyRepository {
    pool: SqlitePool,
}

impl SqliteTopologyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_node(row: &SqliteRow) -> ReleaseResult<Node> {
        Ok(Node {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            address: row.try_get("address")?,
            enabled: row.try_get("enabled")?,
            status: row.try_get("status")?,
        })
    }
}

#[async_trait]
impl TopologyRepository for SqliteTopologyRepository {
    async fn find_line_group(&self, id: i64) -> ReleaseResult<Option<LineGroup>> {
        let row = sqlx::query("SELECT id, name, node_group_id FROM line_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> ReleaseResult<LineGroup> {
            Ok(LineGroup {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                node_group_id: row.try_get("node_group_id")?,
            })
        })
        .transpose()
    }

    async fn find_eligible_nodes(&self, line_group_id: i64) -> ReleaseResult<Vec<Node>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT n.id, n.name, n.address, n.enabled, n.status
            FROM line_groups lg
            JOIN node_ips ni ON ni.node_group_id = lg.node_group_id
            JOIN nodes n ON n.id = ni.node_id
            WHERE lg.id = $1
              AND ni.enabled = 1 AND ni.status = $2
              AND n.enabled = 1 AND n.status = $3
            ORDER BY n.id ASC
            "#,
        )
        .bind(line_group_id)
        .bind(NODE_IP_STATUS_ACTIVE)
        .bind(NODE_STATUS_ONLINE)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_node).collect()
    }

    async fn find_line_group_ids_for_node(&self, node_id: i64) -> ReleaseResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT lg.id
            FROM node_ips ni
            JOIN line_groups lg ON lg.node_group_id = ni.node_group_id
            WHERE ni.node_id = $1 AND ni.enabled = 1 AND ni.status = $2
            ORDER BY lg.id ASC
            "#,
        )
        .bind(node_id)
        .bind(NODE_IP_STATUS_ACTIVE)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn find_node(&self, id: i64) -> ReleaseResult<Option<Node>> {
        let row = sqlx::query("SELECT id, name, address, enabled, status FROM nodes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_node).transpose()
    }

    async fn find_nodes(&self, ids: &[i64]) -> ReleaseResult<Vec<Node>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, name, address, enabled, status FROM nodes WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_node).collect()
    }
}
