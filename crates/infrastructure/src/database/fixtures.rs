//! 拓扑数据写入工具
//!
//! 节点、节点组与线路组的维护属于外部 CRUD 服务，本服务只读取。
//! 这里提供最小的写入能力，供集成测试与本地演示环境准备拓扑。

use release_core::ReleaseResult;
use release_domain::entities::{NODE_IP_STATUS_ACTIVE, NODE_STATUS_ONLINE};

use super::manager::{DatabaseManager, DatabasePool};

macro_rules! on_pool {
    ($pool:expr, |$p:ident| $body:expr) => {
        match $pool {
            DatabasePool::PostgreSQL($p) => $body,
            DatabasePool::SQLite($p) => $body,
        }
    };
}

pub struct TopologySeeder<'a> {
    pool: &'a DatabasePool,
}

impl<'a> TopologySeeder<'a> {
    pub fn new(db: &'a DatabaseManager) -> Self {
        Self { pool: db.pool() }
    }

    pub async fn node_group(&self, name: &str) -> ReleaseResult<i64> {
        let id = on_pool!(self.pool, |pool| {
            sqlx::query_scalar::<_, i64>("INSERT INTO node_groups (name) VALUES ($1) RETURNING id")
                .bind(name)
                .fetch_one(pool)
                .await?
        });
        Ok(id)
    }

    pub async fn line_group(&self, name: &str, node_group_id: i64) -> ReleaseResult<i64> {
        let id = on_pool!(self.pool, |pool| {
            sqlx::query_scalar::<_, i64>(
                "INSERT INTO line_groups (name, node_group_id) VALUES ($1, $2) RETURNING id",
            )
            .bind(name)
            .bind(node_group_id)
            .fetch_one(pool)
            .await?
        });
        Ok(id)
    }

    /// 新建启用且在线的节点
    pub async fn online_node(&self, name: &str, address: &str) -> ReleaseResult<i64> {
        self.node(name, address, true, NODE_STATUS_ONLINE).await
    }

    pub async fn node(
        &self,
        name: &str,
        address: &str,
        enabled: bool,
        status: &str,
    ) -> ReleaseResult<i64> {
        let id = on_pool!(self.pool, |pool| {
            sqlx::query_scalar::<_, i64>(
                "INSERT INTO nodes (name, address, enabled, status) VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(name)
            .bind(address)
            .bind(enabled)
            .bind(status)
            .fetch_one(pool)
            .await?
        });
        Ok(id)
    }

    /// 为节点在节点组中登记一个启用且可用的IP
    pub async fn node_ip(&self, node_id: i64, node_group_id: i64, ip: &str) -> ReleaseResult<i64> {
        let id = on_pool!(self.pool, |pool| {
            sqlx::query_scalar::<_, i64>(
                "INSERT INTO node_ips (node_id, node_group_id, ip, enabled, status) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind(node_id)
            .bind(node_group_id)
            .bind(ip)
            .bind(true)
            .bind(NODE_IP_STATUS_ACTIVE)
            .fetch_one(pool)
            .await?
        });
        Ok(id)
    }

    pub async fn set_node_status(&self, node_id: i64, status: &str) -> ReleaseResult<()> {
        on_pool!(self.pool, |pool| {
            sqlx::query("UPDATE nodes SET status = $1 WHERE id = $2")
                .bind(status)
                .bind(node_id)
                .execute(pool)
                .await?;
        });
        Ok(())
    }

    pub async fn set_node_ip_enabled(&self, node_ip_id: i64, enabled: bool) -> ReleaseResult<()> {
        on_pool!(self.pool, |pool| {
            sqlx::query("UPDATE node_ips SET enabled = $1 WHERE id = $2")
                .bind(enabled)
                .bind(node_ip_id)
                .execute(pool)
                .await?;
        });
        Ok(())
    }

    /// 一个节点组加一个线路组，返回 (node_group_id, line_group_id)
    pub async fn line(&self, name: &str) -> ReleaseResult<(i64, i64)> {
        let node_group_id = self.node_group(&format!("{name}-nodes")).await?;
        let line_group_id = self.line_group(name, node_group_id).await?;
        Ok((node_group_id, line_group_id))
    }

    /// 新建在线节点并挂到节点组下
    pub async fn attached_node(&self, name: &str, node_group_id: i64) -> ReleaseResult<i64> {
        let address = format!("{name}.nodes.internal");
        let node_id = self.online_node(name, &address).await?;
        self.node_ip(node_id, node_group_id, &format!("10.0.0.{node_id}"))
            .await?;
        Ok(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use release_domain::repositories::TopologyRepository;

    async fn database() -> DatabaseManager {
        let db = DatabaseManager::connect_url("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_eligible_nodes_follow_topology() {
        let db = database().await;
        let seeder = TopologySeeder::new(&db);
        let (node_group, line_group) = seeder.line("east").await.unwrap();

        let a = seeder.attached_node("a", node_group).await.unwrap();
        let b = seeder.attached_node("b", node_group).await.unwrap();
        // 同一节点的第二个IP不应导致重复
        seeder.node_ip(a, node_group, "10.1.0.1").await.unwrap();
        let offline = seeder.attached_node("c", node_group).await.unwrap();
        seeder.set_node_status(offline, "offline").await.unwrap();

        let topology = db.topology_repository();
        let nodes = topology.find_eligible_nodes(line_group).await.unwrap();
        let ids: Vec<i64> = nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[tokio::test]
    async fn test_disabled_ip_removes_node() {
        let db = database().await;
        let seeder = TopologySeeder::new(&db);
        let (node_group, line_group) = seeder.line("west").await.unwrap();
        let node = seeder.online_node("solo", "solo.nodes.internal").await.unwrap();
        let ip = seeder.node_ip(node, node_group, "10.2.0.1").await.unwrap();

        let topology = db.topology_repository();
        assert_eq!(topology.find_eligible_nodes(line_group).await.unwrap().len(), 1);
        assert_eq!(
            topology.find_line_group_ids_for_node(node).await.unwrap(),
            vec![line_group]
        );

        seeder.set_node_ip_enabled(ip, false).await.unwrap();
        assert!(topology.find_eligible_nodes(line_group).await.unwrap().is_empty());
        assert!(topology
            .find_line_group_ids_for_node(node)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_find_nodes_by_ids() {
        let db = database().await;
        let seeder = TopologySeeder::new(&db);
        let (node_group, _) = seeder.line("north").await.unwrap();
        let a = seeder.attached_node("a", node_group).await.unwrap();
        let b = seeder.attached_node("b", node_group).await.unwrap();

        let topology = db.topology_repository();
        let nodes = topology.find_nodes(&[b, a]).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, a);
        assert!(topology.find_node(9999).await.unwrap().is_none());
        assert_eq!(nodes[0].label(), format!("node a ({a})"));
    }
}
