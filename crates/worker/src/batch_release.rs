use std::sync::Arc;

use async_trait::async_trait;
use release_core::{ReleaseError, ReleaseResult};
use release_dispatcher::{group_batches, BatchView, ReleaseTaskStore, TopologyResolver};
use release_domain::entities::ReleaseStrategy;
use release_domain::repositories::{ReleaseTaskNodeRepository, ReleaseTaskRepository};
use release_domain::value_objects::DesiredState;
use release_infrastructure::DatabaseManager;
use serde::Serialize;
use tracing::{debug, info, instrument};

/// 分批发布创建结果
#[derive(Debug, Clone, Serialize)]
pub struct BatchRelease {
    pub release_id: i64,
    /// 下发给 Agent 的版本号，即内容摘要
    pub version: String,
    pub total_nodes: i32,
    pub reused: bool,
    pub batches: Vec<BatchView>,
}

/// 分批/金丝雀发布的创建接口
#[async_trait]
pub trait BatchReleaseService: Send + Sync {
    async fn create_release(&self, state: DesiredState) -> ReleaseResult<BatchRelease>;
}

/// 批次规划：ID最小的节点作为金丝雀单独成第 1 批，其余节点为第 2 批
pub fn plan_batches(node_ids: &[i64]) -> Vec<Vec<i64>> {
    let mut ids = node_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut batches = Vec::with_capacity(2);
    let mut rest = ids.into_iter();
    if let Some(canary) = rest.next() {
        batches.push(vec![canary]);
    }
    let remainder: Vec<i64> = rest.collect();
    if !remainder.is_empty() {
        batches.push(remainder);
    }
    batches
}

pub struct BatchReleasePlanner {
    releases: Arc<dyn ReleaseTaskRepository>,
    release_nodes: Arc<dyn ReleaseTaskNodeRepository>,
    resolver: TopologyResolver,
    store: ReleaseTaskStore,
}

impl BatchReleasePlanner {
    pub fn from_database(db: &DatabaseManager) -> Self {
        let releases = db.release_task_repository();
        Self {
            store: ReleaseTaskStore::new(releases.clone()),
            releases,
            release_nodes: db.release_task_node_repository(),
            resolver: TopologyResolver::new(db.topology_repository()),
        }
    }
}

#[async_trait]
impl BatchReleaseService for BatchReleasePlanner {
    /// 在线节点为空时直接拒绝，不创建发布
    #[instrument(skip(self, state), fields(target_type = %state.target_type, target_id = state.target_id))]
    async fn create_release(&self, state: DesiredState) -> ReleaseResult<BatchRelease> {
        state.validate()?;

        let nodes = self.resolver.resolve_nodes(state.line_group_id).await?;
        if nodes.is_empty() {
            return Err(ReleaseError::NoEligibleNodes {
                line_group_id: state.line_group_id,
            });
        }

        let stored = self
            .store
            .create_or_reuse(&state, ReleaseStrategy::Batch)
            .await?;
        let release = stored.task;

        // 复用的发布原样返回已有批次，不再按当前拓扑重新规划
        if stored.reused {
            let existing = self.release_nodes.find_by_release(release.id).await?;
            if !existing.is_empty() {
                debug!(
                    "{} 复用已有的 {} 个节点分配",
                    release.entity_description(),
                    existing.len()
                );
                return Ok(BatchRelease {
                    release_id: release.id,
                    version: release.content_hash,
                    total_nodes: release.total_nodes,
                    reused: true,
                    batches: group_batches(existing),
                });
            }
        }

        let node_ids: Vec<i64> = nodes.iter().map(|n| n.id).collect();
        let allocated = self
            .release_nodes
            .allocate(release.id, &plan_batches(&node_ids))
            .await?;
        let total_nodes = allocated.len() as i32;
        self.releases.set_total_nodes(release.id, total_nodes).await?;

        info!(
            "{} 已分配 {} 个节点",
            release.entity_description(),
            total_nodes
        );

        Ok(BatchRelease {
            release_id: release.id,
            version: release.content_hash,
            total_nodes,
            reused: stored.reused,
            batches: group_batches(allocated),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canary_is_lowest_id() {
        assert_eq!(plan_batches(&[9, 3, 5, 4, 8]), vec![vec![3], vec![4, 5, 8, 9]]);
    }

    #[test]
    fn test_single_node_has_only_canary_batch() {
        assert_eq!(plan_batches(&[42]), vec![vec![42]]);
        assert!(plan_batches(&[]).is_empty());
    }

    #[test]
    fn test_duplicate_ids_are_collapsed() {
        assert_eq!(plan_batches(&[2, 1, 2]), vec![vec![1], vec![2]]);
    }
}
