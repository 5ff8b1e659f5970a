use std::sync::Arc;

use release_core::{ReleaseError, ReleaseResult};
use release_domain::entities::Node;
use release_domain::repositories::TopologyRepository;
use tracing::{debug, instrument};

/// 拓扑解析器
///
/// 每次分发都重新解析 线路组 → 节点组 → 节点IP → 节点，不做缓存，
/// 节点成员变化在下一次发布时即可生效。
#[derive(Clone)]
pub struct TopologyResolver {
    topology: Arc<dyn TopologyRepository>,
}

impl TopologyResolver {
    pub fn new(topology: Arc<dyn TopologyRepository>) -> Self {
        Self { topology }
    }

    /// 解析线路组当前可下发的节点（去重，按ID升序）。
    ///
    /// 线路组不存在时返回 `LineGroupNotFound`；没有可用节点返回空列表，
    /// 由调用方决定如何把它记录为发布失败。
    #[instrument(skip(self))]
    pub async fn resolve_nodes(&self, line_group_id: i64) -> ReleaseResult<Vec<Node>> {
        if self.topology.find_line_group(line_group_id).await?.is_none() {
            return Err(ReleaseError::LineGroupNotFound { id: line_group_id });
        }

        let nodes = self.topology.find_eligible_nodes(line_group_id).await?;
        debug!("线路组 {} 解析到 {} 个可用节点", line_group_id, nodes.len());
        Ok(nodes)
    }

    /// 节点当前所属的线路组
    pub async fn line_groups_for_node(&self, node_id: i64) -> ReleaseResult<Vec<i64>> {
        self.topology.find_line_group_ids_for_node(node_id).await
    }

    pub async fn node(&self, node_id: i64) -> ReleaseResult<Node> {
        self.topology
            .find_node(node_id)
            .await?
            .ok_or(ReleaseError::NodeNotFound { id: node_id })
    }
}
