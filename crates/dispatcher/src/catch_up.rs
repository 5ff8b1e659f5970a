use std::sync::Arc;

use release_core::ReleaseResult;
use release_domain::entities::ReleaseStrategy;
use release_domain::repositories::ReleaseTaskRepository;
use release_domain::value_objects::DispatchResult;
use tracing::{debug, instrument};

use crate::dispatcher::AgentTaskDispatcher;
use crate::topology::TopologyResolver;

/// 补发分发器
///
/// 节点在发布创建时离线会错过分发；节点重新拉取时，为其所属线路组下
/// 仍在进行中的拉取式发布再执行一次分发。分发本身幂等，每次拉取都可安全调用。
#[derive(Clone)]
pub struct CatchUpDispatcher {
    releases: Arc<dyn ReleaseTaskRepository>,
    resolver: TopologyResolver,
    dispatcher: AgentTaskDispatcher,
}

impl CatchUpDispatcher {
    pub fn new(
        releases: Arc<dyn ReleaseTaskRepository>,
        resolver: TopologyResolver,
        dispatcher: AgentTaskDispatcher,
    ) -> Self {
        Self {
            releases,
            resolver,
            dispatcher,
        }
    }

    #[instrument(skip(self))]
    pub async fn ensure_dispatch_pending_for_node(
        &self,
        node_id: i64,
    ) -> ReleaseResult<DispatchResult> {
        let line_group_ids = self.resolver.line_groups_for_node(node_id).await?;
        let mut total = DispatchResult::default();
        if line_group_ids.is_empty() {
            return Ok(total);
        }

        // paused 的发布不在其中
        let releases = self
            .releases
            .find_active_by_line_groups(&line_group_ids, ReleaseStrategy::Pull)
            .await?;

        for release in &releases {
            let result = self.dispatcher.ensure_dispatched(release.id).await?;
            total.absorb(&result);
        }

        if total.created > 0 {
            debug!(
                "节点 {} 补发完成: 检查 {} 个发布，新建 {} 个节点任务",
                node_id,
                releases.len(),
                total.created
            );
        }
        Ok(total)
    }
}
