use std::sync::Arc;

use release_core::{DispatchConfig, ReleaseResult};
use release_domain::entities::AgentTask;
use release_domain::repositories::AgentTaskRepository;
use release_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::instrument;

use crate::catch_up::CatchUpDispatcher;
use crate::topology::TopologyResolver;

/// 节点拉取/认领服务
///
/// 认领分三步：按ID升序选出候选 → 条件更新仍为 pending/retrying 的行 →
/// 只返回实际迁移的行。并发拉取者之间被抢走的任务直接从结果中丢弃。
#[derive(Clone)]
pub struct PullService {
    agent_tasks: Arc<dyn AgentTaskRepository>,
    resolver: TopologyResolver,
    catch_up: CatchUpDispatcher,
    config: DispatchConfig,
    metrics: MetricsCollector,
}

impl PullService {
    pub fn new(
        agent_tasks: Arc<dyn AgentTaskRepository>,
        resolver: TopologyResolver,
        catch_up: CatchUpDispatcher,
        config: DispatchConfig,
    ) -> Self {
        Self {
            agent_tasks,
            resolver,
            catch_up,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    #[instrument(skip(self))]
    pub async fn pull_tasks(
        &self,
        node_id: i64,
        limit: Option<u32>,
    ) -> ReleaseResult<Vec<AgentTask>> {
        self.resolver.node(node_id).await?;

        // 先补发错过的发布，补发出错则本次拉取失败
        self.catch_up.ensure_dispatch_pending_for_node(node_id).await?;

        let limit = self.config.effective_limit(limit);
        let candidates = self
            .agent_tasks
            .select_claimable_ids(node_id, i64::from(limit))
            .await?;
        let claimed = self.agent_tasks.claim(node_id, &candidates).await?;

        self.metrics.record_agent_tasks_claimed(claimed.len());
        StructuredLogger::log_tasks_claimed(node_id, &claimed);
        Ok(claimed)
    }
}
