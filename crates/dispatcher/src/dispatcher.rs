use std::sync::Arc;

use release_core::{ReleaseError, ReleaseResult};
use release_domain::entities::{
    AgentTaskType, NewAgentTask, Node, ReleaseStatus, ReleaseStrategy, ReleaseTask,
};
use release_domain::repositories::{AgentTaskRepository, ReleaseTaskRepository};
use release_domain::value_objects::{
    idempotency_key, AgentTaskPayload, DesiredState, DispatchResult,
};
use release_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::{debug, instrument, warn};

use crate::topology::TopologyResolver;

/// 节点任务分发器
///
/// 为发布任务的每个目标节点确保存在且只存在一个节点任务。
/// 幂等键由发布任务ID与节点ID派生，重复调用（包括并发调用）只会跳过已存在的任务。
#[derive(Clone)]
pub struct AgentTaskDispatcher {
    releases: Arc<dyn ReleaseTaskRepository>,
    agent_tasks: Arc<dyn AgentTaskRepository>,
    resolver: TopologyResolver,
    metrics: MetricsCollector,
}

impl AgentTaskDispatcher {
    pub fn new(
        releases: Arc<dyn ReleaseTaskRepository>,
        agent_tasks: Arc<dyn AgentTaskRepository>,
        resolver: TopologyResolver,
    ) -> Self {
        Self {
            releases,
            agent_tasks,
            resolver,
            metrics: MetricsCollector::new(),
        }
    }

    /// 确保发布任务已分发到当前拓扑下的全部节点。
    ///
    /// 校验失败、线路组不存在、没有可用节点以及单节点创建失败都会记录为发布失败，
    /// 并返回 `Ok`；只有查询本身出错才返回 `Err`。
    #[instrument(skip(self))]
    pub async fn ensure_dispatched(&self, release_task_id: i64) -> ReleaseResult<DispatchResult> {
        let release = self
            .releases
            .find_by_id(release_task_id)
            .await?
            .ok_or(ReleaseError::ReleaseTaskNotFound {
                id: release_task_id,
            })?;

        if release.strategy != ReleaseStrategy::Pull {
            return Err(ReleaseError::Conflict(format!(
                "{} 由分批执行器下发，不生成节点任务",
                release.entity_description()
            )));
        }

        if !release.status.is_active() {
            debug!("发布任务 {} 状态为 {}，跳过分发", release.id, release.status);
            return Ok(DispatchResult::default());
        }

        // 渲染前校验，失败时不创建任何节点任务
        let state = match DesiredState::from_payload(&release.payload)
            .and_then(|state| state.validate().map(|_| state))
        {
            Ok(state) => state,
            Err(e) => {
                self.fail(&release, &e.to_string()).await?;
                return Ok(DispatchResult::default());
            }
        };

        let nodes = match self.resolver.resolve_nodes(release.line_group_id).await {
            Ok(nodes) => nodes,
            Err(e @ ReleaseError::LineGroupNotFound { .. }) => {
                self.fail(&release, &e.to_string()).await?;
                return Ok(DispatchResult::default());
            }
            Err(e) => return Err(e),
        };

        if nodes.is_empty() {
            return self.handle_empty_topology(&release).await;
        }

        let mut result = DispatchResult {
            target_node_count: nodes.len(),
            ..Default::default()
        };
        let mut errors = Vec::new();

        for node in &nodes {
            match self.dispatch_node(&release, &state, node).await {
                Ok(true) => result.created += 1,
                Ok(false) => result.skipped += 1,
                Err(e) => {
                    warn!("为 {} 创建节点任务失败: {}", node.label(), e);
                    result.failed += 1;
                    errors.push(format!("{}: {}", node.label(), e));
                }
            }
        }

        let synced = self.releases.sync_total_nodes(release.id).await?;
        if synced.status.is_terminal() {
            self.metrics
                .record_release_finished(synced.strategy.as_str(), synced.status.as_str());
            StructuredLogger::log_release_finished(&synced);
        }

        if !errors.is_empty() {
            let reason = format!("节点任务创建失败: {}", errors.join("; "));
            self.fail(&synced, &reason).await?;
        }

        self.metrics
            .record_agent_tasks_dispatched(result.created, result.skipped, result.failed);
        StructuredLogger::log_dispatch(release.id, &result);
        Ok(result)
    }

    /// 返回是否新建了节点任务
    async fn dispatch_node(
        &self,
        release: &ReleaseTask,
        state: &DesiredState,
        node: &Node,
    ) -> ReleaseResult<bool> {
        let key = idempotency_key(release.id, node.id);
        if self.agent_tasks.find_by_idempotency_key(&key).await?.is_some() {
            return Ok(false);
        }

        let payload = AgentTaskPayload::build(release.id, node.id, &release.content_hash, state);
        let task = NewAgentTask {
            release_task_id: release.id,
            node_id: node.id,
            task_type: AgentTaskType::ApplyConfig,
            idempotency_key: key,
            payload: serde_json::to_value(&payload)?,
        };

        // 查询与插入之间被并发分发抢先时，插入返回 None，按跳过计
        Ok(self.agent_tasks.insert_if_absent(&task).await?.is_some())
    }

    /// 拓扑为空：尚未下发过任何节点任务的发布直接失败；
    /// 已有节点任务的发布保留原有工作，只同步计数
    async fn handle_empty_topology(&self, release: &ReleaseTask) -> ReleaseResult<DispatchResult> {
        let summary = self.agent_tasks.summarize_release(release.id).await?;
        if summary.total() == 0 {
            let error = ReleaseError::NoEligibleNodes {
                line_group_id: release.line_group_id,
            };
            self.fail(release, &error.to_string()).await?;
        } else {
            debug!(
                "线路组 {} 暂无可用节点，发布任务 {} 保留已有 {} 个节点任务",
                release.line_group_id,
                release.id,
                summary.total()
            );
            self.releases.sync_total_nodes(release.id).await?;
        }
        Ok(DispatchResult::default())
    }

    async fn fail(&self, release: &ReleaseTask, reason: &str) -> ReleaseResult<()> {
        StructuredLogger::log_dispatch_failed(release.id, reason);
        if self.releases.mark_failed(release.id, reason).await? {
            self.metrics.record_release_finished(
                release.strategy.as_str(),
                ReleaseStatus::Failed.as_str(),
            );
        }
        Ok(())
    }
}
