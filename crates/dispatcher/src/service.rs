use std::sync::Arc;

use async_trait::async_trait;
use release_core::{DispatchConfig, ReleaseError, ReleaseResult};
use release_domain::entities::{AgentTask, ReleaseStatus, ReleaseStrategy, ReleaseTask, ReleaseTaskNode};
use release_domain::repositories::{
    AgentTaskRepository, CompletionOutcome, ReleaseTaskNodeRepository, ReleaseTaskRepository,
};
use release_domain::value_objects::{AgentTaskSummary, DesiredState, DispatchResult};
use release_infrastructure::DatabaseManager;
use serde::Serialize;
use tracing::{info, instrument};

use crate::catch_up::CatchUpDispatcher;
use crate::dispatcher::AgentTaskDispatcher;
use crate::pull::PullService;
use crate::reconciler::{StatusReconciler, StatusReport};
use crate::release_store::ReleaseTaskStore;
use crate::topology::TopologyResolver;

/// 一个批次内各节点的执行状态
#[derive(Debug, Clone, Serialize)]
pub struct BatchView {
    pub batch: i32,
    pub nodes: Vec<ReleaseTaskNode>,
}

/// 发布任务详情：计数、节点任务统计，分批发布另带各批次节点状态
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseView {
    pub release: ReleaseTask,
    pub agent_tasks: AgentTaskSummary,
    pub batches: Vec<BatchView>,
}

/// 提交期望状态的结果
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub release: ReleaseTask,
    pub reused: bool,
    pub dispatch: DispatchResult,
}

/// 按批次号分组，输入需已按 (batch, node_id) 排序
pub fn group_batches(nodes: Vec<ReleaseTaskNode>) -> Vec<BatchView> {
    let mut batches: Vec<BatchView> = Vec::new();
    for node in nodes {
        match batches.last_mut() {
            Some(view) if view.batch == node.batch => view.nodes.push(node),
            _ => batches.push(BatchView {
                batch: node.batch,
                nodes: vec![node],
            }),
        }
    }
    batches
}

/// 面向运维与业务变更的发布控制接口
#[async_trait]
pub trait ReleaseControlService: Send + Sync {
    /// 提交目标的期望状态：创建或复用拉取式发布，然后分发
    async fn submit(&self, state: DesiredState) -> ReleaseResult<SubmitOutcome>;

    /// 手动触发一次分发
    async fn dispatch(&self, release_task_id: i64) -> ReleaseResult<DispatchResult>;

    /// 重试失败的发布
    async fn retry(&self, release_task_id: i64) -> ReleaseResult<ReleaseTask>;

    async fn pause(&self, release_task_id: i64) -> ReleaseResult<ReleaseTask>;

    async fn resume(&self, release_task_id: i64) -> ReleaseResult<ReleaseTask>;

    async fn get_release(&self, release_task_id: i64) -> ReleaseResult<ReleaseView>;
}

/// 面向节点 Agent 的接口
#[async_trait]
pub trait AgentGatewayService: Send + Sync {
    async fn pull_tasks(&self, node_id: i64, limit: Option<u32>) -> ReleaseResult<Vec<AgentTask>>;

    async fn report_status(&self, report: StatusReport) -> ReleaseResult<CompletionOutcome>;
}

/// 发布编排服务，组合存储、分发、补发、认领与对账
pub struct ReleaseOrchestrator {
    releases: Arc<dyn ReleaseTaskRepository>,
    agent_tasks: Arc<dyn AgentTaskRepository>,
    release_nodes: Arc<dyn ReleaseTaskNodeRepository>,
    store: ReleaseTaskStore,
    dispatcher: AgentTaskDispatcher,
    pull: PullService,
    reconciler: StatusReconciler,
}

impl ReleaseOrchestrator {
    pub fn from_database(db: &DatabaseManager, config: DispatchConfig) -> Self {
        let releases = db.release_task_repository();
        let agent_tasks = db.agent_task_repository();
        let topology = db.topology_repository();

        let resolver = TopologyResolver::new(topology.clone());
        let dispatcher =
            AgentTaskDispatcher::new(releases.clone(), agent_tasks.clone(), resolver.clone());
        let catch_up =
            CatchUpDispatcher::new(releases.clone(), resolver.clone(), dispatcher.clone());
        let pull = PullService::new(agent_tasks.clone(), resolver, catch_up, config.clone());
        let reconciler =
            StatusReconciler::new(agent_tasks.clone(), topology, config.max_error_bytes);

        Self {
            store: ReleaseTaskStore::new(releases.clone()),
            releases,
            agent_tasks,
            release_nodes: db.release_task_node_repository(),
            dispatcher,
            pull,
            reconciler,
        }
    }

    async fn load(&self, release_task_id: i64) -> ReleaseResult<ReleaseTask> {
        self.releases
            .find_by_id(release_task_id)
            .await?
            .ok_or(ReleaseError::ReleaseTaskNotFound {
                id: release_task_id,
            })
    }

    /// 条件迁移未生效时区分“不存在”与“状态不允许”
    async fn transition_or_conflict(
        &self,
        release_task_id: i64,
        from: &[ReleaseStatus],
        to: ReleaseStatus,
    ) -> ReleaseResult<ReleaseTask> {
        if self.releases.transition_status(release_task_id, from, to).await? {
            return self.load(release_task_id).await;
        }

        let current = self.load(release_task_id).await?;
        let allowed: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        Err(ReleaseError::Conflict(format!(
            "{} 当前状态为 {}，只有 {} 状态可以变更为 {}",
            current.entity_description(),
            current.status,
            allowed.join("/"),
            to
        )))
    }
}

#[async_trait]
impl ReleaseControlService for ReleaseOrchestrator {
    #[instrument(skip(self, state), fields(target_type = %state.target_type, target_id = state.target_id))]
    async fn submit(&self, state: DesiredState) -> ReleaseResult<SubmitOutcome> {
        // 不合法的期望状态不落库
        state.validate()?;

        let stored = self
            .store
            .create_or_reuse(&state, ReleaseStrategy::Pull)
            .await?;
        // 复用时同样分发一次，补齐发布创建后新加入的节点
        let dispatch = self.dispatcher.ensure_dispatched(stored.task.id).await?;
        let release = self.load(stored.task.id).await?;

        Ok(SubmitOutcome {
            release,
            reused: stored.reused,
            dispatch,
        })
    }

    async fn dispatch(&self, release_task_id: i64) -> ReleaseResult<DispatchResult> {
        self.dispatcher.ensure_dispatched(release_task_id).await
    }

    #[instrument(skip(self))]
    async fn retry(&self, release_task_id: i64) -> ReleaseResult<ReleaseTask> {
        let release = self.releases.reset_for_retry(release_task_id).await?;
        info!(
            "{} 进入第 {} 次重试",
            release.entity_description(),
            release.retry_count
        );

        // 分批发布由执行器重新认领；拉取式发布补齐节点任务
        if release.strategy == ReleaseStrategy::Pull {
            self.dispatcher.ensure_dispatched(release_task_id).await?;
        }
        self.load(release_task_id).await
    }

    #[instrument(skip(self))]
    async fn pause(&self, release_task_id: i64) -> ReleaseResult<ReleaseTask> {
        self.transition_or_conflict(
            release_task_id,
            &[ReleaseStatus::Pending, ReleaseStatus::Running],
            ReleaseStatus::Paused,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn resume(&self, release_task_id: i64) -> ReleaseResult<ReleaseTask> {
        let release = self
            .transition_or_conflict(
                release_task_id,
                &[ReleaseStatus::Paused],
                ReleaseStatus::Pending,
            )
            .await?;

        // 拉取式发布：补发暂停期间错过的节点，并按已上报情况恢复 running 或直接结束
        if release.strategy == ReleaseStrategy::Pull {
            self.dispatcher.ensure_dispatched(release_task_id).await?;
            return self.load(release_task_id).await;
        }
        Ok(release)
    }

    async fn get_release(&self, release_task_id: i64) -> ReleaseResult<ReleaseView> {
        let release = self.load(release_task_id).await?;
        let agent_tasks = self.agent_tasks.summarize_release(release.id).await?;
        let batches = match release.strategy {
            ReleaseStrategy::Batch => {
                group_batches(self.release_nodes.find_by_release(release.id).await?)
            }
            ReleaseStrategy::Pull => Vec::new(),
        };

        Ok(ReleaseView {
            release,
            agent_tasks,
            batches,
        })
    }
}

#[async_trait]
impl AgentGatewayService for ReleaseOrchestrator {
    async fn pull_tasks(&self, node_id: i64, limit: Option<u32>) -> ReleaseResult<Vec<AgentTask>> {
        self.pull.pull_tasks(node_id, limit).await
    }

    async fn report_status(&self, report: StatusReport) -> ReleaseResult<CompletionOutcome> {
        self.reconciler.report_status(report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use release_domain::entities::NodeRunStatus;

    fn node(id: i64, batch: i32) -> ReleaseTaskNode {
        ReleaseTaskNode {
            id,
            release_task_id: 1,
            node_id: id,
            batch,
            status: NodeRunStatus::Pending,
            agent_task_ref: None,
            error_msg: None,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_group_batches_keeps_order() {
        let batches = group_batches(vec![node(1, 1), node(2, 2), node(3, 2), node(4, 2)]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].batch, 1);
        assert_eq!(batches[0].nodes.len(), 1);
        assert_eq!(batches[1].batch, 2);
        let ids: Vec<i64> = batches[1].nodes.iter().map(|n| n.node_id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert!(group_batches(Vec::new()).is_empty());
    }
}
