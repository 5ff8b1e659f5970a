//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，PostgreSQL 与 SQLite 各有一套实现。

use async_trait::async_trait;

use crate::entities::{
    AgentTask, LineGroup, NewAgentTask, NewReleaseTask, Node, NodeOutcome, NodeRunStatus,
    ReleaseStatus, ReleaseStrategy, ReleaseTask, ReleaseTaskNode, TargetType,
};
use crate::value_objects::{AgentTaskCompletion, AgentTaskSummary};
use release_core::ReleaseResult;

/// 节点任务完成上报的处理结果
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub agent_task: AgentTask,
    pub release_task: ReleaseTask,
    /// 本次上报是否使发布任务进入终态
    pub release_finished: bool,
}

/// 发布任务仓储
#[async_trait]
pub trait ReleaseTaskRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> ReleaseResult<Option<ReleaseTask>>;

    /// 查找同一 (目标, 摘要) 下处于 pending/running 的发布
    async fn find_active(
        &self,
        target_type: TargetType,
        target_id: i64,
        content_hash: &str,
    ) -> ReleaseResult<Option<ReleaseTask>>;

    /// 插入新发布；与已有活跃发布冲突时返回 None
    async fn try_insert(&self, task: &NewReleaseTask) -> ReleaseResult<Option<ReleaseTask>>;

    /// 指定线路组下、指定执行方式的 pending/running 发布，按ID升序
    async fn find_active_by_line_groups(
        &self,
        line_group_ids: &[i64],
        strategy: ReleaseStrategy,
    ) -> ReleaseResult<Vec<ReleaseTask>>;

    async fn find_by_strategy_and_status(
        &self,
        strategy: ReleaseStrategy,
        status: ReleaseStatus,
        limit: i64,
    ) -> ReleaseResult<Vec<ReleaseTask>>;

    /// 将 total_nodes 同步为该发布已有的节点任务数，并在有任务时把 pending 推进为 running。
    /// 终态发布不做修改。
    async fn sync_total_nodes(&self, id: i64) -> ReleaseResult<ReleaseTask>;

    async fn set_total_nodes(&self, id: i64, total_nodes: i32) -> ReleaseResult<()>;

    /// 条件状态迁移，返回是否实际发生迁移
    async fn transition_status(
        &self,
        id: i64,
        from: &[ReleaseStatus],
        to: ReleaseStatus,
    ) -> ReleaseResult<bool>;

    /// 非终态发布置为 failed 并写入错误原因，返回是否实际发生迁移
    async fn mark_failed(&self, id: i64, error: &str) -> ReleaseResult<bool>;

    /// 在行锁保护下记录一个节点结果（分批发布路径使用）
    async fn record_node_outcome(
        &self,
        id: i64,
        outcome: NodeOutcome,
        node_label: &str,
        error: Option<&str>,
    ) -> ReleaseResult<ReleaseTask>;

    /// 运维重试：failed → pending，retry_count+1，清空错误与失败计数，
    /// 并把失败的节点任务置为 retrying
    async fn reset_for_retry(&self, id: i64) -> ReleaseResult<ReleaseTask>;
}

/// 节点任务仓储
#[async_trait]
pub trait AgentTaskRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> ReleaseResult<Option<AgentTask>>;

    /// 按负载中的幂等键查找
    async fn find_by_idempotency_key(&self, key: &str) -> ReleaseResult<Option<AgentTask>>;

    /// 插入节点任务；幂等键已存在时返回 None
    async fn insert_if_absent(&self, task: &NewAgentTask) -> ReleaseResult<Option<AgentTask>>;

    async fn find_by_release(&self, release_task_id: i64) -> ReleaseResult<Vec<AgentTask>>;

    async fn summarize_release(&self, release_task_id: i64) -> ReleaseResult<AgentTaskSummary>;

    /// 认领第一步：按ID升序选出节点可认领的任务ID
    async fn select_claimable_ids(&self, node_id: i64, limit: i64) -> ReleaseResult<Vec<i64>>;

    /// 认领第二、三步：条件更新为 running，只返回本次实际迁移的任务（按ID升序）
    async fn claim(&self, node_id: i64, ids: &[i64]) -> ReleaseResult<Vec<AgentTask>>;

    /// 将 running 的节点任务置为终态并在同一事务中锁定、更新所属发布任务
    async fn complete(&self, completion: &AgentTaskCompletion)
        -> ReleaseResult<CompletionOutcome>;
}

/// 分批发布节点仓储
#[async_trait]
pub trait ReleaseTaskNodeRepository: Send + Sync {
    /// 为发布分配批次；已分配过则保持不变并返回已有记录
    async fn allocate(
        &self,
        release_task_id: i64,
        batches: &[Vec<i64>],
    ) -> ReleaseResult<Vec<ReleaseTaskNode>>;

    async fn find_by_release(&self, release_task_id: i64) -> ReleaseResult<Vec<ReleaseTaskNode>>;

    async fn mark_running(&self, id: i64, agent_task_ref: &str) -> ReleaseResult<()>;

    async fn mark_finished(
        &self,
        id: i64,
        status: NodeRunStatus,
        error_msg: Option<&str>,
    ) -> ReleaseResult<()>;

    /// 将 batch 及之后批次中仍为 pending 的节点置为 skipped，返回受影响数量
    async fn skip_pending_from(&self, release_task_id: i64, batch: i32) -> ReleaseResult<u64>;

    /// 重新执行前把未成功的节点（失败、跳过或中断在 running）放回 pending
    async fn requeue_unfinished(&self, release_task_id: i64) -> ReleaseResult<u64>;
}

/// 拓扑只读仓储：目标 → 线路组 → 节点组 → 节点IP → 节点
#[async_trait]
pub trait TopologyRepository: Send + Sync {
    async fn find_line_group(&self, id: i64) -> ReleaseResult<Option<LineGroup>>;

    /// 启用且在线、并至少有一个启用且可用IP的节点，去重后按ID升序
    async fn find_eligible_nodes(&self, line_group_id: i64) -> ReleaseResult<Vec<Node>>;

    /// 节点当前（经由启用且可用的IP）所属的线路组
    async fn find_line_group_ids_for_node(&self, node_id: i64) -> ReleaseResult<Vec<i64>>;

    async fn find_node(&self, id: i64) -> ReleaseResult<Option<Node>>;

    async fn find_nodes(&self, ids: &[i64]) -> ReleaseResult<Vec<Node>>;
}
