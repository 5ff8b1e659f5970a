//! 结构化事件日志

use release_domain::entities::{AgentTask, ReleaseTask};
use release_domain::value_objects::DispatchResult;
use tracing::{info, warn};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_release_created(task: &ReleaseTask, reused: bool) {
        info!(
            event = if reused { "release_reused" } else { "release_created" },
            release_task.id = task.id,
            release_task.target_type = %task.target_type,
            release_task.target_id = task.target_id,
            release_task.strategy = %task.strategy,
            release_task.content_hash = %task.content_hash,
            "{}",
            if reused { "复用进行中的发布任务" } else { "创建发布任务" }
        );
    }

    pub fn log_dispatch(release_task_id: i64, result: &DispatchResult) {
        info!(
            event = "release_dispatched",
            release_task.id = release_task_id,
            dispatch.target_nodes = result.target_node_count,
            dispatch.created = result.created,
            dispatch.skipped = result.skipped,
            dispatch.failed = result.failed,
            "发布任务分发完成"
        );
    }

    pub fn log_dispatch_failed(release_task_id: i64, reason: &str) {
        warn!(
            event = "release_dispatch_failed",
            release_task.id = release_task_id,
            reason = reason,
            "发布任务分发失败"
        );
    }

    pub fn log_tasks_claimed(node_id: i64, tasks: &[AgentTask]) {
        if tasks.is_empty() {
            return;
        }
        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        info!(
            event = "agent_tasks_claimed",
            node.id = node_id,
            agent_task.count = tasks.len(),
            agent_task.ids = ?ids,
            "节点认领任务"
        );
    }

    pub fn log_node_outcome(agent_task: &AgentTask, release_task: &ReleaseTask, finished: bool) {
        info!(
            event = "node_outcome_reported",
            agent_task.id = agent_task.id,
            agent_task.status = %agent_task.status,
            node.id = agent_task.node_id,
            release_task.id = release_task.id,
            release_task.success_nodes = release_task.success_nodes,
            release_task.failed_nodes = release_task.failed_nodes,
            release_task.total_nodes = release_task.total_nodes,
            "节点上报任务结果"
        );
        if finished {
            Self::log_release_finished(release_task);
        }
    }

    pub fn log_release_finished(task: &ReleaseTask) {
        info!(
            event = "release_finished",
            release_task.id = task.id,
            release_task.status = %task.status,
            release_task.success_nodes = task.success_nodes,
            release_task.failed_nodes = task.failed_nodes,
            release_task.total_nodes = task.total_nodes,
            "发布任务结束"
        );
    }

    pub fn log_batch_started(release_task_id: i64, batch: i32, nodes: usize) {
        info!(
            event = "batch_started",
            release_task.id = release_task_id,
            batch.index = batch,
            batch.nodes = nodes,
            "开始执行批次"
        );
    }

    pub fn log_batch_node_failed(release_task_id: i64, node_id: i64, error: &str) {
        warn!(
            event = "batch_node_failed",
            release_task.id = release_task_id,
            node.id = node_id,
            error = error,
            "分批发布节点执行失败"
        );
    }
}
