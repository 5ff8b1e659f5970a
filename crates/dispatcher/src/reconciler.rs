use std::sync::Arc;

use release_core::{ReleaseError, ReleaseResult};
use release_domain::entities::NodeOutcome;
use release_domain::repositories::{AgentTaskRepository, CompletionOutcome, TopologyRepository};
use release_domain::value_objects::AgentTaskCompletion;
use release_infrastructure::{MetricsCollector, StructuredLogger};
use serde::Deserialize;
use tracing::instrument;

/// 节点上报的任务结果
#[derive(Debug, Clone, Deserialize)]
pub struct StatusReport {
    pub node_id: i64,
    pub agent_task_id: i64,
    pub outcome: NodeOutcome,
    pub last_error: Option<String>,
}

/// 状态对账器
///
/// 节点任务置为终态与发布任务计数更新在同一事务内完成，发布任务行加锁，
/// 并发上报的计数不会丢失。
#[derive(Clone)]
pub struct StatusReconciler {
    agent_tasks: Arc<dyn AgentTaskRepository>,
    topology: Arc<dyn TopologyRepository>,
    max_error_bytes: usize,
    metrics: MetricsCollector,
}

impl StatusReconciler {
    pub fn new(
        agent_tasks: Arc<dyn AgentTaskRepository>,
        topology: Arc<dyn TopologyRepository>,
        max_error_bytes: usize,
    ) -> Self {
        Self {
            agent_tasks,
            topology,
            max_error_bytes,
            metrics: MetricsCollector::new(),
        }
    }

    #[instrument(skip(self, report), fields(node_id = report.node_id, agent_task_id = report.agent_task_id))]
    pub async fn report_status(&self, report: StatusReport) -> ReleaseResult<CompletionOutcome> {
        let error = self.checked_error(report.outcome, report.last_error)?;
        let node = self
            .topology
            .find_node(report.node_id)
            .await?
            .ok_or(ReleaseError::NodeNotFound { id: report.node_id })?;

        let completion = AgentTaskCompletion {
            node_id: report.node_id,
            agent_task_id: report.agent_task_id,
            outcome: report.outcome,
            error,
            node_label: node.label(),
        };
        let outcome = self.agent_tasks.complete(&completion).await?;

        self.metrics.record_node_outcome(report.outcome.as_str());
        if outcome.release_finished {
            self.metrics.record_release_finished(
                outcome.release_task.strategy.as_str(),
                outcome.release_task.status.as_str(),
            );
        }
        StructuredLogger::log_node_outcome(
            &outcome.agent_task,
            &outcome.release_task,
            outcome.release_finished,
        );
        Ok(outcome)
    }

    /// 失败上报必须携带错误信息；错误信息不得超过字节上限。成功上报不保留错误信息。
    fn checked_error(
        &self,
        outcome: NodeOutcome,
        last_error: Option<String>,
    ) -> ReleaseResult<Option<String>> {
        let last_error = last_error
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());

        if let Some(error) = &last_error {
            if error.len() > self.max_error_bytes {
                return Err(ReleaseError::Validation(format!(
                    "错误信息长度 {} 字节超过上限 {} 字节",
                    error.len(),
                    self.max_error_bytes
                )));
            }
        }

        match outcome {
            NodeOutcome::Failed => last_error
                .map(Some)
                .ok_or_else(|| ReleaseError::Validation("失败上报必须携带错误信息".to_string())),
            NodeOutcome::Succeeded => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use release_infrastructure::DatabaseManager;

    async fn reconciler(max_error_bytes: usize) -> StatusReconciler {
        let db = DatabaseManager::connect_url("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        StatusReconciler::new(
            db.agent_task_repository(),
            db.topology_repository(),
            max_error_bytes,
        )
    }

    #[tokio::test]
    async fn test_failed_report_requires_error() {
        let reconciler = reconciler(2048).await;
        let err = reconciler
            .checked_error(NodeOutcome::Failed, Some("   ".to_string()))
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Validation(_)));
        assert!(reconciler.checked_error(NodeOutcome::Failed, None).is_err());
        assert_eq!(
            reconciler
                .checked_error(NodeOutcome::Failed, Some(" reload failed ".to_string()))
                .unwrap()
                .as_deref(),
            Some("reload failed")
        );
    }

    #[tokio::test]
    async fn test_error_length_is_capped() {
        let reconciler = reconciler(8).await;
        assert!(reconciler
            .checked_error(NodeOutcome::Failed, Some("x".repeat(8)))
            .is_ok());
        let err = reconciler
            .checked_error(NodeOutcome::Failed, Some("x".repeat(9)))
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Validation(_)));
        // 成功上报的错误信息同样受长度限制
        assert!(reconciler
            .checked_error(NodeOutcome::Succeeded, Some("x".repeat(9)))
            .is_err());
        assert_eq!(
            reconciler
                .checked_error(NodeOutcome::Succeeded, Some("warn".to_string()))
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_unknown_node_is_rejected() {
        let reconciler = reconciler(2048).await;
        let err = reconciler
            .report_status(StatusReport {
                node_id: 77,
                agent_task_id: 1,
                outcome: NodeOutcome::Succeeded,
                last_error: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::NodeNotFound { id: 77 }));
    }
}
