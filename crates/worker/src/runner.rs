use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use release_core::{BatchRunnerConfig, ReleaseError, ReleaseResult};
use release_dispatcher::{group_batches, BatchView};
use release_domain::entities::{
    Node, NodeOutcome, NodeRunStatus, ReleaseStatus, ReleaseStrategy, ReleaseTask,
    ReleaseTaskNode,
};
use release_domain::repositories::{
    ReleaseTaskNodeRepository, ReleaseTaskRepository, TopologyRepository,
};
use release_infrastructure::{DatabaseManager, MetricsCollector, StructuredLogger};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::agent_client::{AgentClient, RemoteTaskState};
use crate::schedule::PollSchedule;

/// 每次扫描认领的待执行发布数上限
const SCAN_BATCH_SIZE: i64 = 10;

/// 同批次其他节点失败后，未完成节点的错误信息
const ABANDONED_AFTER_BATCH_FAILURE: &str = "同批次节点失败，放弃等待";

/// 单个批次的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
enum BatchOutcome {
    Succeeded,
    Failed { reason: String },
}

/// 分批/金丝雀发布执行器
///
/// 按批次顺序主动下发并轮询节点 Agent：整批成功才进入下一批；
/// 任一节点失败或下发出错，发布立即失败：同批次仍在执行的节点记为失败，
/// 本批及之后批次中仍为 pending 的节点全部跳过。
pub struct BatchRunner {
    releases: Arc<dyn ReleaseTaskRepository>,
    release_nodes: Arc<dyn ReleaseTaskNodeRepository>,
    topology: Arc<dyn TopologyRepository>,
    client: Arc<dyn AgentClient>,
    schedule: PollSchedule,
    config: BatchRunnerConfig,
    metrics: MetricsCollector,
}

impl BatchRunner {
    pub fn new(
        db: &DatabaseManager,
        client: Arc<dyn AgentClient>,
        schedule: PollSchedule,
        config: BatchRunnerConfig,
    ) -> Self {
        Self {
            releases: db.release_task_repository(),
            release_nodes: db.release_task_node_repository(),
            topology: db.topology_repository(),
            client,
            schedule,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// 后台循环：定期认领 pending 的分批发布并执行，收到关闭信号后退出。
    ///
    /// 执行中途关闭的发布保持 running，下次启动时先行恢复。
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("分批发布执行器未启用");
            return;
        }

        info!(
            "分批发布执行器启动，扫描间隔 {} 秒",
            self.config.scan_interval_seconds
        );

        tokio::select! {
            result = self.recover_interrupted() => {
                if let Err(e) = result {
                    error!("恢复中断的分批发布失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("分批发布执行器退出");
                return;
            }
        }

        let mut scan_interval = interval(Duration::from_secs(self.config.scan_interval_seconds));
        scan_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = scan_interval.tick() => {
                    tokio::select! {
                        result = self.scan_once() => {
                            if let Err(e) = result {
                                error!("扫描分批发布失败: {}", e);
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("分批发布执行器退出");
    }

    /// 认领并执行一轮 pending 的分批发布，返回执行的发布数
    pub async fn scan_once(&self) -> ReleaseResult<usize> {
        let candidates = self
            .releases
            .find_by_strategy_and_status(
                ReleaseStrategy::Batch,
                ReleaseStatus::Pending,
                SCAN_BATCH_SIZE,
            )
            .await?;

        let mut executed = 0;
        for release in candidates {
            let claimed = self
                .releases
                .transition_status(release.id, &[ReleaseStatus::Pending], ReleaseStatus::Running)
                .await?;
            if !claimed {
                debug!("发布任务 {} 已被其他执行器认领", release.id);
                continue;
            }
            self.run_release(release.id).await?;
            executed += 1;
        }
        Ok(executed)
    }

    /// 继续执行上次中断在 running 的分批发布
    pub async fn recover_interrupted(&self) -> ReleaseResult<usize> {
        let interrupted = self
            .releases
            .find_by_strategy_and_status(
                ReleaseStrategy::Batch,
                ReleaseStatus::Running,
                SCAN_BATCH_SIZE,
            )
            .await?;

        for release in &interrupted {
            warn!("恢复中断的分批发布: {}", release.entity_description());
            self.run_release(release.id).await?;
        }
        Ok(interrupted.len())
    }

    /// 执行一个已处于 running 的分批发布，返回结束时的状态
    #[instrument(skip(self))]
    pub async fn run_release(&self, release_task_id: i64) -> ReleaseResult<ReleaseStatus> {
        let started = Instant::now();
        let release = self.load(release_task_id).await?;

        // 重试或中断恢复：未成功的节点回到 pending，成功的节点保留
        let requeued = self.release_nodes.requeue_unfinished(release.id).await?;
        if requeued > 0 {
            debug!("发布任务 {} 重新排队 {} 个节点", release.id, requeued);
        }

        let allocated = self.release_nodes.find_by_release(release.id).await?;
        if allocated.is_empty() {
            self.fail_release(&release, "发布任务没有分配任何节点").await?;
            return Ok(ReleaseStatus::Failed);
        }

        let node_ids: Vec<i64> = allocated.iter().map(|n| n.node_id).collect();
        let nodes: HashMap<i64, Node> = self
            .topology
            .find_nodes(&node_ids)
            .await?
            .into_iter()
            .map(|n| (n.id, n))
            .collect();

        for batch in group_batches(allocated) {
            let current = self.load(release.id).await?;
            if current.status != ReleaseStatus::Running {
                info!(
                    "{} 状态为 {}，停止执行后续批次",
                    current.entity_description(),
                    current.status
                );
                return Ok(current.status);
            }

            StructuredLogger::log_batch_started(release.id, batch.batch, batch.nodes.len());
            if let BatchOutcome::Failed { reason } =
                self.run_batch(&release, &batch, &nodes).await?
            {
                let skipped = self
                    .release_nodes
                    .skip_pending_from(release.id, batch.batch)
                    .await?;
                let reason = format!(
                    "第 {} 批执行失败，跳过 {} 个节点: {}",
                    batch.batch, skipped, reason
                );
                self.fail_release(&release, &reason).await?;
                self.metrics
                    .record_batch_run_duration(started.elapsed().as_secs_f64());
                return Ok(ReleaseStatus::Failed);
            }
        }

        let finished = self.finish_release(release.id).await?;
        self.metrics
            .record_batch_run_duration(started.elapsed().as_secs_f64());
        Ok(finished)
    }

    async fn run_batch(
        &self,
        release: &ReleaseTask,
        batch: &BatchView,
        nodes: &HashMap<i64, Node>,
    ) -> ReleaseResult<BatchOutcome> {
        let mut outstanding: Vec<(ReleaseTaskNode, Node, String)> = Vec::new();

        for row in batch.nodes.iter().filter(|n| n.status == NodeRunStatus::Pending) {
            let Some(node) = nodes.get(&row.node_id) else {
                let reason = format!("节点 {} 不存在", row.node_id);
                self.finish_node(release, row, &format!("node {}", row.node_id), Some(&reason))
                    .await?;
                self.abandon(release, outstanding).await?;
                return Ok(BatchOutcome::Failed { reason });
            };

            match self.client.dispatch(node, &release.content_hash).await {
                Ok(agent_task_ref) => {
                    self.release_nodes.mark_running(row.id, &agent_task_ref).await?;
                    outstanding.push((row.clone(), node.clone(), agent_task_ref));
                }
                Err(e) => {
                    let reason = format!("{} 下发失败: {}", node.label(), e);
                    self.finish_node(release, row, &node.label(), Some(&e.to_string()))
                        .await?;
                    self.abandon(release, outstanding).await?;
                    return Ok(BatchOutcome::Failed { reason });
                }
            }
        }

        for attempt in self.schedule.attempts() {
            if outstanding.is_empty() {
                break;
            }
            self.schedule.tick().await;

            let mut still_running = Vec::with_capacity(outstanding.len());
            let mut polling = outstanding.into_iter();
            while let Some((row, node, agent_task_ref)) = polling.next() {
                let status = match self.client.query(&node, &agent_task_ref).await {
                    Ok(status) => status,
                    Err(e) => {
                        // 单次查询失败计入轮询次数，继续等待
                        warn!("第 {} 次查询 {} 状态失败: {}", attempt, node.label(), e);
                        still_running.push((row, node, agent_task_ref));
                        continue;
                    }
                };

                match status.state {
                    RemoteTaskState::InProgress => still_running.push((row, node, agent_task_ref)),
                    RemoteTaskState::Succeeded => {
                        self.finish_node(release, &row, &node.label(), None).await?;
                    }
                    RemoteTaskState::Failed => {
                        let error = status
                            .last_error
                            .unwrap_or_else(|| "agent reported failure".to_string());
                        self.finish_node(release, &row, &node.label(), Some(&error))
                            .await?;
                        still_running.extend(polling.by_ref());
                        self.abandon(release, still_running).await?;
                        return Ok(BatchOutcome::Failed {
                            reason: format!("{}: {}", node.label(), error),
                        });
                    }
                }
            }
            outstanding = still_running;
        }

        if outstanding.is_empty() {
            return Ok(BatchOutcome::Succeeded);
        }

        let error = format!(
            "轮询 {} 次（{} 秒）后仍未完成",
            self.schedule.max_attempts(),
            self.schedule.budget().as_secs()
        );
        let labels: Vec<String> = outstanding.iter().map(|(_, node, _)| node.label()).collect();
        for (row, node, _) in &outstanding {
            self.finish_node(release, row, &node.label(), Some(&error))
                .await?;
        }
        Ok(BatchOutcome::Failed {
            reason: format!("{}: {}", labels.join(", "), error),
        })
    }

    /// 批次已失败：仍在执行的节点不再等待，直接记为失败
    async fn abandon(
        &self,
        release: &ReleaseTask,
        outstanding: Vec<(ReleaseTaskNode, Node, String)>,
    ) -> ReleaseResult<()> {
        for (row, node, _) in outstanding {
            self.finish_node(release, &row, &node.label(), Some(ABANDONED_AFTER_BATCH_FAILURE))
                .await?;
        }
        Ok(())
    }

    /// 节点进入终态，并在发布任务行锁下累计计数
    async fn finish_node(
        &self,
        release: &ReleaseTask,
        row: &ReleaseTaskNode,
        node_label: &str,
        error: Option<&str>,
    ) -> ReleaseResult<()> {
        let (status, outcome) = match error {
            None => (NodeRunStatus::Success, NodeOutcome::Succeeded),
            Some(error) => {
                StructuredLogger::log_batch_node_failed(release.id, row.node_id, error);
                (NodeRunStatus::Failed, NodeOutcome::Failed)
            }
        };

        self.release_nodes.mark_finished(row.id, status, error).await?;
        self.releases
            .record_node_outcome(release.id, outcome, node_label, error)
            .await?;
        self.metrics.record_node_outcome(outcome.as_str());
        Ok(())
    }

    /// 节点计数可能已先一步把发布推进为 failed，此时保留节点错误汇总
    async fn fail_release(&self, release: &ReleaseTask, reason: &str) -> ReleaseResult<()> {
        self.releases.mark_failed(release.id, reason).await?;
        let failed = self.load(release.id).await?;
        if failed.status == ReleaseStatus::Failed {
            self.metrics
                .record_release_finished(ReleaseStrategy::Batch.as_str(), failed.status.as_str());
            StructuredLogger::log_release_finished(&failed);
        }
        Ok(())
    }

    /// 全部批次成功后收尾；计数已在最后一个节点上报时推进为 success
    async fn finish_release(&self, release_task_id: i64) -> ReleaseResult<ReleaseStatus> {
        let release = self.load(release_task_id).await?;
        if release.status == ReleaseStatus::Running {
            self.releases
                .transition_status(release.id, &[ReleaseStatus::Running], ReleaseStatus::Success)
                .await?;
        }

        let finished = self.load(release_task_id).await?;
        if finished.status.is_terminal() {
            self.metrics
                .record_release_finished(ReleaseStrategy::Batch.as_str(), finished.status.as_str());
            StructuredLogger::log_release_finished(&finished);
        }
        Ok(finished.status)
    }

    async fn load(&self, release_task_id: i64) -> ReleaseResult<ReleaseTask> {
        self.releases
            .find_by_id(release_task_id)
            .await?
            .ok_or(ReleaseError::ReleaseTaskNotFound {
                id: release_task_id,
            })
    }
}
