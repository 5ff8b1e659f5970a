use std::sync::Arc;

use release_core::{ReleaseError, ReleaseResult};
use release_domain::content_hash::content_hash;
use release_domain::entities::{NewReleaseTask, ReleaseStrategy, ReleaseTask};
use release_domain::repositories::ReleaseTaskRepository;
use release_domain::value_objects::DesiredState;
use release_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::{debug, instrument};

/// 插入与活跃发布冲突、而冲突方又已进入终态时的重试次数
const MAX_INSERT_ATTEMPTS: usize = 3;

/// 创建或复用的结果
#[derive(Debug, Clone)]
pub struct StoredRelease {
    pub task: ReleaseTask,
    pub reused: bool,
}

/// 发布任务存储服务
///
/// 同一 (目标类型, 目标ID, 内容摘要) 同时最多一个 pending/running 发布。
/// 收敛依赖数据库唯一索引，跨进程的并发创建也会落到同一个发布上。
#[derive(Clone)]
pub struct ReleaseTaskStore {
    releases: Arc<dyn ReleaseTaskRepository>,
    metrics: MetricsCollector,
}

impl ReleaseTaskStore {
    pub fn new(releases: Arc<dyn ReleaseTaskRepository>) -> Self {
        Self {
            releases,
            metrics: MetricsCollector::new(),
        }
    }

    #[instrument(skip(self, state), fields(target_type = %state.target_type, target_id = state.target_id))]
    pub async fn create_or_reuse(
        &self,
        state: &DesiredState,
        strategy: ReleaseStrategy,
    ) -> ReleaseResult<StoredRelease> {
        let hash = content_hash(state)?;
        let new_task = NewReleaseTask {
            target_type: state.target_type,
            target_id: state.target_id,
            line_group_id: state.line_group_id,
            content_hash: hash.clone(),
            strategy,
            payload: state.to_payload()?,
        };

        for attempt in 1..=MAX_INSERT_ATTEMPTS {
            if let Some(existing) = self
                .releases
                .find_active(state.target_type, state.target_id, &hash)
                .await?
            {
                return self.reuse(existing, strategy);
            }

            if let Some(created) = self.releases.try_insert(&new_task).await? {
                self.metrics.record_release_created(strategy.as_str());
                StructuredLogger::log_release_created(&created, false);
                return Ok(StoredRelease {
                    task: created,
                    reused: false,
                });
            }

            debug!("第 {} 次创建发布任务时与并发创建冲突，重新查找", attempt);
        }

        Err(ReleaseError::Conflict(format!(
            "目标 {}/{} 的发布任务并发创建冲突，请稍后重试",
            state.target_type, state.target_id
        )))
    }

    fn reuse(&self, task: ReleaseTask, strategy: ReleaseStrategy) -> ReleaseResult<StoredRelease> {
        if task.strategy != strategy {
            return Err(ReleaseError::Conflict(format!(
                "{} 正以 {} 方式执行，不能以 {} 方式复用",
                task.entity_description(),
                task.strategy,
                strategy
            )));
        }

        self.metrics.record_release_reused();
        StructuredLogger::log_release_created(&task, true);
        Ok(StoredRelease { task, reused: true })
    }
}
