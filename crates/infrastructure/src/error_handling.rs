//! 仓储操作的错误处理辅助
//!
//! 数据库错误统一在这里记录带上下文的结构化日志并转换为 `ReleaseError`。

use std::fmt;

use release_core::ReleaseError;
use release_domain::entities::AgentTask;
use release_domain::value_objects::AgentTaskCompletion;
use sqlx::Error as SqlxError;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Claim,
    Complete,
    Query,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Claim => write!(f, "认领"),
            RepositoryOperation::Complete => write!(f, "完成"),
            RepositoryOperation::Query => write!(f, "查询"),
        }
    }
}

pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    /// 记录数据库错误并转换为领域错误
    pub fn database_error(
        operation: RepositoryOperation,
        entity: &str,
        entity_id: Option<i64>,
        err: SqlxError,
    ) -> ReleaseError {
        match entity_id {
            Some(id) => error!(
                operation = %operation,
                entity = entity,
                entity_id = id,
                error = %err,
                "{}{}失败",
                operation,
                entity
            ),
            None => error!(
                operation = %operation,
                entity = entity,
                error = %err,
                "{}{}失败",
                operation,
                entity
            ),
        }
        ReleaseError::Database(err)
    }

    /// 唯一约束冲突转换为状态冲突，其余按数据库错误处理
    pub fn conflict_or_database(
        operation: RepositoryOperation,
        entity: &str,
        entity_id: Option<i64>,
        err: SqlxError,
        conflict_message: impl Into<String>,
    ) -> ReleaseError {
        if is_unique_violation(&err) {
            let message = conflict_message.into();
            warn!(
                operation = %operation,
                entity = entity,
                "唯一约束冲突: {}",
                message
            );
            return ReleaseError::Conflict(message);
        }
        Self::database_error(operation, entity, entity_id, err)
    }

    pub fn payload_error(entity: &str, id: i64, err: serde_json::Error) -> ReleaseError {
        error!(entity = entity, entity_id = id, error = %err, "负载解析失败");
        ReleaseError::Serialization(format!("{entity} {id} 负载解析失败: {err}"))
    }

    /// 条件更新未命中时给出具体的拒绝原因
    pub fn rejected_completion(
        completion: &AgentTaskCompletion,
        existing: Option<AgentTask>,
    ) -> ReleaseError {
        match existing {
            None => ReleaseError::AgentTaskNotFound {
                id: completion.agent_task_id,
            },
            Some(task) if task.node_id != completion.node_id => {
                warn!(
                    "节点 {} 试图上报不属于自己的节点任务 {}",
                    completion.node_id, task.id
                );
                ReleaseError::Conflict(format!(
                    "节点任务 {} 不属于节点 {}",
                    task.id, completion.node_id
                ))
            }
            Some(task) => ReleaseError::Conflict(format!(
                "节点任务 {} 当前状态为 {}，只有 running 状态可以上报结果",
                task.id, task.status
            )),
        }
    }
}

pub fn is_unique_violation(err: &SqlxError) -> bool {
    match err {
        SqlxError::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
