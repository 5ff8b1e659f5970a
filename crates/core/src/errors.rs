use thiserror::Error;

/// 发布编排错误类型定义
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("发布任务未找到: {id}")]
    ReleaseTaskNotFound { id: i64 },

    #[error("节点任务未找到: {id}")]
    AgentTaskNotFound { id: i64 },

    #[error("节点未找到: {id}")]
    NodeNotFound { id: i64 },

    #[error("线路组未找到: {id}")]
    LineGroupNotFound { id: i64 },

    #[error("没有可用节点: 线路组 {line_group_id}")]
    NoEligibleNodes { line_group_id: i64 },

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("状态冲突: {0}")]
    Conflict(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("节点Agent请求失败: {0}")]
    AgentRequest(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl ReleaseError {
    /// 是否属于调用方可修正的错误（校验/冲突/不存在）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ReleaseError::ReleaseTaskNotFound { .. }
                | ReleaseError::AgentTaskNotFound { .. }
                | ReleaseError::NodeNotFound { .. }
                | ReleaseError::LineGroupNotFound { .. }
                | ReleaseError::NoEligibleNodes { .. }
                | ReleaseError::Validation(_)
                | ReleaseError::Conflict(_)
        )
    }
}

impl From<serde_json::Error> for ReleaseError {
    fn from(err: serde_json::Error) -> Self {
        ReleaseError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type ReleaseResult<T> = std::result::Result<T, ReleaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(ReleaseError::Validation("domains".into()).is_client_error());
        assert!(ReleaseError::Conflict("running".into()).is_client_error());
        assert!(ReleaseError::ReleaseTaskNotFound { id: 1 }.is_client_error());
        assert!(!ReleaseError::Internal("boom".into()).is_client_error());
        assert!(!ReleaseError::AgentRequest("timeout".into()).is_client_error());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let converted: ReleaseError = err.into();
        assert!(matches!(converted, ReleaseError::Serialization(_)));
    }

    #[test]
    fn test_error_display() {
        let err = ReleaseError::NoEligibleNodes { line_group_id: 7 };
        assert_eq!(err.to_string(), "没有可用节点: 线路组 7");
    }
}
