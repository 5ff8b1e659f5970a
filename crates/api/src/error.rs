use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use release_core::ReleaseError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Release(err) => match err {
                ReleaseError::ReleaseTaskNotFound { .. }
                | ReleaseError::AgentTaskNotFound { .. }
                | ReleaseError::NodeNotFound { .. }
                | ReleaseError::LineGroupNotFound { .. } => StatusCode::NOT_FOUND,
                ReleaseError::Conflict(_) => StatusCode::CONFLICT,
                err if err.is_client_error() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Release(err) => match err {
                ReleaseError::ReleaseTaskNotFound { .. } => "RELEASE_TASK_NOT_FOUND",
                ReleaseError::AgentTaskNotFound { .. } => "AGENT_TASK_NOT_FOUND",
                ReleaseError::NodeNotFound { .. } => "NODE_NOT_FOUND",
                ReleaseError::LineGroupNotFound { .. } => "LINE_GROUP_NOT_FOUND",
                ReleaseError::NoEligibleNodes { .. } => "NO_ELIGIBLE_NODES",
                ReleaseError::Validation(_) => "VALIDATION_ERROR",
                ReleaseError::Conflict(_) => "CONFLICT",
                _ => "INTERNAL_ERROR",
            },
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // 服务端错误不向调用方暴露内部细节
        let message = if status.is_server_error() {
            error!("请求处理失败: {}", self);
            "系统内部错误".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": self.error_type(),
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_variants_map_to_404() {
        for err in [
            ReleaseError::ReleaseTaskNotFound { id: 1 },
            ReleaseError::AgentTaskNotFound { id: 2 },
            ReleaseError::NodeNotFound { id: 3 },
            ReleaseError::LineGroupNotFound { id: 4 },
        ] {
            assert_eq!(ApiError::from(err).status_code(), StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn test_client_errors_map_to_400_and_409() {
        let validation: ApiError = ReleaseError::Validation("domains 不能为空".into()).into();
        assert_eq!(validation.status_code(), StatusCode::BAD_REQUEST);

        let no_nodes: ApiError = ReleaseError::NoEligibleNodes { line_group_id: 9 }.into();
        assert_eq!(no_nodes.status_code(), StatusCode::BAD_REQUEST);

        let conflict: ApiError = ReleaseError::Conflict("paused".into()).into();
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_server_errors_map_to_500() {
        let agent: ApiError = ReleaseError::AgentRequest("timeout".into()).into();
        assert_eq!(agent.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let internal = ApiError::Internal("boom".into());
        assert_eq!(internal.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
