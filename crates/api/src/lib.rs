//! # Release API
//!
//! 发布编排服务的 HTTP 接口，基于 Axum。
//!
//! ## API 端点
//!
//! ### 节点 Agent
//! - `POST /api/agent/tasks/pull` - 认领待执行的节点任务
//! - `POST /api/agent/tasks/{id}/status` - 上报节点任务执行结果
//!
//! ### 拉取式发布
//! - `POST /api/release-tasks` - 提交期望状态
//! - `POST /api/release-tasks/{id}/dispatch` - 手动分发
//! - `POST /api/release-tasks/{id}/retry` - 重试失败的发布
//! - `POST /api/release-tasks/{id}/pause` - 暂停
//! - `POST /api/release-tasks/{id}/resume` - 恢复
//!
//! ### 分批发布
//! - `POST /api/releases` - 创建分批/金丝雀发布
//! - `GET /api/releases/{id}` - 发布详情
//!
//! 错误统一为 JSON：不存在 404，参数错误 400，状态冲突 409，其余 500。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use release_core::{ApiConfig, DispatchConfig};
use release_dispatcher::ReleaseOrchestrator;
use release_infrastructure::DatabaseManager;
use release_worker::BatchReleasePlanner;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;

use middleware::{request_logging, request_timeout, trace_layer};
pub use routes::{create_routes, AppState};

impl AppState {
    /// 基于同一个数据库管理器组装全部服务
    pub fn from_database(db: Arc<DatabaseManager>, dispatch: DispatchConfig) -> Self {
        let orchestrator = Arc::new(ReleaseOrchestrator::from_database(&db, dispatch));
        Self {
            releases: orchestrator.clone(),
            gateway: orchestrator,
            batch_releases: Arc::new(BatchReleasePlanner::from_database(&db)),
            db,
        }
    }
}

/// 创建完整的API应用
pub fn create_app(state: AppState, api_config: &ApiConfig) -> Router {
    let timeout = Duration::from_secs(api_config.request_timeout_seconds);

    create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging))
            .layer(axum::middleware::from_fn_with_state(timeout, request_timeout)),
    )
}
