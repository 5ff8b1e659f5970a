use axum::{
    routing::{get, post},
    Router,
};
use release_dispatcher::{AgentGatewayService, ReleaseControlService};
use release_infrastructure::DatabaseManager;
use release_worker::BatchReleaseService;
use std::sync::Arc;

use crate::handlers::{
    agent::{pull_tasks, report_status},
    health::health_check,
    release_tasks::{
        dispatch_release_task, pause_release_task, resume_release_task, retry_release_task,
        submit_release_task,
    },
    releases::{create_release, get_release},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub releases: Arc<dyn ReleaseControlService>,
    pub gateway: Arc<dyn AgentGatewayService>,
    pub batch_releases: Arc<dyn BatchReleaseService>,
    pub db: Arc<DatabaseManager>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 节点 Agent 拉取与上报
        .route("/api/agent/tasks/pull", post(pull_tasks))
        .route("/api/agent/tasks/{id}/status", post(report_status))
        // 拉取式发布
        .route("/api/release-tasks", post(submit_release_task))
        .route("/api/release-tasks/{id}/dispatch", post(dispatch_release_task))
        .route("/api/release-tasks/{id}/retry", post(retry_release_task))
        .route("/api/release-tasks/{id}/pause", post(pause_release_task))
        .route("/api/release-tasks/{id}/resume", post(resume_release_task))
        // 分批发布与发布详情
        .route("/api/releases", post(create_release))
        .route("/api/releases/{id}", get(get_release))
        .with_state(state)
}
