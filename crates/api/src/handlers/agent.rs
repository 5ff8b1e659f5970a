use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use release_dispatcher::StatusReport;
use release_domain::entities::{AgentTask, AgentTaskStatus, NodeOutcome, ReleaseStatus};
use serde::{Deserialize, Serialize};

use crate::{error::ApiResult, response::success, routes::AppState};

/// 节点拉取请求
#[derive(Debug, Deserialize)]
pub struct PullTasksRequest {
    pub node_id: i64,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PullTasksResponse {
    pub tasks: Vec<AgentTask>,
}

/// 节点执行结果上报
#[derive(Debug, Deserialize)]
pub struct ReportStatusRequest {
    pub node_id: i64,
    pub status: NodeOutcome,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportStatusResponse {
    pub agent_task_id: i64,
    pub status: AgentTaskStatus,
    pub release_task_id: i64,
    pub release_status: ReleaseStatus,
    pub release_finished: bool,
}

/// 认领节点待执行的任务
pub async fn pull_tasks(
    State(state): State<AppState>,
    Json(request): Json<PullTasksRequest>,
) -> ApiResult<impl IntoResponse> {
    let tasks = state
        .gateway
        .pull_tasks(request.node_id, request.limit)
        .await?;
    Ok(success(PullTasksResponse { tasks }))
}

pub async fn report_status(
    State(state): State<AppState>,
    Path(agent_task_id): Path<i64>,
    Json(request): Json<ReportStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .gateway
        .report_status(StatusReport {
            node_id: request.node_id,
            agent_task_id,
            outcome: request.status,
            last_error: request.last_error,
        })
        .await?;

    Ok(success(ReportStatusResponse {
        agent_task_id: outcome.agent_task.id,
        status: outcome.agent_task.status,
        release_task_id: outcome.release_task.id,
        release_status: outcome.release_task.status,
        release_finished: outcome.release_finished,
    }))
}
