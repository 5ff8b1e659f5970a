use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use release_domain::value_objects::DesiredState;

use crate::{
    error::ApiResult,
    response::{created, success, ApiResponse},
    routes::AppState,
};

/// 提交期望状态，创建或复用拉取式发布并立即分发
pub async fn submit_release_task(
    State(state): State<AppState>,
    Json(desired): Json<DesiredState>,
) -> ApiResult<Response> {
    let outcome = state.releases.submit(desired).await?;
    if outcome.reused {
        let message = format!("已复用进行中的发布任务 {}", outcome.release.id);
        return Ok((
            StatusCode::OK,
            ApiResponse::success_with_message(outcome, message),
        )
            .into_response());
    }
    Ok(created(outcome).into_response())
}

/// 手动触发分发，可重复调用
pub async fn dispatch_release_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let result = state.releases.dispatch(id).await?;
    Ok(success(result))
}

pub async fn retry_release_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let release = state.releases.retry(id).await?;
    Ok(success(release))
}

pub async fn pause_release_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let release = state.releases.pause(id).await?;
    Ok(success(release))
}

pub async fn resume_release_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let release = state.releases.resume(id).await?;
    Ok(success(release))
}
