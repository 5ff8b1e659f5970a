use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use release_domain::value_objects::DesiredState;

use crate::{
    error::ApiResult,
    response::{created, success},
    routes::AppState,
};

/// 创建分批/金丝雀发布，由后台执行器推进
pub async fn create_release(
    State(state): State<AppState>,
    Json(desired): Json<DesiredState>,
) -> ApiResult<impl IntoResponse> {
    let release = state.batch_releases.create_release(desired).await?;
    Ok(created(release))
}

/// 发布详情，两种执行方式通用
pub async fn get_release(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let view = state.releases.get_release(id).await?;
    Ok(success(view))
}
