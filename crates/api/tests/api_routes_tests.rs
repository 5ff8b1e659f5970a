use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use release_api::{create_app, AppState};
use release_core::{ApiConfig, DispatchConfig};
use release_domain::entities::TargetType;
use release_domain::value_objects::{DesiredState, OriginEntry, OriginMode, OriginRole};
use release_infrastructure::{DatabaseManager, TopologySeeder};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

struct Harness {
    _dir: TempDir,
    db: Arc<DatabaseManager>,
    app: Router,
    line_group: i64,
    node_ids: Vec<i64>,
}

async fn harness(nodes: &[&str]) -> Result<Harness> {
    let dir = TempDir::new()?;
    let url = format!("sqlite:{}", dir.path().join("api.db").display());
    let db = Arc::new(DatabaseManager::connect_url(&url).await?);
    db.migrate().await?;

    let seeder = TopologySeeder::new(&db);
    let (node_group, line_group) = seeder.line("south").await?;
    let mut node_ids = Vec::new();
    for name in nodes {
        node_ids.push(seeder.attached_node(name, node_group).await?);
    }

    let state = AppState::from_database(db.clone(), DispatchConfig::default());
    let app = create_app(state, &ApiConfig::default());
    Ok(Harness {
        _dir: dir,
        db,
        app,
        line_group,
        node_ids,
    })
}

fn desired_state(line_group_id: i64) -> Value {
    let state = DesiredState {
        target_type: TargetType::Website,
        target_id: 7,
        line_group_id,
        domains: vec!["img.example.com".to_string()],
        mode: OriginMode::Manual {
            origin_set_id: 3,
            origins: vec![OriginEntry {
                address: "10.1.1.1".to_string(),
                role: OriginRole::Primary,
                protocol: "http".to_string(),
                weight: 10,
                enabled: true,
            }],
        },
    };
    serde_json::to_value(state).unwrap()
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(serde_json::to_vec(&body)?))?,
        None => request.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, json))
}

#[tokio::test]
async fn test_health_reports_database() -> Result<()> {
    let h = harness(&[]).await?;
    let (status, body) = call(&h.app, "GET", "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
    Ok(())
}

#[tokio::test]
async fn test_submit_pull_report_round() -> Result<()> {
    let h = harness(&["a", "b"]).await?;

    let (status, body) = call(
        &h.app,
        "POST",
        "/api/release-tasks",
        Some(desired_state(h.line_group)),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["reused"], false);
    assert_eq!(body["data"]["dispatch"]["created"], 2);
    let release_id = body["data"]["release"]["id"].as_i64().unwrap();

    // 相同内容再次提交复用同一发布
    let (status, body) = call(
        &h.app,
        "POST",
        "/api/release-tasks",
        Some(desired_state(h.line_group)),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["reused"], true);
    assert_eq!(body["data"]["release"]["id"].as_i64(), Some(release_id));

    for node_id in &h.node_ids {
        let (status, body) = call(
            &h.app,
            "POST",
            "/api/agent/tasks/pull",
            Some(json!({ "node_id": node_id, "limit": 5 })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        let tasks = body["data"]["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["status"], "running");
        let task_id = tasks[0]["id"].as_i64().unwrap();

        let (status, body) = call(
            &h.app,
            "POST",
            &format!("/api/agent/tasks/{task_id}/status"),
            Some(json!({ "node_id": node_id, "status": "succeeded" })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "success");
    }

    let (status, body) = call(&h.app, "GET", &format!("/api/releases/{release_id}"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["release"]["status"], "success");
    assert_eq!(body["data"]["release"]["success_nodes"], 2);
    assert_eq!(body["data"]["agent_tasks"]["success"], 2);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_report_conflicts() -> Result<()> {
    let h = harness(&["a"]).await?;
    call(
        &h.app,
        "POST",
        "/api/release-tasks",
        Some(desired_state(h.line_group)),
    )
    .await?;

    let node_id = h.node_ids[0];
    let (_, body) = call(
        &h.app,
        "POST",
        "/api/agent/tasks/pull",
        Some(json!({ "node_id": node_id })),
    )
    .await?;
    let task_id = body["data"]["tasks"][0]["id"].as_i64().unwrap();
    let uri = format!("/api/agent/tasks/{task_id}/status");
    let report = json!({ "node_id": node_id, "status": "failed", "last_error": "reload failed" });

    let (status, _) = call(&h.app, "POST", &uri, Some(report.clone())).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&h.app, "POST", &uri, Some(report)).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], 409);
    Ok(())
}

#[tokio::test]
async fn test_error_mapping() -> Result<()> {
    let h = harness(&["a"]).await?;

    let (status, body) = call(&h.app, "GET", "/api/releases/999", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "RELEASE_TASK_NOT_FOUND");

    let (status, _) = call(
        &h.app,
        "POST",
        "/api/agent/tasks/pull",
        Some(json!({ "node_id": 4242 })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut invalid = desired_state(h.line_group);
    invalid["domains"] = json!([]);
    let (status, body) = call(&h.app, "POST", "/api/release-tasks", Some(invalid)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "VALIDATION_ERROR");

    let (status, _) = call(&h.app, "POST", "/api/release-tasks/999/retry", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_pause_and_resume_endpoints() -> Result<()> {
    let h = harness(&["a"]).await?;
    let (_, body) = call(
        &h.app,
        "POST",
        "/api/release-tasks",
        Some(desired_state(h.line_group)),
    )
    .await?;
    let release_id = body["data"]["release"]["id"].as_i64().unwrap();

    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/api/release-tasks/{release_id}/pause"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "paused");

    // 重复暂停与当前状态冲突
    let (status, _) = call(
        &h.app,
        "POST",
        &format!("/api/release-tasks/{release_id}/pause"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/api/release-tasks/{release_id}/resume"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "running");

    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/api/release-tasks/{release_id}/dispatch"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["skipped"], 1);
    assert_eq!(body["data"]["created"], 0);
    Ok(())
}

#[tokio::test]
async fn test_batch_release_endpoints() -> Result<()> {
    let h = harness(&["a", "b", "c"]).await?;

    let (status, body) = call(&h.app, "POST", "/api/releases", Some(desired_state(h.line_group))).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["total_nodes"], 3);
    assert_eq!(body["data"]["batches"].as_array().unwrap().len(), 2);
    let release_id = body["data"]["release_id"].as_i64().unwrap();

    let (status, body) = call(&h.app, "GET", &format!("/api/releases/{release_id}"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["release"]["strategy"], "batch");
    assert_eq!(body["data"]["release"]["status"], "pending");
    let batches = body["data"]["batches"].as_array().unwrap();
    assert_eq!(batches[0]["nodes"][0]["node_id"].as_i64(), Some(h.node_ids[0]));
    assert_eq!(batches[1]["nodes"].as_array().unwrap().len(), 2);

    // 拉取式发布不能在分批发布进行中复用同一内容
    let (status, _) = call(
        &h.app,
        "POST",
        "/api/release-tasks",
        Some(desired_state(h.line_group)),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn test_batch_release_without_nodes_is_rejected() -> Result<()> {
    let h = harness(&[]).await?;
    let (status, body) = call(&h.app, "POST", "/api/releases", Some(desired_state(h.line_group))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "NO_ELIGIBLE_NODES");

    let releases = h.db.release_task_repository();
    assert!(releases.find_by_id(1).await?.is_none());
    Ok(())
}
