use std::collections::HashSet;

use anyhow::Result;
use release_core::ReleaseError;
use release_domain::entities::{
    AgentTaskStatus, AgentTaskType, NewAgentTask, NewReleaseTask, NodeOutcome, NodeRunStatus,
    ReleaseStatus, ReleaseStrategy, TargetType,
};
use release_domain::value_objects::{idempotency_key, AgentTaskCompletion};
use release_infrastructure::database::DatabaseManager;
use serde_json::json;
use tempfile::TempDir;

async fn setup() -> Result<(TempDir, DatabaseManager)> {
    let dir = TempDir::new()?;
    let url = format!("sqlite:{}", dir.path().join("release.db").display());
    let db = DatabaseManager::connect_url(&url).await?;
    db.migrate().await?;
    Ok((dir, db))
}

fn new_release(target_id: i64, hash: &str) -> NewReleaseTask {
    NewReleaseTask {
        target_type: TargetType::Website,
        target_id,
        line_group_id: 1,
        content_hash: hash.to_string(),
        strategy: ReleaseStrategy::Pull,
        payload: json!({"domains": ["www.example.com"]}),
    }
}

fn new_agent_task(release_task_id: i64, node_id: i64) -> NewAgentTask {
    NewAgentTask {
        release_task_id,
        node_id,
        task_type: AgentTaskType::ApplyConfig,
        idempotency_key: idempotency_key(release_task_id, node_id),
        payload: json!({"release_task_id": release_task_id, "node_id": node_id}),
    }
}

fn completion(node_id: i64, agent_task_id: i64, outcome: NodeOutcome) -> AgentTaskCompletion {
    AgentTaskCompletion {
        node_id,
        agent_task_id,
        outcome,
        error: match outcome {
            NodeOutcome::Succeeded => None,
            NodeOutcome::Failed => Some("nginx reload failed".to_string()),
        },
        node_label: format!("node n{node_id} ({node_id})"),
    }
}

#[tokio::test]
async fn test_agent_task_insert_is_idempotent() -> Result<()> {
    let (_dir, db) = setup().await?;
    let releases = db.release_task_repository();
    let agent_tasks = db.agent_task_repository();

    let release = releases.try_insert(&new_release(1, "h1")).await?.unwrap();
    let first = agent_tasks
        .insert_if_absent(&new_agent_task(release.id, 7))
        .await?
        .unwrap();
    assert_eq!(first.status, AgentTaskStatus::Pending);
    assert_eq!(first.idempotency_key(), Some("release-1-node-7"));

    assert!(agent_tasks
        .insert_if_absent(&new_agent_task(release.id, 7))
        .await?
        .is_none());

    let found = agent_tasks
        .find_by_idempotency_key(&idempotency_key(release.id, 7))
        .await?
        .unwrap();
    assert_eq!(found.id, first.id);
    assert_eq!(agent_tasks.find_by_release(release.id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_claims_never_overlap() -> Result<()> {
    let (_dir, db) = setup().await?;
    let releases = db.release_task_repository();
    let agent_tasks = db.agent_task_repository();

    for target in 0..20 {
        let release = releases
            .try_insert(&new_release(target, "same-content"))
            .await?
            .unwrap();
        agent_tasks
            .insert_if_absent(&new_agent_task(release.id, 3))
            .await?;
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let repo = db.agent_task_repository();
        handles.push(tokio::spawn(async move {
            let ids = repo.select_claimable_ids(3, 20).await?;
            repo.claim(3, &ids).await
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        let tasks = handle.await??;
        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        claimed.extend(ids);
    }

    let unique: HashSet<i64> = claimed.iter().copied().collect();
    assert_eq!(unique.len(), claimed.len());
    assert_eq!(claimed.len(), 20);
    assert!(agent_tasks.select_claimable_ids(3, 20).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_claim_only_returns_own_claimable_tasks() -> Result<()> {
    let (_dir, db) = setup().await?;
    let releases = db.release_task_repository();
    let agent_tasks = db.agent_task_repository();

    let release = releases.try_insert(&new_release(1, "h1")).await?.unwrap();
    let mine = agent_tasks
        .insert_if_absent(&new_agent_task(release.id, 1))
        .await?
        .unwrap();
    let theirs = agent_tasks
        .insert_if_absent(&new_agent_task(release.id, 2))
        .await?
        .unwrap();

    let claimed = agent_tasks.claim(1, &[mine.id, theirs.id]).await?;
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, mine.id);
    assert_eq!(claimed[0].status, AgentTaskStatus::Running);
    assert!(claimed[0].claimed_at.is_some());

    assert!(agent_tasks.claim(1, &[mine.id]).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_completion_drives_release_to_terminal_state() -> Result<()> {
    let (_dir, db) = setup().await?;
    let releases = db.release_task_repository();
    let agent_tasks = db.agent_task_repository();

    let release = releases.try_insert(&new_release(1, "h1")).await?.unwrap();
    let a = agent_tasks
        .insert_if_absent(&new_agent_task(release.id, 1))
        .await?
        .unwrap();
    let b = agent_tasks
        .insert_if_absent(&new_agent_task(release.id, 2))
        .await?
        .unwrap();

    let synced = releases.sync_total_nodes(release.id).await?;
    assert_eq!(synced.total_nodes, 2);
    assert_eq!(synced.status, ReleaseStatus::Running);

    agent_tasks.claim(1, &[a.id]).await?;
    agent_tasks.claim(2, &[b.id]).await?;

    let first = agent_tasks
        .complete(&completion(1, a.id, NodeOutcome::Succeeded))
        .await?;
    assert!(!first.release_finished);
    assert_eq!(first.agent_task.status, AgentTaskStatus::Success);
    assert_eq!(first.release_task.status, ReleaseStatus::Running);
    assert_eq!(first.release_task.success_nodes, 1);

    let second = agent_tasks
        .complete(&completion(2, b.id, NodeOutcome::Failed))
        .await?;
    assert!(second.release_finished);
    assert_eq!(second.release_task.status, ReleaseStatus::Failed);
    assert_eq!(second.release_task.failed_nodes, 1);
    assert_eq!(
        second.release_task.last_error.as_deref(),
        Some("node n2 (2): nginx reload failed")
    );

    let stored = releases.find_by_id(release.id).await?.unwrap();
    assert_eq!(stored.status, ReleaseStatus::Failed);
    assert!(stored.success_nodes + stored.failed_nodes <= stored.total_nodes);
    Ok(())
}

#[tokio::test]
async fn test_completion_rejects_invalid_reports() -> Result<()> {
    let (_dir, db) = setup().await?;
    let releases = db.release_task_repository();
    let agent_tasks = db.agent_task_repository();

    let release = releases.try_insert(&new_release(1, "h1")).await?.unwrap();
    let task = agent_tasks
        .insert_if_absent(&new_agent_task(release.id, 1))
        .await?
        .unwrap();

    let not_claimed = agent_tasks
        .complete(&completion(1, task.id, NodeOutcome::Succeeded))
        .await
        .unwrap_err();
    assert!(matches!(not_claimed, ReleaseError::Conflict(_)));

    agent_tasks.claim(1, &[task.id]).await?;
    let wrong_node = agent_tasks
        .complete(&completion(2, task.id, NodeOutcome::Succeeded))
        .await
        .unwrap_err();
    assert!(matches!(wrong_node, ReleaseError::Conflict(_)));

    let missing = agent_tasks
        .complete(&completion(1, 4242, NodeOutcome::Succeeded))
        .await
        .unwrap_err();
    assert!(matches!(missing, ReleaseError::AgentTaskNotFound { id: 4242 }));

    agent_tasks
        .complete(&completion(1, task.id, NodeOutcome::Succeeded))
        .await?;
    let duplicate = agent_tasks
        .complete(&completion(1, task.id, NodeOutcome::Succeeded))
        .await
        .unwrap_err();
    assert!(matches!(duplicate, ReleaseError::Conflict(_)));
    Ok(())
}

#[tokio::test]
async fn test_retry_requeues_failed_agent_tasks() -> Result<()> {
    let (_dir, db) = setup().await?;
    let releases = db.release_task_repository();
    let agent_tasks = db.agent_task_repository();

    let release = releases.try_insert(&new_release(1, "h1")).await?.unwrap();
    let task = agent_tasks
        .insert_if_absent(&new_agent_task(release.id, 1))
        .await?
        .unwrap();
    releases.sync_total_nodes(release.id).await?;
    agent_tasks.claim(1, &[task.id]).await?;
    agent_tasks
        .complete(&completion(1, task.id, NodeOutcome::Failed))
        .await?;

    let retried = releases.reset_for_retry(release.id).await?;
    assert_eq!(retried.status, ReleaseStatus::Pending);
    assert_eq!(retried.failed_nodes, 0);
    assert_eq!(retried.retry_count, 1);

    let summary = agent_tasks.summarize_release(release.id).await?;
    assert_eq!(summary.retrying, 1);
    assert_eq!(summary.total(), 1);
    assert_eq!(agent_tasks.select_claimable_ids(1, 10).await?, vec![task.id]);
    Ok(())
}

#[tokio::test]
async fn test_batch_allocation_is_stable() -> Result<()> {
    let (_dir, db) = setup().await?;
    let releases = db.release_task_repository();
    let nodes = db.release_task_node_repository();

    let mut batch_release = new_release(1, "h1");
    batch_release.strategy = ReleaseStrategy::Batch;
    let release = releases.try_insert(&batch_release).await?.unwrap();

    let allocated = nodes.allocate(release.id, &[vec![1], vec![2, 3]]).await?;
    assert_eq!(allocated.len(), 3);
    assert_eq!(allocated[0].batch, 1);
    assert_eq!(allocated[0].node_id, 1);

    // 重新分配不改变已有批次
    let again = nodes.allocate(release.id, &[vec![3], vec![1, 2]]).await?;
    assert_eq!(again.len(), 3);
    assert_eq!(again[0].node_id, 1);
    assert_eq!(again[0].batch, 1);

    nodes.mark_running(allocated[0].id, "agent-task-1").await?;
    nodes
        .mark_finished(allocated[0].id, NodeRunStatus::Failed, Some("apply failed"))
        .await?;
    assert_eq!(nodes.skip_pending_from(release.id, 1).await?, 2);

    let after_skip = nodes.find_by_release(release.id).await?;
    assert_eq!(after_skip[0].status, NodeRunStatus::Failed);
    assert_eq!(after_skip[0].agent_task_ref.as_deref(), Some("agent-task-1"));
    assert!(after_skip[1..]
        .iter()
        .all(|n| n.status == NodeRunStatus::Skipped));

    assert_eq!(nodes.requeue_unfinished(release.id).await?, 3);
    let requeued = nodes.find_by_release(release.id).await?;
    assert!(requeued.iter().all(|n| n.status == NodeRunStatus::Pending));
    Ok(())
}
