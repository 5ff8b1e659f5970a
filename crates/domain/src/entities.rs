use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 节点运行状态：在线
pub const NODE_STATUS_ONLINE: &str = "online";
/// 节点IP状态：可用
pub const NODE_IP_STATUS_ACTIVE: &str = "active";

/// 发布目标的业务实体类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Website,
    OriginSet,
}

text_enum!(TargetType {
    Website => "website",
    OriginSet => "origin_set",
});

/// 发布任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Pending,
    Running,
    Success,
    Failed,
    Paused,
}

text_enum!(ReleaseStatus {
    Pending => "pending",
    Running => "running",
    Success => "success",
    Failed => "failed",
    Paused => "paused",
});

impl ReleaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReleaseStatus::Success | ReleaseStatus::Failed)
    }

    /// pending/running 构成幂等边界：同一 (目标, 摘要) 至多一条
    pub fn is_active(&self) -> bool {
        matches!(self, ReleaseStatus::Pending | ReleaseStatus::Running)
    }
}

/// 发布执行方式：节点拉取，或分批主动推送
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStrategy {
    Pull,
    Batch,
}

text_enum!(ReleaseStrategy {
    Pull => "pull",
    Batch => "batch",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentTaskType {
    ApplyConfig,
    PurgeCache,
    Reload,
}

text_enum!(AgentTaskType {
    ApplyConfig => "apply_config",
    PurgeCache => "purge_cache",
    Reload => "reload",
});

/// 节点任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentTaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Retrying,
}

text_enum!(AgentTaskStatus {
    Pending => "pending",
    Running => "running",
    Success => "success",
    Failed => "failed",
    Retrying => "retrying",
});

impl AgentTaskStatus {
    pub fn is_claimable(&self) -> bool {
        matches!(self, AgentTaskStatus::Pending | AgentTaskStatus::Retrying)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentTaskStatus::Success | AgentTaskStatus::Failed)
    }
}

/// 分批发布中单个节点的状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

text_enum!(NodeRunStatus {
    Pending => "pending",
    Running => "running",
    Success => "success",
    Failed => "failed",
    Skipped => "skipped",
});

impl NodeRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeRunStatus::Success | NodeRunStatus::Failed | NodeRunStatus::Skipped
        )
    }
}

/// 单个节点的执行结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutcome {
    Succeeded,
    Failed,
}

impl NodeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeOutcome::Succeeded => "succeeded",
            NodeOutcome::Failed => "failed",
        }
    }

    pub fn agent_task_status(&self) -> AgentTaskStatus {
        match self {
            NodeOutcome::Succeeded => AgentTaskStatus::Success,
            NodeOutcome::Failed => AgentTaskStatus::Failed,
        }
    }
}

/// 发布任务：目标收敛到某个内容摘要的聚合记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseTask {
    pub id: i64,
    pub target_type: TargetType,
    pub target_id: i64,
    pub line_group_id: i64,
    pub content_hash: String,
    pub strategy: ReleaseStrategy,
    pub status: ReleaseStatus,
    pub total_nodes: i32,
    pub success_nodes: i32,
    pub failed_nodes: i32,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReleaseTask {
    pub fn reported_nodes(&self) -> i32 {
        self.success_nodes + self.failed_nodes
    }

    pub fn all_reported(&self) -> bool {
        self.total_nodes > 0 && self.reported_nodes() >= self.total_nodes
    }

    /// 记录一个节点的结果并在全部节点上报后推进到终态。
    ///
    /// 计数只增不减；任务已处于终态时只累加计数，不再改变状态。
    /// 返回本次是否将任务推进到了终态。
    pub fn apply_node_outcome(
        &mut self,
        outcome: NodeOutcome,
        node_label: &str,
        error: Option<&str>,
    ) -> bool {
        match outcome {
            NodeOutcome::Succeeded => self.success_nodes += 1,
            NodeOutcome::Failed => {
                self.failed_nodes += 1;
                let line = format!("{}: {}", node_label, error.unwrap_or("unknown error"));
                self.last_error = Some(match self.last_error.take() {
                    Some(existing) if !existing.is_empty() => format!("{existing}\n{line}"),
                    _ => line,
                });
            }
        }

        if self.status.is_terminal() || self.status == ReleaseStatus::Paused {
            return false;
        }

        if self.all_reported() {
            self.status = if self.failed_nodes > 0 {
                ReleaseStatus::Failed
            } else {
                ReleaseStatus::Success
            };
            return true;
        }

        false
    }

    /// total_nodes 同步后的状态：有节点任务的 pending 推进为 running，
    /// 全部节点已上报的活跃发布直接收敛到终态
    pub fn status_after_sync(&self) -> ReleaseStatus {
        if !self.status.is_active() {
            return self.status;
        }
        if self.all_reported() {
            return if self.failed_nodes > 0 {
                ReleaseStatus::Failed
            } else {
                ReleaseStatus::Success
            };
        }
        if self.total_nodes > 0 {
            ReleaseStatus::Running
        } else {
            self.status
        }
    }

    pub fn entity_description(&self) -> String {
        format!(
            "发布任务 (ID: {}, 目标: {}/{}, 摘要: {})",
            self.id,
            self.target_type,
            self.target_id,
            short_hash(&self.content_hash)
        )
    }
}

/// 待插入的发布任务
#[derive(Debug, Clone)]
pub struct NewReleaseTask {
    pub target_type: TargetType,
    pub target_id: i64,
    pub line_group_id: i64,
    pub content_hash: String,
    pub strategy: ReleaseStrategy,
    pub payload: serde_json::Value,
}

/// 节点任务：某个发布在单个节点上的工作项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: i64,
    pub release_task_id: i64,
    pub node_id: i64,
    pub task_type: AgentTaskType,
    pub payload: serde_json::Value,
    pub status: AgentTaskStatus,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentTask {
    pub fn idempotency_key(&self) -> Option<&str> {
        self.payload.get("idempotency_key").and_then(|v| v.as_str())
    }

    /// 从负载中解析所属发布任务ID
    pub fn payload_release_task_id(&self) -> Option<i64> {
        release_task_id_from_payload(&self.payload)
    }
}

pub fn release_task_id_from_payload(payload: &serde_json::Value) -> Option<i64> {
    payload.get("release_task_id").and_then(|v| v.as_i64())
}

/// 待插入的节点任务，幂等键包含在负载内
#[derive(Debug, Clone)]
pub struct NewAgentTask {
    pub release_task_id: i64,
    pub node_id: i64,
    pub task_type: AgentTaskType,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
}

/// 分批发布中的节点记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseTaskNode {
    pub id: i64,
    pub release_task_id: i64,
    pub node_id: i64,
    pub batch: i32,
    pub status: NodeRunStatus,
    pub agent_task_ref: Option<String>,
    pub error_msg: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub enabled: bool,
    pub status: String,
}

impl Node {
    pub fn is_online(&self) -> bool {
        self.enabled && self.status == NODE_STATUS_ONLINE
    }

    /// 用于错误信息中标识节点
    pub fn label(&self) -> String {
        format!("node {} ({})", self.name, self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGroup {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIp {
    pub id: i64,
    pub node_id: i64,
    pub node_group_id: i64,
    pub ip: String,
    pub enabled: bool,
    pub status: String,
}

/// 线路组：将目标流量绑定到一个节点组
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineGroup {
    pub id: i64,
    pub name: String,
    pub node_group_id: i64,
}

pub fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(total: i32) -> ReleaseTask {
        let now = Utc::now();
        ReleaseTask {
            id: 1,
            target_type: TargetType::Website,
            target_id: 10,
            line_group_id: 3,
            content_hash: "abcdef0123456789".to_string(),
            strategy: ReleaseStrategy::Pull,
            status: ReleaseStatus::Running,
            total_nodes: total,
            success_nodes: 0,
            failed_nodes: 0,
            retry_count: 0,
            last_error: None,
            payload: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_text_round_trip() {
        for status in [
            ReleaseStatus::Pending,
            ReleaseStatus::Running,
            ReleaseStatus::Success,
            ReleaseStatus::Failed,
            ReleaseStatus::Paused,
        ] {
            assert_eq!(status.as_str().parse::<ReleaseStatus>().unwrap(), status);
        }
        assert!("done".parse::<ReleaseStatus>().is_err());
        assert_eq!(AgentTaskType::ApplyConfig.to_string(), "apply_config");
    }

    #[test]
    fn test_release_becomes_success_when_all_nodes_succeed() {
        let mut task = release(2);
        assert!(!task.apply_node_outcome(NodeOutcome::Succeeded, "node a (1)", None));
        assert_eq!(task.status, ReleaseStatus::Running);
        assert!(task.apply_node_outcome(NodeOutcome::Succeeded, "node b (2)", None));
        assert_eq!(task.status, ReleaseStatus::Success);
        assert!(task.last_error.is_none());
    }

    #[test]
    fn test_release_fails_when_any_node_fails() {
        let mut task = release(2);
        task.apply_node_outcome(NodeOutcome::Succeeded, "node A (1)", None);
        let finished =
            task.apply_node_outcome(NodeOutcome::Failed, "node B (2)", Some("nginx -t failed"));
        assert!(finished);
        assert_eq!(task.status, ReleaseStatus::Failed);
        let error = task.last_error.unwrap();
        assert!(error.contains("node B (2)"));
        assert!(error.contains("nginx -t failed"));
    }

    #[test]
    fn test_errors_are_appended() {
        let mut task = release(3);
        task.apply_node_outcome(NodeOutcome::Failed, "node a (1)", Some("e1"));
        task.apply_node_outcome(NodeOutcome::Failed, "node b (2)", Some("e2"));
        assert_eq!(task.last_error.as_deref(), Some("node a (1): e1\nnode b (2): e2"));
        assert_eq!(task.status, ReleaseStatus::Running);
    }

    #[test]
    fn test_terminal_release_only_counts() {
        let mut task = release(1);
        task.status = ReleaseStatus::Failed;
        assert!(!task.apply_node_outcome(NodeOutcome::Succeeded, "node a (1)", None));
        assert_eq!(task.status, ReleaseStatus::Failed);
        assert_eq!(task.success_nodes, 1);
    }

    #[test]
    fn test_status_after_sync() {
        let mut task = release(0);
        task.status = ReleaseStatus::Pending;
        assert_eq!(task.status_after_sync(), ReleaseStatus::Pending);

        task.total_nodes = 2;
        assert_eq!(task.status_after_sync(), ReleaseStatus::Running);

        task.success_nodes = 1;
        task.failed_nodes = 1;
        assert_eq!(task.status_after_sync(), ReleaseStatus::Failed);

        task.status = ReleaseStatus::Paused;
        assert_eq!(task.status_after_sync(), ReleaseStatus::Paused);
    }

    #[test]
    fn test_payload_release_id() {
        let payload = serde_json::json!({"release_task_id": 42, "idempotency_key": "k"});
        assert_eq!(release_task_id_from_payload(&payload), Some(42));
        assert_eq!(release_task_id_from_payload(&serde_json::json!({})), None);
    }
}
