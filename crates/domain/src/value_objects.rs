use serde::{Deserialize, Serialize};

use crate::entities::{AgentTaskStatus, NodeOutcome, TargetType};
use release_core::{ReleaseError, ReleaseResult};

/// 回源地址的角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OriginRole {
    Primary,
    Backup,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OriginEntry {
    pub address: String,
    pub role: OriginRole,
    pub protocol: String,
    pub weight: u32,
    pub enabled: bool,
}

/// 回源模式及其模式相关字段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OriginMode {
    /// 引用源站组，回源地址由源站组解析得到
    Group {
        origin_group_id: i64,
        origin_set_id: i64,
        origins: Vec<OriginEntry>,
    },
    /// 手工维护的回源地址集合
    Manual {
        origin_set_id: i64,
        origins: Vec<OriginEntry>,
    },
    Redirect {
        redirect_url: String,
        status_code: u16,
    },
}

impl OriginMode {
    pub fn name(&self) -> &'static str {
        match self {
            OriginMode::Group { .. } => "group",
            OriginMode::Manual { .. } => "manual",
            OriginMode::Redirect { .. } => "redirect",
        }
    }

    pub fn origins(&self) -> &[OriginEntry] {
        match self {
            OriginMode::Group { origins, .. } | OriginMode::Manual { origins, .. } => origins,
            OriginMode::Redirect { .. } => &[],
        }
    }
}

/// 目标完全解析后的期望状态，也是发布任务的负载快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredState {
    pub target_type: TargetType,
    pub target_id: i64,
    pub line_group_id: i64,
    pub domains: Vec<String>,
    #[serde(flatten)]
    pub mode: OriginMode,
}

const REDIRECT_STATUS_CODES: [u16; 4] = [301, 302, 307, 308];

impl DesiredState {
    /// 渲染前的必填项校验，失败时整个分发作为一次失败处理
    pub fn validate(&self) -> ReleaseResult<()> {
        if self.domains.is_empty() {
            return Err(ReleaseError::Validation("域名列表不能为空".to_string()));
        }

        if self.domains.iter().any(|d| d.trim().is_empty()) {
            return Err(ReleaseError::Validation("域名不能为空字符串".to_string()));
        }

        match &self.mode {
            OriginMode::Group { origins, .. } if origins.is_empty() => Err(
                ReleaseError::Validation("源站组模式下回源地址不能为空".to_string()),
            ),
            OriginMode::Redirect {
                redirect_url,
                status_code,
            } => {
                if redirect_url.trim().is_empty() {
                    return Err(ReleaseError::Validation("跳转地址不能为空".to_string()));
                }
                if !REDIRECT_STATUS_CODES.contains(status_code) {
                    return Err(ReleaseError::Validation(format!(
                        "不支持的跳转状态码: {status_code}"
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn from_payload(payload: &serde_json::Value) -> ReleaseResult<Self> {
        serde_json::from_value(payload.clone()).map_err(|e| {
            ReleaseError::Serialization(format!("发布负载无法解析为期望状态: {e}"))
        })
    }

    pub fn to_payload(&self) -> ReleaseResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// 由发布任务ID与节点ID派生的幂等键
pub fn idempotency_key(release_task_id: i64, node_id: i64) -> String {
    format!("release-{release_task_id}-node-{node_id}")
}

/// 下发给节点 Agent 的 apply_config 负载
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentTaskPayload {
    pub idempotency_key: String,
    pub release_task_id: i64,
    pub node_id: i64,
    pub target_type: TargetType,
    pub target_id: i64,
    pub content_hash: String,
    pub domains: Vec<String>,
    #[serde(flatten)]
    pub mode: OriginMode,
}

impl AgentTaskPayload {
    pub fn build(
        release_task_id: i64,
        node_id: i64,
        content_hash: &str,
        state: &DesiredState,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key(release_task_id, node_id),
            release_task_id,
            node_id,
            target_type: state.target_type,
            target_id: state.target_id,
            content_hash: content_hash.to_string(),
            domains: state.domains.clone(),
            mode: state.mode.clone(),
        }
    }
}

/// 节点任务分发结果
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchResult {
    pub target_node_count: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DispatchResult {
    /// 累加另一次分发的结果（补发时按发布逐个汇总）
    pub fn absorb(&mut self, other: &DispatchResult) {
        self.target_node_count += other.target_node_count;
        self.created += other.created;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// 节点任务完成上报
#[derive(Debug, Clone)]
pub struct AgentTaskCompletion {
    pub node_id: i64,
    pub agent_task_id: i64,
    pub outcome: NodeOutcome,
    pub error: Option<String>,
    /// 写入发布任务 last_error 时用于标识节点
    pub node_label: String,
}

/// 按状态统计的节点任务数量
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentTaskSummary {
    pub pending: i64,
    pub running: i64,
    pub success: i64,
    pub failed: i64,
    pub retrying: i64,
}

impl AgentTaskSummary {
    pub fn add(&mut self, status: AgentTaskStatus, count: i64) {
        match status {
            AgentTaskStatus::Pending => self.pending += count,
            AgentTaskStatus::Running => self.running += count,
            AgentTaskStatus::Success => self.success += count,
            AgentTaskStatus::Failed => self.failed += count,
            AgentTaskStatus::Retrying => self.retrying += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.running + self.success + self.failed + self.retrying
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(address: &str) -> OriginEntry {
        OriginEntry {
            address: address.to_string(),
            role: OriginRole::Primary,
            protocol: "http".to_string(),
            weight: 10,
            enabled: true,
        }
    }

    fn state(mode: OriginMode) -> DesiredState {
        DesiredState {
            target_type: TargetType::Website,
            target_id: 7,
            line_group_id: 2,
            domains: vec!["www.example.com".to_string()],
            mode,
        }
    }

    #[test]
    fn test_validate_requires_domains() {
        let mut s = state(OriginMode::Manual {
            origin_set_id: 1,
            origins: vec![],
        });
        assert!(s.validate().is_ok());
        s.domains.clear();
        assert!(matches!(s.validate(), Err(ReleaseError::Validation(_))));
    }

    #[test]
    fn test_validate_group_requires_origins() {
        let s = state(OriginMode::Group {
            origin_group_id: 1,
            origin_set_id: 2,
            origins: vec![],
        });
        assert!(s.validate().is_err());

        let s = state(OriginMode::Group {
            origin_group_id: 1,
            origin_set_id: 2,
            origins: vec![origin("10.0.0.1:80")],
        });
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_validate_redirect() {
        let s = state(OriginMode::Redirect {
            redirect_url: "https://example.org".to_string(),
            status_code: 200,
        });
        assert!(s.validate().is_err());

        let s = state(OriginMode::Redirect {
            redirect_url: "https://example.org".to_string(),
            status_code: 301,
        });
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_payload_flattens_mode_fields() {
        let s = state(OriginMode::Redirect {
            redirect_url: "https://example.org".to_string(),
            status_code: 302,
        });
        let payload = AgentTaskPayload::build(5, 9, "hash", &s);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["idempotency_key"], "release-5-node-9");
        assert_eq!(value["release_task_id"], 5);
        assert_eq!(value["mode"], "redirect");
        assert_eq!(value["status_code"], 302);
        assert!(value.get("origins").is_none());
    }

    #[test]
    fn test_desired_state_payload_round_trip() {
        let s = state(OriginMode::Group {
            origin_group_id: 4,
            origin_set_id: 8,
            origins: vec![origin("10.0.0.1:80")],
        });
        let payload = s.to_payload().unwrap();
        assert_eq!(DesiredState::from_payload(&payload).unwrap(), s);
    }
}
