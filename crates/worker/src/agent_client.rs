use std::time::Duration;

use async_trait::async_trait;
use release_core::{ReleaseError, ReleaseResult};
use release_domain::entities::Node;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

/// 节点 Agent 上任务的执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTaskState {
    InProgress,
    Succeeded,
    Failed,
}

impl RemoteTaskState {
    /// 无法识别的状态按执行中处理，由轮询上限兜底
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "success" | "succeeded" | "done" => RemoteTaskState::Succeeded,
            "failed" | "error" => RemoteTaskState::Failed,
            _ => RemoteTaskState::InProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTaskStatus {
    pub state: RemoteTaskState,
    pub last_error: Option<String>,
}

/// 节点 Agent 客户端
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// 下发指定版本，返回 Agent 侧的任务ID
    async fn dispatch(&self, node: &Node, version: &str) -> ReleaseResult<String>;

    async fn query(&self, node: &Node, task_id: &str) -> ReleaseResult<RemoteTaskStatus>;
}

#[derive(Debug, Deserialize)]
struct DispatchResponse {
    task_id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    last_error: Option<String>,
}

/// 基于 reqwest 的 Agent HTTP 客户端
pub struct HttpAgentClient {
    client: reqwest::Client,
    port: u16,
}

impl HttpAgentClient {
    pub fn new(port: u16, timeout: Duration) -> ReleaseResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReleaseError::Configuration(format!("创建Agent HTTP客户端失败: {e}")))?;
        Ok(Self { client, port })
    }

    pub fn tasks_url(&self, node: &Node) -> String {
        format!("http://{}:{}/api/v1/tasks", node.address, self.port)
    }

    pub fn task_url(&self, node: &Node, task_id: &str) -> String {
        format!("{}/{}", self.tasks_url(node), task_id)
    }

    async fn checked(node: &Node, response: reqwest::Response) -> ReleaseResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!("{} 的Agent返回 HTTP {}: {}", node.label(), status, body);
        Err(ReleaseError::AgentRequest(format!(
            "{} 返回 HTTP {status}: {body}",
            node.label()
        )))
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn dispatch(&self, node: &Node, version: &str) -> ReleaseResult<String> {
        let url = self.tasks_url(node);
        debug!("向 {} 下发版本 {}", url, version);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "version": version }))
            .send()
            .await
            .map_err(|e| {
                ReleaseError::AgentRequest(format!("{} 下发失败: {e}", node.label()))
            })?;
        let body: DispatchResponse = Self::checked(node, response)
            .await?
            .json()
            .await
            .map_err(|e| {
                ReleaseError::AgentRequest(format!("{} 下发响应无法解析: {e}", node.label()))
            })?;

        match body.task_id {
            serde_json::Value::String(id) if !id.is_empty() => Ok(id),
            serde_json::Value::Number(id) => Ok(id.to_string()),
            other => Err(ReleaseError::AgentRequest(format!(
                "{} 返回了无效的任务ID: {other}",
                node.label()
            ))),
        }
    }

    async fn query(&self, node: &Node, task_id: &str) -> ReleaseResult<RemoteTaskStatus> {
        let response = self
            .client
            .get(self.task_url(node, task_id))
            .send()
            .await
            .map_err(|e| {
                ReleaseError::AgentRequest(format!("{} 查询失败: {e}", node.label()))
            })?;
        let body: QueryResponse = Self::checked(node, response)
            .await?
            .json()
            .await
            .map_err(|e| {
                ReleaseError::AgentRequest(format!("{} 查询响应无法解析: {e}", node.label()))
            })?;

        Ok(RemoteTaskStatus {
            state: RemoteTaskState::parse(&body.status),
            last_error: body.last_error.filter(|e| !e.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node {
            id: 7,
            name: "edge-7".to_string(),
            address: "10.0.0.7".to_string(),
            enabled: true,
            status: "online".to_string(),
        }
    }

    #[test]
    fn test_urls_use_agent_port() {
        let client = HttpAgentClient::new(9100, Duration::from_secs(5)).unwrap();
        assert_eq!(client.tasks_url(&node()), "http://10.0.0.7:9100/api/v1/tasks");
        assert_eq!(
            client.task_url(&node(), "abc"),
            "http://10.0.0.7:9100/api/v1/tasks/abc"
        );
    }

    #[test]
    fn test_remote_state_parsing() {
        assert_eq!(RemoteTaskState::parse("success"), RemoteTaskState::Succeeded);
        assert_eq!(RemoteTaskState::parse(" FAILED "), RemoteTaskState::Failed);
        assert_eq!(RemoteTaskState::parse("running"), RemoteTaskState::InProgress);
        assert_eq!(RemoteTaskState::parse("queued"), RemoteTaskState::InProgress);
    }

    #[test]
    fn test_query_response_allows_missing_error() {
        let body: QueryResponse = serde_json::from_str(r#"{"status":"running"}"#).unwrap();
        assert!(body.last_error.is_none());
        let body: DispatchResponse = serde_json::from_str(r#"{"task_id":42}"#).unwrap();
        assert_eq!(body.task_id, serde_json::json!(42));
    }
}
