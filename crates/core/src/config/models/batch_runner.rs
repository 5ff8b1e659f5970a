use serde::{Deserialize, Serialize};

/// 分批/金丝雀发布执行器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRunnerConfig {
    /// 是否启用执行器；启动时还会结合 release_task_nodes 表是否存在一并决定
    pub enabled: bool,
    /// 扫描待执行发布的间隔
    pub scan_interval_seconds: u64,
    /// 轮询单个节点状态的间隔
    pub poll_interval_seconds: u64,
    /// 单个节点的最大轮询次数，超过即视为失败
    pub max_poll_attempts: u32,
    /// 节点 Agent 监听端口
    pub agent_port: u16,
    /// 调用节点 Agent 的请求超时
    pub agent_request_timeout_seconds: u64,
}

impl Default for BatchRunnerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_seconds: 5,
            poll_interval_seconds: 3,
            max_poll_attempts: 40,
            agent_port: 9100,
            agent_request_timeout_seconds: 10,
        }
    }
}

impl BatchRunnerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scan_interval_seconds == 0 {
            return Err(anyhow::anyhow!("扫描间隔必须大于0"));
        }

        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.max_poll_attempts == 0 {
            return Err(anyhow::anyhow!("最大轮询次数必须大于0"));
        }

        if self.agent_port == 0 {
            return Err(anyhow::anyhow!("Agent端口不能为0"));
        }

        Ok(())
    }
}
