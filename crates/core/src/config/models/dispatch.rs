use serde::{Deserialize, Serialize};

/// 节点任务分发与拉取配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Agent 未指定 limit 时单次拉取的任务数
    pub default_pull_limit: u32,
    /// 单次拉取任务数上限
    pub max_pull_limit: u32,
    /// 节点上报错误信息的最大字节数
    pub max_error_bytes: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_pull_limit: 10,
            max_pull_limit: 100,
            max_error_bytes: 2048,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_pull_limit == 0 {
            return Err(anyhow::anyhow!("默认拉取数量必须大于0"));
        }

        if self.default_pull_limit > self.max_pull_limit {
            return Err(anyhow::anyhow!("默认拉取数量不能大于拉取上限"));
        }

        if self.max_error_bytes == 0 {
            return Err(anyhow::anyhow!("错误信息长度上限必须大于0"));
        }

        Ok(())
    }

    /// 将 Agent 请求的 limit 规整到 [1, max_pull_limit]
    pub fn effective_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_pull_limit)
            .clamp(1, self.max_pull_limit)
    }
}
