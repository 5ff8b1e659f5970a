use std::ops::RangeInclusive;
use std::time::Duration;

use release_core::BatchRunnerConfig;

/// 固定间隔、有限次数的轮询节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    interval: Duration,
    max_attempts: u32,
}

impl PollSchedule {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub fn from_config(config: &BatchRunnerConfig) -> Self {
        Self::new(
            Duration::from_secs(config.poll_interval_seconds),
            config.max_poll_attempts,
        )
    }

    pub fn attempts(&self) -> RangeInclusive<u32> {
        1..=self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 等待一个轮询间隔
    pub async fn tick(&self) {
        tokio::time::sleep(self.interval).await;
    }

    /// 轮询耗尽所需的最长时间
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}
