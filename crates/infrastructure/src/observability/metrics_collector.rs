//! 发布编排的业务指标

use metrics::{counter, histogram};

/// 发布、节点任务与分批执行的计数指标
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn record_release_created(&self, strategy: &str) {
        counter!("release_tasks_created_total", "strategy" => strategy.to_string()).increment(1);
    }

    pub fn record_release_reused(&self) {
        counter!("release_tasks_reused_total").increment(1);
    }

    pub fn record_agent_tasks_dispatched(&self, created: usize, skipped: usize, failed: usize) {
        counter!("agent_tasks_created_total").increment(created as u64);
        counter!("agent_tasks_skipped_total").increment(skipped as u64);
        if failed > 0 {
            counter!("agent_tasks_dispatch_failed_total").increment(failed as u64);
        }
    }

    pub fn record_agent_tasks_claimed(&self, count: usize) {
        counter!("agent_tasks_claimed_total").increment(count as u64);
    }

    pub fn record_node_outcome(&self, outcome: &str) {
        counter!("node_outcomes_reported_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_release_finished(&self, strategy: &str, status: &str) {
        counter!(
            "release_tasks_finished_total",
            "strategy" => strategy.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
    }

    pub fn record_batch_run_duration(&self, duration_seconds: f64) {
        histogram!("batch_run_duration_seconds").record(duration_seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = MetricsCollector::new();
        metrics.record_release_created("pull");
        metrics.record_release_reused();
        metrics.record_agent_tasks_dispatched(2, 1, 0);
        metrics.record_agent_tasks_claimed(2);
        metrics.record_node_outcome("failed");
        metrics.record_release_finished("batch", "success");
        metrics.record_batch_run_duration(1.5);
    }
}
