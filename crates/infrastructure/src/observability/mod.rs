//! 可观测性
//!
//! 指标通过 `metrics` 门面上报，由进程入口安装的 Prometheus 导出器采集；
//! 结构化日志带 `event` 字段，便于按事件检索。

pub mod metrics_collector;
pub mod structured_logger;

pub use metrics_collector::MetricsCollector;
pub use structured_logger::StructuredLogger;
