pub mod api_observability;
pub mod app_config;
pub mod batch_runner;
pub mod database;
pub mod dispatch;

pub use api_observability::{ApiConfig, LogFormat, ObservabilityConfig};
pub use app_config::AppConfig;
pub use batch_runner::BatchRunnerConfig;
pub use database::DatabaseConfig;
pub use dispatch::DispatchConfig;
