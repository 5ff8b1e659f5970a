use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    batch_runner::BatchRunnerConfig,
    database::DatabaseConfig,
    dispatch::DispatchConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub dispatch: DispatchConfig,
    pub batch_runner: BatchRunnerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (e.g. `RELEASE_DATABASE__URL`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/release.toml", "release.toml", "/etc/release/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("RELEASE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 嵌入式默认配置：SQLite 文件库，适合单机与测试
    pub fn embedded_default() -> Self {
        let mut config = Self::default();
        config.database.url = "sqlite:release.db".to_string();
        config.database.max_connections = 5;
        config
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.dispatch.validate().context("分发配置验证失败")?;
        self.batch_runner
            .validate()
            .context("分批执行器配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.max_error_bytes, 2048);
    }

    #[test]
    fn test_toml_round_trip_keeps_sections() {
        let config = AppConfig::embedded_default();
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.database.url, "sqlite:release.db");
        assert_eq!(parsed.batch_runner.agent_port, config.batch_runner.agent_port);
    }

    #[test]
    fn test_invalid_database_url_rejected() {
        let mut config = AppConfig::default();
        config.database.url = "mysql://localhost/release".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_pull_limits_rejected() {
        let mut config = AppConfig::default();
        config.dispatch.default_pull_limit = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[database]
url = "sqlite:/tmp/release-test.db"
max_connections = 3
min_connections = 1
connection_timeout_seconds = 5
idle_timeout_seconds = 60

[observability]
log_level = "debug"
log_format = "json"
metrics_enabled = false
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.database.max_connections, 3);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.dispatch.default_pull_limit, 10);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/release.toml")).is_err());
    }
}
