use release_core::config::*;
use std::env;
use std::fs;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    assert_eq!(config.database.max_connections, 10);
    assert!(config.api.enabled);
    assert!(config.batch_runner.enabled);
    assert_eq!(config.dispatch.default_pull_limit, 10);
    assert_eq!(config.dispatch.max_pull_limit, 100);
    assert_eq!(config.observability.log_format, LogFormat::Pretty);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[database]
url = "postgresql://db:5432/release"
max_connections = 15
min_connections = 2
connection_timeout_seconds = 30
idle_timeout_seconds = 600

[api]
enabled = true
bind_address = "127.0.0.1:9090"
request_timeout_seconds = 15

[dispatch]
default_pull_limit = 20
max_pull_limit = 50
max_error_bytes = 4096

[batch_runner]
enabled = false
scan_interval_seconds = 10
poll_interval_seconds = 2
max_poll_attempts = 30
agent_port = 9200
agent_request_timeout_seconds = 5

[observability]
log_level = "debug"
log_format = "json"
metrics_enabled = true
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();

    assert_eq!(config.database.url, "postgresql://db:5432/release");
    assert_eq!(config.api.bind_address, "127.0.0.1:9090");
    assert_eq!(config.dispatch.effective_limit(None), 20);
    assert_eq!(config.dispatch.effective_limit(Some(500)), 50);
    assert!(!config.batch_runner.enabled);
    assert_eq!(config.batch_runner.agent_port, 9200);
    assert_eq!(config.observability.log_format, LogFormat::Json);
}

#[test]
fn test_config_validation_rules() {
    let mut config = AppConfig::default();

    config.database.url = "".to_string();
    assert!(config.validate().is_err());

    config.database.url = "sqlite::memory:".to_string();
    assert!(config.validate().is_ok());

    config.database.min_connections = 20;
    assert!(config.validate().is_err());
    config.database.min_connections = 1;

    config.api.bind_address = "not-an-address".to_string();
    assert!(config.validate().is_err());
    config.api.bind_address = "0.0.0.0:8080".to_string();

    config.batch_runner.max_poll_attempts = 0;
    assert!(config.validate().is_err());
    config.batch_runner.max_poll_attempts = 40;

    config.observability.log_level = "verbose".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_load_with_environment_override() {
    let temp_file = NamedTempFile::new().unwrap();
    fs::write(
        temp_file.path(),
        r#"
[database]
url = "sqlite:release.db"
max_connections = 5
min_connections = 1
connection_timeout_seconds = 30
idle_timeout_seconds = 600
"#,
    )
    .unwrap();

    env::set_var("RELEASE_DISPATCH__MAX_ERROR_BYTES", "512");
    let config = AppConfig::load(Some(temp_file.path().to_str().unwrap()));
    env::remove_var("RELEASE_DISPATCH__MAX_ERROR_BYTES");

    let config = config.unwrap();
    assert_eq!(config.database.url, "sqlite:release.db");
    assert_eq!(config.dispatch.max_error_bytes, 512);
}
