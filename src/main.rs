use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use release_core::{init_logging, AppConfig, LogFormat};
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::Application;
use shutdown::{wait_for_shutdown_signal, ShutdownManager};

/// CDN 控制面发布编排服务
#[derive(Debug, Parser)]
#[command(name = "release-orchestrator", version, about)]
struct Cli {
    /// 配置文件路径，不指定时按默认位置查找
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 使用内置的 SQLite 配置启动
    #[arg(long, conflicts_with = "config")]
    embedded: bool,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, value_parser = ["json", "pretty"])]
    log_format: Option<String>,

    /// 跳过启动时建表
    #[arg(long)]
    skip_migrate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.embedded {
        AppConfig::embedded_default()
    } else {
        AppConfig::load(cli.config.as_deref()).context("加载配置失败")?
    };
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if let Some(format) = cli.log_format.as_deref() {
        config.observability.log_format = match format {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
    }

    init_logging(
        &config.observability.log_level,
        config.observability.log_format,
    )?;

    info!("启动发布编排服务");
    if let Some(path) = &cli.config {
        info!("配置文件: {path}");
    }

    let app = Arc::new(Application::new(config, !cli.skip_migrate).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("发布编排服务已退出");
    Ok(())
}
