use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use release_api::{create_app, AppState};
use release_core::AppConfig;
use release_infrastructure::DatabaseManager;
use release_worker::{BatchRunner, HttpAgentClient, PollSchedule};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

/// 分批发布依赖的表
const BATCH_NODES_TABLE: &str = "release_task_nodes";

/// 主应用程序
pub struct Application {
    config: AppConfig,
    db: Arc<DatabaseManager>,
    metrics: Option<PrometheusHandle>,
}

impl Application {
    /// 连接数据库、建表，并据表结构决定是否启用分批发布
    pub async fn new(mut config: AppConfig, migrate: bool) -> Result<Self> {
        let db = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;

        if migrate {
            db.migrate().await.context("初始化数据库表结构失败")?;
        }

        let batch_schema = db
            .has_table(BATCH_NODES_TABLE)
            .await
            .context("检查分批发布表结构失败")?;
        if config.batch_runner.enabled && !batch_schema {
            warn!("数据库缺少 {} 表，分批发布执行器停用", BATCH_NODES_TABLE);
            config.batch_runner.enabled = false;
        }

        let metrics = if config.observability.metrics_enabled {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .context("安装Prometheus指标记录器失败")?;
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            config,
            db: Arc::new(db),
            metrics,
        })
    }

    /// 运行后台执行器与 API 服务器，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut handles = Vec::new();

        if self.config.batch_runner.enabled {
            let runner = self.batch_runner()?;
            let runner_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                runner.run(runner_rx).await;
            }));
        }

        if self.config.api.enabled {
            let server = self.serve_api(shutdown_rx.resubscribe());
            if let Err(e) = server.await {
                error!("API服务器运行失败: {e:#}");
            }
        } else {
            let mut shutdown_rx = shutdown_rx;
            let _ = shutdown_rx.recv().await;
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台任务退出异常: {}", e);
            }
        }

        self.db.close().await;
        info!("数据库连接已关闭");
        Ok(())
    }

    fn batch_runner(&self) -> Result<Arc<BatchRunner>> {
        let settings = &self.config.batch_runner;
        let client = HttpAgentClient::new(
            settings.agent_port,
            Duration::from_secs(settings.agent_request_timeout_seconds),
        )?;

        Ok(Arc::new(BatchRunner::new(
            &self.db,
            Arc::new(client),
            PollSchedule::from_config(settings),
            settings.clone(),
        )))
    }

    async fn serve_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let state = AppState::from_database(self.db.clone(), self.config.dispatch.clone());
        let mut app = create_app(state, &self.config.api);
        if let Some(handle) = self.metrics.clone() {
            app = app.merge(Router::new().route("/metrics", get(move || ready(handle.render()))));
        }

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;

        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .context("API服务器异常退出")?;

        info!("API服务器已停止");
        Ok(())
    }
}
