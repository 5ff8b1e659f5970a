use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use release_core::{DatabaseConfig, ReleaseError, ReleaseResult};
use release_domain::repositories::{
    AgentTaskRepository, ReleaseTaskNodeRepository, ReleaseTaskRepository, TopologyRepository,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{debug, info};

use super::postgres::{
    PostgresAgentTaskRepository, PostgresReleaseTaskNodeRepository, PostgresReleaseTaskRepository,
    PostgresTopologyRepository,
};
use super::schema::{POSTGRES_SCHEMA, SQLITE_SCHEMA};
use super::sqlite::{
    SqliteAgentTaskRepository, SqliteReleaseTaskNodeRepository, SqliteReleaseTaskRepository,
    SqliteTopologyRepository,
};

/// 由连接URL判断数据库类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else {
            DatabaseType::SQLite
        }
    }
}

#[derive(Clone)]
pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
}

impl DatabasePool {
    pub async fn new(config: &DatabaseConfig) -> ReleaseResult<Self> {
        match DatabaseType::from_url(&config.url) {
            DatabaseType::PostgreSQL => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_connections)
                    .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
                    .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                    .connect(&config.url)
                    .await?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(&config.url)?
                    .create_if_missing(true)
                    .foreign_keys(true)
                    .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));

                // 内存库每个连接都是独立的数据库，只能使用单连接且不回收
                let pool = if config.url.contains(":memory:") {
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .min_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None)
                        .connect_with(options)
                        .await?
                } else {
                    SqlitePoolOptions::new()
                        .max_connections(config.max_connections)
                        .min_connections(config.min_connections)
                        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
                        .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                        .await?
                };
                Ok(DatabasePool::SQLite(pool))
            }
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn health_check(&self) -> ReleaseResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
        }
    }
}

/// 统一的数据库管理器：连接、建表以及仓储实例的创建
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> ReleaseResult<Self> {
        config
            .validate()
            .map_err(|e| ReleaseError::Configuration(e.to_string()))?;
        let pool = DatabasePool::new(config).await?;
        info!(
            "数据库连接已建立: {:?}, 最大连接数 {}",
            pool.database_type(),
            config.max_connections
        );
        Ok(Self { pool })
    }

    /// 以默认连接参数按URL连接，主要用于测试与嵌入式场景
    pub async fn connect_url(url: &str) -> ReleaseResult<Self> {
        let config = DatabaseConfig {
            url: url.to_string(),
            max_connections: 5,
            ..DatabaseConfig::default()
        };
        Self::new(&config).await
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    pub async fn health_check(&self) -> ReleaseResult<()> {
        self.pool.health_check().await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    /// 创建全部表与索引，可重复执行
    pub async fn migrate(&self) -> ReleaseResult<()> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                for statement in POSTGRES_SCHEMA {
                    sqlx::query(statement).execute(pool).await?;
                }
            }
            DatabasePool::SQLite(pool) => {
                for statement in SQLITE_SCHEMA {
                    sqlx::query(statement).execute(pool).await?;
                }
            }
        }
        debug!("数据库表结构已就绪");
        Ok(())
    }

    /// 判断表是否存在；分批发布是否启用在启动时据此决定一次
    pub async fn has_table(&self, table: &str) -> ReleaseResult<bool> {
        let exists = match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
                )
                .bind(table)
                .fetch_one(pool)
                .await?
            }
            DatabasePool::SQLite(pool) => {
                let count = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = $1",
                )
                .bind(table)
                .fetch_one(pool)
                .await?;
                count > 0
            }
        };
        Ok(exists)
    }

    pub fn release_task_repository(&self) -> Arc<dyn ReleaseTaskRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresReleaseTaskRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => Arc::new(SqliteReleaseTaskRepository::new(pool.clone())),
        }
    }

    pub fn agent_task_repository(&self) -> Arc<dyn AgentTaskRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresAgentTaskRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => Arc::new(SqliteAgentTaskRepository::new(pool.clone())),
        }
    }

    pub fn release_task_node_repository(&self) -> Arc<dyn ReleaseTaskNodeRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresReleaseTaskNodeRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => {
                Arc::new(SqliteReleaseTaskNodeRepository::new(pool.clone()))
            }
        }
    }

    pub fn topology_repository(&self) -> Arc<dyn TopologyRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresTopologyRepository::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteTopologyRepository::new(pool.clone())),
        }
    }
}
