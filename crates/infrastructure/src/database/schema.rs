//! 内嵌的表结构定义
//!
//! 两套方言的表结构保持一致：拓扑表（nodes / node_groups / node_ips / line_groups）、
//! 发布任务、节点任务与分批节点表。唯一约束是并发安全的基础：
//! 活跃发布按 (目标, 摘要) 唯一，节点任务按负载中的幂等键唯一。

use release_domain::entities::AgentTaskStatus;

pub(crate) const RELEASE_TASK_COLUMNS: &str = "id, target_type, target_id, line_group_id, \
     content_hash, strategy, status, total_nodes, success_nodes, failed_nodes, retry_count, \
     last_error, payload, created_at, updated_at";

pub(crate) const AGENT_TASK_COLUMNS: &str = "id, release_task_id, node_id, task_type, payload, \
     status, last_error, claimed_at, finished_at, created_at, updated_at";

pub(crate) const RELEASE_TASK_NODE_COLUMNS: &str = "id, release_task_id, node_id, batch, status, \
     agent_task_ref, error_msg, started_at, finished_at";

/// 由内部枚举文本拼出 `'a', 'b'` 形式的列表，只用于固定的状态取值
pub(crate) fn quoted_list<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    values
        .into_iter()
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 可被认领的节点任务状态列表
pub(crate) fn claimable_statuses() -> String {
    quoted_list(
        AgentTaskStatus::ALL
            .iter()
            .filter(|s| s.is_claimable())
            .map(|s| s.as_str()),
    )
}

pub const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS node_groups (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(128) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(128) NOT NULL,
        address VARCHAR(255) NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        status VARCHAR(32) NOT NULL DEFAULT 'offline',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS node_ips (
        id BIGSERIAL PRIMARY KEY,
        node_id BIGINT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        node_group_id BIGINT NOT NULL REFERENCES node_groups(id) ON DELETE CASCADE,
        ip VARCHAR(64) NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        status VARCHAR(32) NOT NULL DEFAULT 'active'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS line_groups (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(128) NOT NULL,
        node_group_id BIGINT NOT NULL REFERENCES node_groups(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS release_tasks (
        id BIGSERIAL PRIMARY KEY,
        target_type VARCHAR(32) NOT NULL,
        target_id BIGINT NOT NULL,
        line_group_id BIGINT NOT NULL,
        content_hash VARCHAR(64) NOT NULL,
        strategy VARCHAR(16) NOT NULL DEFAULT 'pull',
        status VARCHAR(16) NOT NULL,
        total_nodes INTEGER NOT NULL DEFAULT 0,
        success_nodes INTEGER NOT NULL DEFAULT 0,
        failed_nodes INTEGER NOT NULL DEFAULT 0,
        retry_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        payload JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_tasks (
        id BIGSERIAL PRIMARY KEY,
        release_task_id BIGINT NOT NULL REFERENCES release_tasks(id) ON DELETE CASCADE,
        node_id BIGINT NOT NULL,
        task_type VARCHAR(32) NOT NULL,
        payload JSONB NOT NULL,
        status VARCHAR(16) NOT NULL,
        last_error TEXT,
        claimed_at TIMESTAMPTZ,
        finished_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS release_task_nodes (
        id BIGSERIAL PRIMARY KEY,
        release_task_id BIGINT NOT NULL REFERENCES release_tasks(id) ON DELETE CASCADE,
        node_id BIGINT NOT NULL,
        batch INTEGER NOT NULL,
        status VARCHAR(16) NOT NULL,
        agent_task_ref VARCHAR(128),
        error_msg TEXT,
        started_at TIMESTAMPTZ,
        finished_at TIMESTAMPTZ,
        UNIQUE (release_task_id, node_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_node_ips_node_group ON node_ips(node_group_id)",
    "CREATE INDEX IF NOT EXISTS idx_node_ips_node ON node_ips(node_id)",
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_release_tasks_active_hash
        ON release_tasks(target_type, target_id, content_hash)
        WHERE status IN ('pending', 'running')
    "#,
    "CREATE INDEX IF NOT EXISTS idx_release_tasks_line_group_status ON release_tasks(line_group_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_release_tasks_strategy_status ON release_tasks(strategy, status)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_agent_tasks_idempotency_key ON agent_tasks ((payload->>'idempotency_key'))",
    "CREATE INDEX IF NOT EXISTS idx_agent_tasks_node_status ON agent_tasks(node_id, status, id)",
    "CREATE INDEX IF NOT EXISTS idx_agent_tasks_release ON agent_tasks(release_task_id)",
    "CREATE INDEX IF NOT EXISTS idx_release_task_nodes_batch ON release_task_nodes(release_task_id, batch)",
];

pub const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS node_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        address TEXT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT 1,
        status TEXT NOT NULL DEFAULT 'offline',
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS node_ips (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        node_id INTEGER NOT NULL,
        node_group_id INTEGER NOT NULL,
        ip TEXT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT 1,
        status TEXT NOT NULL DEFAULT 'active',
        FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE,
        FOREIGN KEY (node_group_id) REFERENCES node_groups(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS line_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        node_group_id INTEGER NOT NULL,
        FOREIGN KEY (node_group_id) REFERENCES node_groups(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS release_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target_type TEXT NOT NULL,
        target_id INTEGER NOT NULL,
        line_group_id INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        strategy TEXT NOT NULL DEFAULT 'pull',
        status TEXT NOT NULL,
        total_nodes INTEGER NOT NULL DEFAULT 0,
        success_nodes INTEGER NOT NULL DEFAULT 0,
        failed_nodes INTEGER NOT NULL DEFAULT 0,
        retry_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        payload TEXT NOT NULL DEFAULT '{}',
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        release_task_id INTEGER NOT NULL,
        node_id INTEGER NOT NULL,
        task_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL,
        last_error TEXT,
        claimed_at DATETIME,
        finished_at DATETIME,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        FOREIGN KEY (release_task_id) REFERENCES release_tasks(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS release_task_nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        release_task_id INTEGER NOT NULL,
        node_id INTEGER NOT NULL,
        batch INTEGER NOT NULL,
        status TEXT NOT NULL,
        agent_task_ref TEXT,
        error_msg TEXT,
        started_at DATETIME,
        finished_at DATETIME,
        UNIQUE (release_task_id, node_id),
        FOREIGN KEY (release_task_id) REFERENCES release_tasks(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_node_ips_node_group ON node_ips(node_group_id)",
    "CREATE INDEX IF NOT EXISTS idx_node_ips_node ON node_ips(node_id)",
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_release_tasks_active_hash
        ON release_tasks(target_type, target_id, content_hash)
        WHERE status IN ('pending', 'running')
    "#,
    "CREATE INDEX IF NOT EXISTS idx_release_tasks_line_group_status ON release_tasks(line_group_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_release_tasks_strategy_status ON release_tasks(strategy, status)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_agent_tasks_idempotency_key ON agent_tasks (json_extract(payload, '$.idempotency_key'))",
    "CREATE INDEX IF NOT EXISTS idx_agent_tasks_node_status ON agent_tasks(node_id, status, id)",
    "CREATE INDEX IF NOT EXISTS idx_agent_tasks_release ON agent_tasks(release_task_id)",
    "CREATE INDEX IF NOT EXISTS idx_release_task_nodes_batch ON release_task_nodes(release_task_id, batch)",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_list() {
        assert_eq!(quoted_list(["pending", "running"]), "'pending', 'running'");
        assert_eq!(quoted_list(Vec::<&str>::new()), "");
    }

    #[test]
    fn test_claimable_statuses() {
        assert_eq!(claimable_statuses(), "'pending', 'retrying'");
    }

    #[test]
    fn test_both_dialects_define_same_tables() {
        let tables = [
            "nodes",
            "node_groups",
            "node_ips",
            "line_groups",
            "release_tasks",
            "agent_tasks",
            "release_task_nodes",
        ];
        for table in tables {
            let ddl = format!("CREATE TABLE IF NOT EXISTS {table} (");
            assert!(POSTGRES_SCHEMA.iter().any(|s| s.contains(&ddl)), "{table}");
            assert!(SQLITE_SCHEMA.iter().any(|s| s.contains(&ddl)), "{table}");
        }
    }
}
