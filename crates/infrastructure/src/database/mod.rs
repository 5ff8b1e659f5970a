pub mod fixtures;
pub mod manager;
pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use fixtures::TopologySeeder;
pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::{
    PostgresAgentTaskRepository, PostgresReleaseTaskNodeRepository, PostgresReleaseTaskRepository,
    PostgresTopologyRepository,
};
pub use sqlite::{
    SqliteAgentTaskRepository, SqliteReleaseTaskNodeRepository, SqliteReleaseTaskRepository,
    SqliteTopologyRepository,
};
