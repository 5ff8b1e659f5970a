pub mod sqlite_agent_task_repository;
pub mod sqlite_release_task_node_repository;
pub mod sqlite_release_task_repository;
pub mod sqlite_topology_repository;

pub use sqlite_agent_task_repository::SqliteAgentTaskRepository;
pub use sqlite_release_task_node_repository::SqliteReleaseTaskNodeRepository;
pub use sqlite_release_task_repository::SqliteReleaseTaskRepository;
pub use sqlite_topology_repository::SqliteTopologyRepository;
