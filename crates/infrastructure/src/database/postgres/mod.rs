pub mod postgres_agent_task_repository;
pub mod postgres_release_task_node_repository;
pub mod postgres_release_task_repository;
pub mod postgres_topology_repository;

pub use postgres_agent_task_repository::PostgresAgentTaskRepository;
pub use postgres_release_task_node_repository::PostgresReleaseTaskNodeRepository;
pub use postgres_release_task_repository::PostgresReleaseTaskRepository;
pub use postgres_topology_repository::PostgresTopologyRepository;
