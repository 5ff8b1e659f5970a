//! 分批/金丝雀发布执行器
//!
//! 与被动拉取模式并列的另一种驱动方式：服务端按批次主动调用节点 Agent 下发，
//! 并轮询各节点的执行状态。

pub mod agent_client;
pub mod batch_release;
pub mod runner;
pub mod schedule;

pub use agent_client::{AgentClient, HttpAgentClient, RemoteTaskState, RemoteTaskStatus};
pub use batch_release::{plan_batches, BatchRelease, BatchReleasePlanner, BatchReleaseService};
pub use runner::BatchRunner;
pub use schedule::PollSchedule;
